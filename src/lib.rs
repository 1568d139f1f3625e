pub mod archive;
pub mod catalog;
pub mod config;
pub mod export;
pub mod http;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod render;
