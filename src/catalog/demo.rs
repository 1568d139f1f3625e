//! Offline catalog used when no catalog API is configured.

use crate::catalog::{CategoryPolicy, PolicyTable, ResolvedRecord};
use serde_json::{Map, Value, json};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

#[derive(Clone, Copy)]
struct DemoCategory {
    id: &'static str,
    label: &'static str,
    requires_ordered_layout: bool,
    listed: bool,
    warehouse: &'static str,
}

const CATEGORY_POOL: [DemoCategory; 5] = [
    DemoCategory {
        id: "11450",
        label: "Clothing, Shoes & Accessories",
        requires_ordered_layout: false,
        listed: true,
        warehouse: "WH-EAST",
    },
    DemoCategory {
        id: "31387",
        label: "Consumer Electronics",
        requires_ordered_layout: false,
        listed: true,
        warehouse: "WH-CENTRAL",
    },
    DemoCategory {
        id: "261178",
        label: "Collectibles",
        requires_ordered_layout: true,
        listed: true,
        warehouse: "WH-EAST",
    },
    DemoCategory {
        id: "293",
        label: "Health & Beauty",
        requires_ordered_layout: false,
        listed: true,
        warehouse: "WH-WEST",
    },
    // Retired category: records still point at it but it has no policy.
    DemoCategory {
        id: "99001",
        label: "Discontinued",
        requires_ordered_layout: false,
        listed: false,
        warehouse: "WH-WEST",
    },
];

const UNKNOWN_PREFIX: &str = "UNKNOWN";

pub fn lookup(identifiers: &[String]) -> Vec<ResolvedRecord> {
    identifiers
        .iter()
        .filter(|id| !id.to_uppercase().starts_with(UNKNOWN_PREFIX))
        .map(|id| record_for(id))
        .collect()
}

pub fn policies() -> PolicyTable {
    CATEGORY_POOL
        .iter()
        .filter(|category| category.listed)
        .map(|category| CategoryPolicy {
            category_id: category.id.to_string(),
            name: Some(category.label.to_string()),
            requires_ordered_layout: category.requires_ordered_layout,
        })
        .collect()
}

fn record_for(code: &str) -> ResolvedRecord {
    let seed = seed_for(code);
    let category = CATEGORY_POOL[(seed as usize) % CATEGORY_POOL.len()];
    let image_count = 2 + (seed % 3) as usize;
    let images = (1..=image_count)
        .map(|n| format!("https://assets.example.com/{code}/{n}.jpg"))
        .collect();

    let mut metadata = Map::new();
    metadata.insert("name".into(), Value::String(format!("{} item {code}", category.label)));
    metadata.insert("warehouse".into(), Value::String(category.warehouse.into()));
    metadata.insert("weight_kg".into(), json!(((seed % 250) as f64 + 50.0) / 100.0));
    metadata.insert("stock".into(), json!(seed % 40));

    ResolvedRecord {
        id: format!("rec-{:012x}", seed & 0xffff_ffff_ffff),
        code: code.to_string(),
        category_id: Some(category.id.to_string()),
        images,
        metadata,
    }
}

fn seed_for(code: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    code.hash(&mut hasher);
    hasher.finish()
}
