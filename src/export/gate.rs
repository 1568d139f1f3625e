//! Single-slot review gate.
//!
//! A record whose policy demands an ordered layout parks here until a reviewer
//! either confirms an image ordering or cancels the job. The gate holds at most
//! one pending review; the record keeps occupying the cursor index it was
//! opened at until the review is consumed.

use crate::catalog::{CategoryPolicy, ResolvedRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuspensionToken(Uuid);

impl SuspensionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SuspensionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("no review is pending")]
    NotOpen,
    #[error("a review is already pending for record `{record_id}`")]
    AlreadyOpen { record_id: String },
    #[error("token does not match the pending review")]
    TokenMismatch,
    #[error("image position {position} out of range (record has {len} images)")]
    PositionOutOfRange { position: usize, len: usize },
    #[error("ordering must contain exactly the record's images")]
    NotAPermutation,
}

#[derive(Debug, Clone)]
struct SuspensionState {
    token: SuspensionToken,
    record: ResolvedRecord,
    policy: CategoryPolicy,
    draft: Vec<String>,
    index: usize,
}

/// Read-only view of the pending review.
#[derive(Debug, Clone, Serialize)]
pub struct SuspensionView {
    pub token: SuspensionToken,
    pub index: usize,
    pub record: ResolvedRecord,
    pub category: String,
    pub ordering: Vec<String>,
}

/// What the orchestrator gets back when a review is confirmed: the record with
/// the reviewed ordering substituted in.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedReview {
    pub record: ResolvedRecord,
    pub policy: CategoryPolicy,
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct SuspensionGate {
    slot: Option<SuspensionState>,
}

impl SuspensionGate {
    pub fn open(
        &mut self,
        record: ResolvedRecord,
        policy: CategoryPolicy,
        index: usize,
    ) -> Result<SuspensionToken, GateError> {
        if let Some(pending) = &self.slot {
            return Err(GateError::AlreadyOpen {
                record_id: pending.record.id.clone(),
            });
        }
        let token = SuspensionToken::new();
        self.slot = Some(SuspensionState {
            token,
            draft: record.images.clone(),
            record,
            policy,
            index,
        });
        Ok(token)
    }

    pub fn is_open(&self) -> bool {
        self.slot.is_some()
    }

    pub fn pending_record_id(&self) -> Option<&str> {
        self.slot.as_ref().map(|state| state.record.id.as_str())
    }

    pub fn view(&self) -> Option<SuspensionView> {
        self.slot.as_ref().map(|state| SuspensionView {
            token: state.token,
            index: state.index,
            record: state.record.clone(),
            category: state
                .policy
                .name
                .clone()
                .unwrap_or_else(|| state.policy.category_id.clone()),
            ordering: state.draft.clone(),
        })
    }

    /// Swaps two positions of the draft ordering.
    pub fn swap(
        &mut self,
        token: SuspensionToken,
        a: usize,
        b: usize,
    ) -> Result<&[String], GateError> {
        let state = self.pending_mut(token)?;
        let len = state.draft.len();
        for position in [a, b] {
            if position >= len {
                return Err(GateError::PositionOutOfRange { position, len });
            }
        }
        state.draft.swap(a, b);
        Ok(&state.draft)
    }

    /// Consumes the pending review. Without an explicit ordering the current
    /// draft is used. An invalid ordering leaves the review pending.
    pub fn confirm(
        &mut self,
        token: SuspensionToken,
        ordering: Option<Vec<String>>,
    ) -> Result<ConfirmedReview, GateError> {
        let state = self.pending_mut(token)?;
        if let Some(ordering) = ordering {
            if !is_permutation(&state.record.images, &ordering) {
                return Err(GateError::NotAPermutation);
            }
            state.draft = ordering;
        }
        let SuspensionState {
            mut record,
            policy,
            draft,
            index,
            ..
        } = self.slot.take().ok_or(GateError::NotOpen)?;
        record.images = draft;
        Ok(ConfirmedReview {
            record,
            policy,
            index,
        })
    }

    pub fn cancel(&mut self, token: SuspensionToken) -> Result<(), GateError> {
        self.pending_mut(token)?;
        self.slot = None;
        Ok(())
    }

    /// Drops any pending review without a token; used when the whole job is cancelled.
    pub fn close(&mut self) {
        self.slot = None;
    }

    fn pending_mut(&mut self, token: SuspensionToken) -> Result<&mut SuspensionState, GateError> {
        let state = self.slot.as_mut().ok_or(GateError::NotOpen)?;
        if state.token != token {
            return Err(GateError::TokenMismatch);
        }
        Ok(state)
    }
}

fn is_permutation(original: &[String], candidate: &[String]) -> bool {
    if original.len() != candidate.len() {
        return false;
    }
    let mut left: Vec<&String> = original.iter().collect();
    let mut right: Vec<&String> = candidate.iter().collect();
    left.sort();
    right.sort();
    left == right
}
