use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One backend entity matched from an operator-supplied identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ResolvedRecord {
    pub fn matches(&self, identifier: &str) -> bool {
        self.code == identifier || self.id == identifier
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub category_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub requires_ordered_layout: bool,
}

/// Read-only snapshot of category policies, keyed by category id.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    entries: HashMap<String, CategoryPolicy>,
}

impl PolicyTable {
    pub fn get(&self, category_id: &str) -> Option<&CategoryPolicy> {
        self.entries.get(category_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<CategoryPolicy> for PolicyTable {
    fn from_iter<I: IntoIterator<Item = CategoryPolicy>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|policy| (policy.category_id.clone(), policy))
                .collect(),
        }
    }
}
