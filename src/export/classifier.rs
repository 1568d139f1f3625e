use crate::catalog::{CategoryPolicy, PolicyTable, ResolvedRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The record's category is missing or has no policy; the record is skipped.
    NoCategory,
    DirectRender(CategoryPolicy),
    /// The policy demands an ordered layout, so a reviewer must confirm the image order.
    RequiresReview(CategoryPolicy),
}

pub fn classify(record: &ResolvedRecord, policies: &PolicyTable) -> Decision {
    let Some(policy) = record
        .category_id
        .as_deref()
        .and_then(|category| policies.get(category))
    else {
        return Decision::NoCategory;
    };
    if policy.requires_ordered_layout {
        Decision::RequiresReview(policy.clone())
    } else {
        Decision::DirectRender(policy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::resolver::fakes::record;

    fn table() -> PolicyTable {
        [
            CategoryPolicy {
                category_id: "plain".into(),
                name: None,
                requires_ordered_layout: false,
            },
            CategoryPolicy {
                category_id: "ordered".into(),
                name: Some("Collectibles".into()),
                requires_ordered_layout: true,
            },
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn missing_category_reference_is_no_category() {
        assert_eq!(classify(&record("A", None), &table()), Decision::NoCategory);
    }

    #[test]
    fn unknown_category_is_no_category() {
        assert_eq!(
            classify(&record("A", Some("retired")), &table()),
            Decision::NoCategory
        );
    }

    #[test]
    fn ordered_layout_flag_is_the_review_trigger() {
        assert!(matches!(
            classify(&record("A", Some("ordered")), &table()),
            Decision::RequiresReview(policy) if policy.category_id == "ordered"
        ));
        assert!(matches!(
            classify(&record("B", Some("plain")), &table()),
            Decision::DirectRender(_)
        ));
    }

    #[test]
    fn classification_is_deterministic() {
        let policies = table();
        let rec = record("A", Some("ordered"));
        assert_eq!(classify(&rec, &policies), classify(&rec, &policies));
    }
}
