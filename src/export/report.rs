use crate::archive::ExportDownload;
use crate::catalog::ResolvedRecord;
use serde_json::Value;
use std::collections::BTreeSet;

const FIXED_COLUMNS: [&str; 4] = ["code", "id", "category_id", "image_count"];

/// Builds the logistics CSV: fixed columns followed by every metadata key seen
/// across the records, in sorted order. Metadata keys that collide with a fixed
/// column are dropped; the fixed column wins.
pub fn logistics_report(label: &str, records: &[ResolvedRecord]) -> ExportDownload {
    let metadata_keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.metadata.keys().map(String::as_str))
        .filter(|key| !FIXED_COLUMNS.contains(key))
        .collect();

    let mut out = String::new();
    let header = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(metadata_keys.iter().copied())
        .map(csv_field)
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&header);
    out.push_str("\r\n");

    for record in records {
        let mut row = vec![
            csv_field(&record.code),
            csv_field(&record.id),
            csv_field(record.category_id.as_deref().unwrap_or("")),
            record.images.len().to_string(),
        ];
        row.extend(
            metadata_keys
                .iter()
                .map(|key| csv_field(&cell(record.metadata.get(*key)))),
        );
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }

    ExportDownload {
        file_name: format!("{label}-logistics.csv"),
        content_type: "text/csv; charset=utf-8",
        bytes: out.into_bytes(),
    }
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
