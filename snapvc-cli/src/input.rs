//! JSON input for commands that take a document

use anyhow::{Context, Result};
use snapvc_core::{DocPath, Document};
use std::collections::BTreeMap;
use std::io::Read;

/// Read JSON from a file path, or from stdin when `source` is "-"
pub fn read_json(source: &str) -> Result<serde_json::Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read JSON from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read {}", source))?
    };
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", source))
}

pub fn read_document(source: &str) -> Result<Document> {
    Ok(read_json(source)?.into())
}

/// Conflict resolutions as `{"<path>": value}`; `null` deletes the path
pub fn read_resolutions(source: &str) -> Result<BTreeMap<DocPath, Option<Document>>> {
    let value = read_json(source)?;
    serde_json::from_value(value)
        .with_context(|| format!("Resolutions in {} must map paths to values", source))
}
