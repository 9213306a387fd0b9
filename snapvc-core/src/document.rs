//! Content document model
//!
//! Payloads (notebooks, visualizations, datasets, scripts) are stored as a
//! recursive [`Document`] so diffing and merging can walk them
//! generically. [`DocPath`] is the canonical locator into a document, written
//! as `cells[3].output`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Arbitrary nested key/value document
///
/// Serialized as plain JSON. Map keys are kept sorted so the canonical walk
/// order is the iteration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Sequence(Vec<Document>),
    Map(BTreeMap<String, Document>),
}

impl Document {
    /// Create an empty map document
    pub fn map() -> Self {
        Document::Map(BTreeMap::new())
    }

    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Document::Null => "null",
            Document::Bool(_) => "bool",
            Document::Integer(_) => "integer",
            Document::Float(_) => "float",
            Document::Text(_) => "text",
            Document::Sequence(_) => "sequence",
            Document::Map(_) => "map",
        }
    }

    /// Look up the value at `path`
    pub fn get(&self, path: &DocPath) -> Option<&Document> {
        let mut current = self;
        for segment in path.segments() {
            current = match (current, segment) {
                (Document::Map(map), PathSegment::Key(key)) => map.get(key)?,
                (Document::Sequence(items), PathSegment::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn get_mut(&mut self, segments: &[PathSegment]) -> Option<&mut Document> {
        let mut current = self;
        for segment in segments {
            current = match (current, segment) {
                (Document::Map(map), PathSegment::Key(key)) => map.get_mut(key)?,
                (Document::Sequence(items), PathSegment::Index(index)) => {
                    items.get_mut(*index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at `path`, creating the final map key or appending at
    /// the end of a sequence. Intermediate containers must already exist.
    pub fn set(&mut self, path: &DocPath, value: Document) -> Result<(), PathError> {
        let Some((last, parent)) = path.segments().split_last() else {
            *self = value;
            return Ok(());
        };
        let container = self
            .get_mut(parent)
            .ok_or_else(|| PathError::Missing(path.to_string()))?;

        match (container, last) {
            (Document::Map(map), PathSegment::Key(key)) => {
                map.insert(key.clone(), value);
                Ok(())
            }
            (Document::Sequence(items), PathSegment::Index(index)) => {
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else if *index == items.len() {
                    items.push(value);
                    Ok(())
                } else {
                    Err(PathError::OutOfBounds {
                        path: path.to_string(),
                        len: items.len(),
                    })
                }
            }
            (other, _) => Err(PathError::TypeMismatch {
                path: path.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Remove the value at `path`
    ///
    /// Only the last element of a sequence can be removed: removing an
    /// earlier one would move every later element to a different locator.
    pub fn remove(&mut self, path: &DocPath) -> Result<Document, PathError> {
        let Some((last, parent)) = path.segments().split_last() else {
            return Err(PathError::Root);
        };
        let container = self
            .get_mut(parent)
            .ok_or_else(|| PathError::Missing(path.to_string()))?;

        match (container, last) {
            (Document::Map(map), PathSegment::Key(key)) => map
                .remove(key)
                .ok_or_else(|| PathError::Missing(path.to_string())),
            (Document::Sequence(items), PathSegment::Index(index)) => {
                if *index >= items.len() {
                    Err(PathError::Missing(path.to_string()))
                } else if *index + 1 != items.len() {
                    Err(PathError::WouldShift(path.to_string()))
                } else {
                    Ok(items.remove(*index))
                }
            }
            (other, _) => Err(PathError::TypeMismatch {
                path: path.to_string(),
                found: other.kind(),
            }),
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Document::map()
    }
}

impl From<serde_json::Value> for Document {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Document::Null,
            serde_json::Value::Bool(b) => Document::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Document::Integer(i),
                None => Document::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Document::Text(s),
            serde_json::Value::Array(items) => {
                Document::Sequence(items.into_iter().map(Document::from).collect())
            }
            serde_json::Value::Object(map) => Document::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Document::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Document> for serde_json::Value {
    fn from(doc: Document) -> Self {
        match doc {
            Document::Null => serde_json::Value::Null,
            Document::Bool(b) => serde_json::Value::Bool(b),
            Document::Integer(i) => serde_json::Value::from(i),
            Document::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Document::Text(s) => serde_json::Value::String(s),
            Document::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Document::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// Errors from applying a value at a path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path {0} does not exist")]
    Missing(String),

    #[error("index at {path} is beyond the end of a sequence of length {len}")]
    OutOfBounds { path: String, len: usize },

    #[error("removing {0} would shift later sequence elements")]
    WouldShift(String),

    #[error("cannot address {path} inside a {found}")]
    TypeMismatch { path: String, found: &'static str },

    #[error("the document root cannot be removed")]
    Root,

    #[error("invalid path syntax in {input:?}: {reason}")]
    Syntax { input: String, reason: String },
}

/// One step of a [`DocPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Canonical locator into a [`Document`]
///
/// The empty path is the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(Vec<PathSegment>);

impl DocPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Path of a map entry below this one
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        Self(segments)
    }

    /// Path of a sequence element below this one
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// The enclosing path; `None` at the root
    pub fn parent(&self) -> Option<DocPath> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    /// True if `self` addresses a value strictly inside `other`'s value
    pub fn is_descendant_of(&self, other: &DocPath) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if is_plain_key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathSegment::Key(key) => {
                    let quoted = serde_json::to_string(key).map_err(|_| fmt::Error)?;
                    write!(f, "[{}]", quoted)?;
                }
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl FromStr for DocPath {
    type Err = PathError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let syntax = |reason: &str| PathError::Syntax {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let bytes = input.as_bytes();
        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            match bytes[pos] {
                b'[' if bytes.get(pos + 1) == Some(&b'"') => {
                    // Quoted key: scan to the closing quote, honouring escapes
                    let start = pos + 1;
                    let mut end = start + 1;
                    while end < bytes.len() && bytes[end] != b'"' {
                        end += if bytes[end] == b'\\' { 2 } else { 1 };
                    }
                    if end >= bytes.len() || bytes.get(end + 1) != Some(&b']') {
                        return Err(syntax("unterminated quoted key"));
                    }
                    let key: String = serde_json::from_str(&input[start..=end])
                        .map_err(|e| syntax(&e.to_string()))?;
                    segments.push(PathSegment::Key(key));
                    pos = end + 2;
                }
                b'[' => {
                    let close = input[pos..]
                        .find(']')
                        .map(|offset| pos + offset)
                        .ok_or_else(|| syntax("unterminated index"))?;
                    let index = input[pos + 1..close]
                        .parse::<usize>()
                        .map_err(|_| syntax("index is not a non-negative integer"))?;
                    segments.push(PathSegment::Index(index));
                    pos = close + 1;
                }
                b'.' if pos == 0 => return Err(syntax("leading '.'")),
                _ => {
                    let start = if bytes[pos] == b'.' { pos + 1 } else { pos };
                    if pos > 0 && bytes[pos] != b'.' {
                        return Err(syntax("expected '.' or '[' between segments"));
                    }
                    let end = input[start..]
                        .find(['.', '['])
                        .map(|offset| start + offset)
                        .unwrap_or(bytes.len());
                    let key = &input[start..end];
                    if !is_plain_key(key) {
                        return Err(syntax("keys outside brackets must be [A-Za-z0-9_-]+"));
                    }
                    segments.push(PathSegment::Key(key.to_string()));
                    pos = end;
                }
            }
        }

        Ok(Self(segments))
    }
}

impl Serialize for DocPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DocPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from(value)
    }

    #[test]
    fn test_path_display() {
        let path = DocPath::root().key("cells").index(3).key("output");
        assert_eq!(path.to_string(), "cells[3].output");
        assert_eq!(DocPath::root().to_string(), "");
        assert_eq!(DocPath::root().key("a.b").key("c").to_string(), "[\"a.b\"].c");
    }

    #[test]
    fn test_path_parse() {
        let path: DocPath = "cells[3].output".parse().unwrap();
        assert_eq!(path, DocPath::root().key("cells").index(3).key("output"));

        let quoted: DocPath = "[\"a.b\"][0]".parse().unwrap();
        assert_eq!(quoted, DocPath::root().key("a.b").index(0));

        let root: DocPath = "".parse().unwrap();
        assert!(root.is_root());
    }

    #[test]
    fn test_path_parse_rejects_garbage() {
        assert!("cells[x]".parse::<DocPath>().is_err());
        assert!(".cells".parse::<DocPath>().is_err());
        assert!("cells[1]out".parse::<DocPath>().is_err());
        assert!("a..b".parse::<DocPath>().is_err());
        assert!("[\"open".parse::<DocPath>().is_err());
    }

    #[test]
    fn test_path_descendant() {
        let a = DocPath::root().key("a");
        let ab = a.key("b");
        assert!(ab.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&ab));
        assert!(!a.is_descendant_of(&a));
        assert_eq!(ab.index(2).parent(), Some(ab.clone()));
        assert_eq!(a.parent(), Some(DocPath::root()));
        assert_eq!(DocPath::root().parent(), None);
    }

    #[test]
    fn test_document_json_shape() {
        let value = json!({"cells": [1, 2.5, "x", null, true], "meta": {}});
        let document = doc(value.clone());
        assert_eq!(serde_json::to_value(&document).unwrap(), value);

        let parsed: Document = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, document);
    }

    #[test]
    fn test_set_and_get() {
        let mut document = doc(json!({"cells": [1, 2]}));
        let tail = DocPath::root().key("cells").index(2);
        document.set(&tail, Document::Integer(3)).unwrap();
        assert_eq!(document, doc(json!({"cells": [1, 2, 3]})));
        assert_eq!(document.get(&tail), Some(&Document::Integer(3)));

        let far = DocPath::root().key("cells").index(7);
        assert!(matches!(
            document.set(&far, Document::Null),
            Err(PathError::OutOfBounds { len: 3, .. })
        ));
    }

    #[test]
    fn test_remove_only_from_sequence_tail() {
        let mut document = doc(json!({"cells": [1, 2, 3], "title": "t"}));
        let middle = DocPath::root().key("cells").index(1);
        assert!(matches!(
            document.remove(&middle),
            Err(PathError::WouldShift(_))
        ));

        let last = DocPath::root().key("cells").index(2);
        assert_eq!(document.remove(&last).unwrap(), Document::Integer(3));
        document.remove(&DocPath::root().key("title")).unwrap();
        assert_eq!(document, doc(json!({"cells": [1, 2]})));
    }
}
