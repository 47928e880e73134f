//! Tagged boundary-crossing value representation
//!
//! Every value exchanged between the host runtime and native code is a
//! `VariantValue`. The representation is fully self-describing: no external
//! schema is needed to interpret one. Values are immutable once constructed
//! except through explicit conversion.

use crate::closure::ClosureInfo;
use crate::object::ObjectHandle;
use crate::value::image::ImageBlob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The tagged union crossing the host/native boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariantValue {
    /// Absence marker
    Undefined,
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Image(ImageBlob),
    /// Ordered sequence of values
    Sequence(Vec<VariantValue>),
    /// Key/value pairs; keys unique, insertion order irrelevant
    Mapping(Vec<(VariantValue, VariantValue)>),
    /// Shared reference to a native class instance
    Object(ObjectHandle),
    /// Serializable reference to a registered function
    Closure(ClosureInfo),
}

impl VariantValue {
    /// Tag name used in conversion diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Image(_) => "image",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
            Self::Object(_) => "object",
            Self::Closure(_) => "closure",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Build a mapping from pairs, keeping keys unique: a later pair with
    /// an equal key replaces the earlier one.
    pub fn mapping(pairs: impl IntoIterator<Item = (VariantValue, VariantValue)>) -> Self {
        let mut entries: Vec<(VariantValue, VariantValue)> = Vec::new();
        for (key, value) in pairs {
            if let Some(existing) = entries.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = value;
            } else {
                entries.push((key, value));
            }
        }
        Self::Mapping(entries)
    }

    /// Look up a mapping entry by key; `None` for non-mappings too
    pub fn mapping_get(&self, key: &VariantValue) -> Option<&VariantValue> {
        match self {
            Self::Mapping(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn sequence(values: impl IntoIterator<Item = VariantValue>) -> Self {
        Self::Sequence(values.into_iter().collect())
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "\"{}\"", s),
            Self::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Image(img) => write!(f, "{:?}", img),
            Self::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Self::Mapping(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Self::Object(handle) => write!(f, "<{}>", handle.class_name()),
            Self::Closure(info) => write!(f, "<closure {}>", info.function),
        }
    }
}

impl Default for VariantValue {
    fn default() -> Self {
        Self::Undefined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(VariantValue::Integer(1).kind(), "integer");
        assert_eq!(VariantValue::Undefined.kind(), "undefined");
        assert_eq!(VariantValue::Sequence(vec![]).kind(), "sequence");
    }

    #[test]
    fn test_mapping_keys_unique() {
        let m = VariantValue::mapping(vec![
            (VariantValue::String("a".into()), VariantValue::Integer(1)),
            (VariantValue::String("b".into()), VariantValue::Integer(2)),
            (VariantValue::String("a".into()), VariantValue::Integer(3)),
        ]);
        match &m {
            VariantValue::Mapping(entries) => assert_eq!(entries.len(), 2),
            other => panic!("expected mapping, got {}", other.kind()),
        }
        let key = VariantValue::String("a".into());
        assert_eq!(m.mapping_get(&key), Some(&VariantValue::Integer(3)));
    }

    #[test]
    fn test_display_nested() {
        let v = VariantValue::sequence(vec![
            VariantValue::Integer(1),
            VariantValue::String("x".into()),
        ]);
        assert_eq!(v.to_string(), "[1, \"x\"]");
    }

    #[test]
    fn test_json_round_trip() {
        let v = VariantValue::mapping(vec![(
            VariantValue::String("n".into()),
            VariantValue::Sequence(vec![VariantValue::Integer(7), VariantValue::Float(0.5)]),
        )]);
        let json = serde_json::to_string(&v).unwrap();
        let back: VariantValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
