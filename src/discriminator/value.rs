// ABOUTME: Closed set of discriminator value variants and their canonical encoding
// ABOUTME: Every variant has an explicit, deterministic textual serialization

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

use super::error::{DiscriminatorError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscriminatorValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<DiscriminatorValue>),
    Record(BTreeMap<String, DiscriminatorValue>),
}

impl DiscriminatorValue {
    /// Encode this value into its canonical form.
    ///
    /// `key` is only used to name the offending entry when encoding fails.
    pub fn encode(&self, key: &str) -> Result<String> {
        let mut out = String::new();
        self.encode_into(key, &mut out)?;
        Ok(out)
    }

    fn encode_into(&self, path: &str, out: &mut String) -> Result<()> {
        match self {
            DiscriminatorValue::String(s) => {
                out.push_str("s:");
                push_quoted(out, s);
            }
            DiscriminatorValue::Integer(i) => {
                let _ = write!(out, "i:{}", i);
            }
            DiscriminatorValue::Float(f) => {
                if f.is_nan() {
                    return Err(DiscriminatorError::ValueNotSerializable {
                        key: path.to_string(),
                        reason: "NaN has no canonical encoding".to_string(),
                    });
                }
                if f.is_infinite() {
                    return Err(DiscriminatorError::ValueNotSerializable {
                        key: path.to_string(),
                        reason: "infinite floats have no canonical encoding".to_string(),
                    });
                }
                // -0.0 and 0.0 are the same configuration
                let f = if *f == 0.0 { 0.0 } else { *f };
                let _ = write!(out, "f:{:?}", f);
            }
            DiscriminatorValue::Boolean(b) => {
                let _ = write!(out, "b:{}", b);
            }
            DiscriminatorValue::List(items) => {
                out.push_str("l:[");
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    item.encode_into(&format!("{}[{}]", path, idx), out)?;
                }
                out.push(']');
            }
            DiscriminatorValue::Record(fields) => {
                out.push_str("r:{");
                for (idx, (field, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        out.push(',');
                    }
                    push_quoted(out, field);
                    out.push('=');
                    value.encode_into(&format!("{}.{}", path, field), out)?;
                }
                out.push('}');
            }
        }

        Ok(())
    }

    /// Parse a command line literal, trying integer, float and boolean before string
    pub fn parse_literal(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return DiscriminatorValue::Integer(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return DiscriminatorValue::Float(f);
            }
        }
        match raw {
            "true" => DiscriminatorValue::Boolean(true),
            "false" => DiscriminatorValue::Boolean(false),
            _ => DiscriminatorValue::String(raw.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DiscriminatorValue::String(_) => "string",
            DiscriminatorValue::Integer(_) => "integer",
            DiscriminatorValue::Float(_) => "float",
            DiscriminatorValue::Boolean(_) => "boolean",
            DiscriminatorValue::List(_) => "list",
            DiscriminatorValue::Record(_) => "record",
        }
    }
}

fn push_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:x}}}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

impl fmt::Display for DiscriminatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscriminatorValue::String(s) => write!(f, "{}", s),
            DiscriminatorValue::Integer(i) => write!(f, "{}", i),
            DiscriminatorValue::Float(v) => write!(f, "{}", v),
            DiscriminatorValue::Boolean(b) => write!(f, "{}", b),
            DiscriminatorValue::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            DiscriminatorValue::Record(fields) => {
                write!(f, "{{")?;
                for (idx, (field, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for DiscriminatorValue {
    fn from(value: &str) -> Self {
        DiscriminatorValue::String(value.to_string())
    }
}

impl From<String> for DiscriminatorValue {
    fn from(value: String) -> Self {
        DiscriminatorValue::String(value)
    }
}

impl From<i64> for DiscriminatorValue {
    fn from(value: i64) -> Self {
        DiscriminatorValue::Integer(value)
    }
}

impl From<i32> for DiscriminatorValue {
    fn from(value: i32) -> Self {
        DiscriminatorValue::Integer(i64::from(value))
    }
}

impl From<u32> for DiscriminatorValue {
    fn from(value: u32) -> Self {
        DiscriminatorValue::Integer(i64::from(value))
    }
}

impl From<f64> for DiscriminatorValue {
    fn from(value: f64) -> Self {
        DiscriminatorValue::Float(value)
    }
}

impl From<bool> for DiscriminatorValue {
    fn from(value: bool) -> Self {
        DiscriminatorValue::Boolean(value)
    }
}

impl From<Vec<DiscriminatorValue>> for DiscriminatorValue {
    fn from(value: Vec<DiscriminatorValue>) -> Self {
        DiscriminatorValue::List(value)
    }
}

impl From<BTreeMap<String, DiscriminatorValue>> for DiscriminatorValue {
    fn from(value: BTreeMap<String, DiscriminatorValue>) -> Self {
        DiscriminatorValue::Record(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(
            DiscriminatorValue::from("svm").encode("algo").unwrap(),
            "s:\"svm\""
        );
        assert_eq!(DiscriminatorValue::from(42).encode("seed").unwrap(), "i:42");
        assert_eq!(DiscriminatorValue::from(true).encode("b").unwrap(), "b:true");
        assert_eq!(DiscriminatorValue::from(0.5).encode("lr").unwrap(), "f:0.5");
    }

    #[test]
    fn test_string_and_integer_do_not_collide() {
        let s = DiscriminatorValue::from("42").encode("k").unwrap();
        let i = DiscriminatorValue::from(42).encode("k").unwrap();
        assert_ne!(s, i);
    }

    #[test]
    fn test_quotes_are_escaped() {
        let encoded = DiscriminatorValue::from("a\"b\\c").encode("k").unwrap();
        assert_eq!(encoded, "s:\"a\\\"b\\\\c\"");
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let neg = DiscriminatorValue::Float(-0.0).encode("k").unwrap();
        let pos = DiscriminatorValue::Float(0.0).encode("k").unwrap();
        assert_eq!(neg, pos);
    }

    #[test]
    fn test_nan_is_not_serializable() {
        let err = DiscriminatorValue::Float(f64::NAN).encode("lr").unwrap_err();
        assert!(matches!(
            err,
            DiscriminatorError::ValueNotSerializable { ref key, .. } if key == "lr"
        ));
    }

    #[test]
    fn test_nested_error_reports_path() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "weights".to_string(),
            DiscriminatorValue::List(vec![
                DiscriminatorValue::Float(1.0),
                DiscriminatorValue::Float(f64::INFINITY),
            ]),
        );
        let err = DiscriminatorValue::Record(fields)
            .encode("model")
            .unwrap_err();

        match err {
            DiscriminatorError::ValueNotSerializable { key, .. } => {
                assert_eq!(key, "model.weights[1]");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_record_encoding_is_sorted() {
        let mut a = BTreeMap::new();
        a.insert("z".to_string(), DiscriminatorValue::from(1));
        a.insert("a".to_string(), DiscriminatorValue::from(2));

        let encoded = DiscriminatorValue::Record(a).encode("r").unwrap();
        assert_eq!(encoded, "r:{\"a\"=i:2,\"z\"=i:1}");
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            DiscriminatorValue::parse_literal("7"),
            DiscriminatorValue::Integer(7)
        );
        assert_eq!(
            DiscriminatorValue::parse_literal("0.25"),
            DiscriminatorValue::Float(0.25)
        );
        assert_eq!(
            DiscriminatorValue::parse_literal("false"),
            DiscriminatorValue::Boolean(false)
        );
        assert_eq!(
            DiscriminatorValue::parse_literal("en"),
            DiscriminatorValue::String("en".to_string())
        );
        assert_eq!(
            DiscriminatorValue::parse_literal("nan"),
            DiscriminatorValue::String("nan".to_string())
        );
    }

    #[test]
    fn test_json_round_trip_keeps_variant() {
        let value = DiscriminatorValue::List(vec![
            DiscriminatorValue::from("x"),
            DiscriminatorValue::from(3),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: DiscriminatorValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
