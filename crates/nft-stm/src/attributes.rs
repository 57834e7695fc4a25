//! Attribute Type Registry
//!
//! Maps every attribute name declared in the configuration to its
//! [`AttributeType`]. Values written by clients and values produced by
//! transition actions are validated against these types.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::config::dto::{AttributeDeclDto, AttributeSpecDto};
use crate::error::{StmError, StmResult};

/// Declared type of an attribute, with kind-specific constraints.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String {
        max_length: Option<usize>,
        one_of: Option<Vec<String>>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Boolean,
    /// URI pointing at content uploaded out of band.
    ContentUri,
    /// RFC 3339 timestamp or `YYYY-MM-DD`.
    Date,
    StringList,
    NumberList,
    /// Any JSON value.
    Json,
}

impl AttributeType {
    /// Name of the type as written in the configuration.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Integer { .. } => "integer",
            Self::Boolean => "boolean",
            Self::ContentUri => "content_uri",
            Self::Date => "date",
            Self::StringList => "string[]",
            Self::NumberList => "number[]",
            Self::Json => "json",
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Self::ContentUri)
    }

    /// Build a type from its configuration declaration.
    pub fn from_decl(decl: &AttributeDeclDto) -> Result<Self, String> {
        match decl {
            AttributeDeclDto::Shorthand(name) => Self::from_spec(&AttributeSpecDto {
                kind: name.clone(),
                ..Default::default()
            }),
            AttributeDeclDto::Detailed(spec) => Self::from_spec(spec),
        }
    }

    fn from_spec(spec: &AttributeSpecDto) -> Result<Self, String> {
        let kind = spec.kind.trim();
        let ty = match kind {
            "string" => Self::String {
                max_length: spec.max_length,
                one_of: spec.one_of.clone(),
            },
            "number" => Self::Number {
                min: spec.min,
                max: spec.max,
            },
            "integer" => Self::Integer {
                min: spec.min.map(|v| v as i64),
                max: spec.max.map(|v| v as i64),
            },
            "boolean" => Self::Boolean,
            "content_uri" => Self::ContentUri,
            "date" => Self::Date,
            "string[]" => Self::StringList,
            "number[]" => Self::NumberList,
            "json" => Self::Json,
            other => return Err(format!("unknown attribute type '{}'", other)),
        };

        let numeric = matches!(ty, Self::Number { .. } | Self::Integer { .. });
        if !numeric && (spec.min.is_some() || spec.max.is_some()) {
            return Err(format!("'min'/'max' do not apply to type '{}'", kind));
        }
        if !matches!(ty, Self::String { .. })
            && (spec.max_length.is_some() || spec.one_of.is_some())
        {
            return Err(format!("'max_length'/'one_of' do not apply to type '{}'", kind));
        }
        if let (Some(min), Some(max)) = (spec.min, spec.max) {
            if min > max {
                return Err(format!("min {} is greater than max {}", min, max));
            }
        }
        if matches!(ty, Self::Integer { .. }) {
            for bound in [spec.min, spec.max].into_iter().flatten() {
                if bound.fract() != 0.0 {
                    return Err(format!("integer bound {} is not a whole number", bound));
                }
            }
        }

        Ok(ty)
    }

    /// Parse raw JSON text supplied by a client.
    ///
    /// `Ok(None)` means the attribute is to be cleared (`null`).
    pub fn parse_raw(&self, raw: &str) -> Result<Option<Value>, String> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| format!("value is not valid JSON: {}", e))?;
        if value.is_null() {
            return Ok(None);
        }
        self.check(&value)?;
        Ok(Some(value))
    }

    /// Check a JSON value against this type and its constraints.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::String { max_length, one_of } => {
                let s = value.as_str().ok_or_else(|| self.expected(value))?;
                if let Some(max) = max_length {
                    let len = s.chars().count();
                    if len > *max {
                        return Err(format!(
                            "string of length {} exceeds max_length {}",
                            len, max
                        ));
                    }
                }
                if let Some(options) = one_of {
                    if !options.iter().any(|o| o == s) {
                        return Err(format!("'{}' is not one of [{}]", s, options.join(", ")));
                    }
                }
                Ok(())
            }
            Self::Number { min, max } => {
                let n = value.as_f64().ok_or_else(|| self.expected(value))?;
                check_bounds(n, *min, *max)
            }
            Self::Integer { min, max } => {
                let n = value.as_i64().ok_or_else(|| self.expected(value))?;
                check_bounds(n, *min, *max)
            }
            Self::Boolean => value.as_bool().map(|_| ()).ok_or_else(|| self.expected(value)),
            Self::ContentUri => {
                let s = value.as_str().ok_or_else(|| self.expected(value))?;
                url::Url::parse(s)
                    .map(|_| ())
                    .map_err(|e| format!("'{}' is not a valid URI: {}", s, e))
            }
            Self::Date => {
                let s = value.as_str().ok_or_else(|| self.expected(value))?;
                let valid = chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok();
                if valid {
                    Ok(())
                } else {
                    Err(format!("'{}' is not an RFC 3339 timestamp or YYYY-MM-DD date", s))
                }
            }
            Self::StringList => match value.as_array() {
                Some(items) if items.iter().all(Value::is_string) => Ok(()),
                _ => Err(self.expected(value)),
            },
            Self::NumberList => match value.as_array() {
                Some(items) if items.iter().all(Value::is_number) => Ok(()),
                _ => Err(self.expected(value)),
            },
            Self::Json => Ok(()),
        }
    }

    /// Whether values of this type can be ordered against `literal`.
    pub fn orderable_with(&self, literal: &Value) -> bool {
        match self {
            Self::Number { .. } | Self::Integer { .. } => literal.is_number(),
            Self::String { .. } | Self::Date | Self::ContentUri => literal.is_string(),
            Self::Json => literal.is_number() || literal.is_string(),
            Self::Boolean | Self::StringList | Self::NumberList => false,
        }
    }

    fn expected(&self, value: &Value) -> String {
        format!("expected {}, got {}", self.type_name(), json_kind(value))
    }
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    n: T,
    min: Option<T>,
    max: Option<T>,
) -> Result<(), String> {
    if let Some(min) = min {
        if n < min {
            return Err(format!("{} is below minimum {}", n, min));
        }
    }
    if let Some(max) = max {
        if n > max {
            return Err(format!("{} is above maximum {}", n, max));
        }
    }
    Ok(())
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl std::fmt::Display for AttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

// Callers see the declared type name, e.g. `"content_uri"`.
impl Serialize for AttributeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name())
    }
}

/// Attribute name → declared type, built once per configuration load.
#[derive(Debug, Clone, Default)]
pub struct AttributeTypeRegistry {
    types: HashMap<String, AttributeType>,
    order: Vec<String>,
}

impl AttributeTypeRegistry {
    /// Build the registry from configuration declarations.
    ///
    /// Any malformed or duplicate declaration fails the whole load; every
    /// problem found is reported.
    pub fn load(decls: &[(String, AttributeDeclDto)]) -> StmResult<Self> {
        let mut registry = Self::default();
        let mut errors = Vec::new();

        for (name, decl) in decls {
            if name.trim().is_empty() {
                errors.push("attribute with empty name".to_string());
                continue;
            }
            if registry.types.contains_key(name) {
                errors.push(format!("duplicate attribute '{}'", name));
                continue;
            }
            match AttributeType::from_decl(decl) {
                Ok(ty) => {
                    registry.types.insert(name.clone(), ty);
                    registry.order.push(name.clone());
                }
                Err(e) => errors.push(format!("attribute '{}': {}", name, e)),
            }
        }

        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(StmError::Config(errors.join("; ")))
        }
    }

    pub fn type_of(&self, name: &str) -> StmResult<&AttributeType> {
        self.types
            .get(name)
            .ok_or_else(|| StmError::UnknownAttribute(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Attribute names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shorthand(name: &str, ty: &str) -> (String, AttributeDeclDto) {
        (name.to_string(), AttributeDeclDto::Shorthand(ty.to_string()))
    }

    fn detailed(name: &str, spec: AttributeSpecDto) -> (String, AttributeDeclDto) {
        (name.to_string(), AttributeDeclDto::Detailed(spec))
    }

    #[test]
    fn test_load_and_lookup() {
        let registry = AttributeTypeRegistry::load(&[
            shorthand("name", "string"),
            shorthand("image.png", "content_uri"),
            shorthand("categories", "number[]"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.type_of("image.png").unwrap(), &AttributeType::ContentUri);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["name", "image.png", "categories"]
        );
        assert!(matches!(
            registry.type_of("colour"),
            Err(StmError::UnknownAttribute(_))
        ));
    }

    #[test]
    fn test_duplicate_attribute_fails_load() {
        let err = AttributeTypeRegistry::load(&[
            shorthand("name", "string"),
            shorthand("name", "number"),
        ])
        .unwrap_err();
        match err {
            StmError::Config(msg) => assert!(msg.contains("duplicate attribute 'name'")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_and_misplaced_constraint_reported_together() {
        let err = AttributeTypeRegistry::load(&[
            shorthand("name", "text"),
            detailed(
                "flag",
                AttributeSpecDto {
                    kind: "boolean".into(),
                    min: Some(1.0),
                    ..Default::default()
                },
            ),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown attribute type 'text'"));
        assert!(msg.contains("'min'/'max' do not apply to type 'boolean'"));
    }

    #[test]
    fn test_parse_raw_string_constraints() {
        let ty = AttributeType::String {
            max_length: Some(5),
            one_of: None,
        };
        assert_eq!(ty.parse_raw(r#""hello""#).unwrap(), Some(json!("hello")));
        assert!(ty.parse_raw(r#""hello world""#).is_err());
        assert!(ty.parse_raw("42").is_err());
        assert!(ty.parse_raw("not json").is_err());

        let choice = AttributeType::String {
            max_length: None,
            one_of: Some(vec!["red".into(), "blue".into()]),
        };
        assert!(choice.parse_raw(r#""red""#).is_ok());
        assert!(choice.parse_raw(r#""green""#).is_err());
    }

    #[test]
    fn test_parse_raw_numbers() {
        let price = AttributeType::Number {
            min: Some(0.0),
            max: None,
        };
        assert_eq!(price.parse_raw("12.5").unwrap(), Some(json!(12.5)));
        assert!(price.parse_raw("-1").is_err());

        let edition = AttributeType::Integer {
            min: Some(1),
            max: Some(100),
        };
        assert!(edition.parse_raw("10").is_ok());
        assert!(edition.parse_raw("10.5").is_err());
        assert!(edition.parse_raw("101").is_err());
    }

    #[test]
    fn test_parse_raw_null_clears() {
        for ty in [AttributeType::Boolean, AttributeType::ContentUri, AttributeType::Json] {
            assert_eq!(ty.parse_raw("null").unwrap(), None);
        }
    }

    #[test]
    fn test_content_uri_and_date() {
        assert!(AttributeType::ContentUri
            .parse_raw(r#""https://cdn.example.com/nft_1_image.png""#)
            .is_ok());
        assert!(AttributeType::ContentUri.parse_raw(r#""not a uri""#).is_err());

        assert!(AttributeType::Date.parse_raw(r#""2024-05-01""#).is_ok());
        assert!(AttributeType::Date
            .parse_raw(r#""2024-05-01T10:00:00Z""#)
            .is_ok());
        assert!(AttributeType::Date.parse_raw(r#""yesterday""#).is_err());
    }

    #[test]
    fn test_lists() {
        assert!(AttributeType::NumberList.parse_raw("[1, 2, 3]").is_ok());
        assert!(AttributeType::NumberList.parse_raw(r#"[1, "2"]"#).is_err());
        assert!(AttributeType::StringList.parse_raw(r#"["a", "b"]"#).is_ok());
        assert!(AttributeType::StringList.parse_raw(r#""a""#).is_err());
    }

    #[test]
    fn test_serializes_as_type_name() {
        let json = serde_json::to_value(AttributeType::NumberList).unwrap();
        assert_eq!(json, json!("number[]"));
    }
}
