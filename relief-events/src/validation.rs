//! Validation and normalization of inbound reports.

use relief_core::{Location, ValidationError};
use serde_json::{Map, Value};

/// Default body limit for a single report.
pub const DEFAULT_MAX_REPORT_BYTES: usize = 64 * 1024;

/// Default maximum nesting of objects and arrays.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Checks a raw report body and returns its normalized form.
///
/// A valid report is a non-empty JSON object within the size and depth
/// limits. Every string in it is trimmed; a string left blank is rejected.
/// An optional `location` must carry in-range `latitude` and `longitude`.
#[derive(Debug, Clone)]
pub struct ReportValidator {
    max_report_bytes: usize,
    max_depth: usize,
}

impl Default for ReportValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPORT_BYTES)
    }
}

impl ReportValidator {
    pub fn new(max_report_bytes: usize) -> Self {
        Self {
            max_report_bytes,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_report_bytes(&self) -> usize {
        self.max_report_bytes
    }

    pub fn validate(&self, raw: &[u8]) -> Result<Value, ValidationError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ValidationError::EmptyPayload);
        }
        if raw.len() > self.max_report_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: raw.len(),
                limit: self.max_report_bytes,
            });
        }

        let value: Value = serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed {
            reason: e.to_string(),
        })?;

        let object = match value {
            Value::Object(object) => object,
            other => {
                return Err(ValidationError::NotAnObject {
                    found: type_name(&other).to_string(),
                })
            }
        };
        if object.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }

        let normalized = self.normalize_object(object, "", 1)?;
        if let Some(location) = normalized.get("location") {
            check_location(location)?;
        }
        Ok(Value::Object(normalized))
    }

    fn normalize_object(
        &self,
        object: Map<String, Value>,
        path: &str,
        depth: usize,
    ) -> Result<Map<String, Value>, ValidationError> {
        if depth > self.max_depth {
            return Err(ValidationError::TooDeep {
                limit: self.max_depth,
            });
        }
        object
            .into_iter()
            .map(|(key, value)| {
                let field = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                let value = self.normalize_value(value, &field, depth)?;
                Ok((key, value))
            })
            .collect()
    }

    fn normalize_value(
        &self,
        value: Value,
        field: &str,
        depth: usize,
    ) -> Result<Value, ValidationError> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ValidationError::BlankField {
                        field: field.to_string(),
                    });
                }
                Ok(Value::String(trimmed.to_string()))
            }
            Value::Object(object) => Ok(Value::Object(self.normalize_object(
                object,
                field,
                depth + 1,
            )?)),
            Value::Array(items) => {
                if depth + 1 > self.max_depth {
                    return Err(ValidationError::TooDeep {
                        limit: self.max_depth,
                    });
                }
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.normalize_value(item, &format!("{}[{}]", field, i), depth + 1))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            other => Ok(other),
        }
    }
}

fn check_location(location: &Value) -> Result<(), ValidationError> {
    let object = location
        .as_object()
        .ok_or_else(|| ValidationError::invalid("location", "must be an object"))?;
    let coordinate = |name: &str| -> Result<f64, ValidationError> {
        match object.get(name) {
            None => Err(ValidationError::RequiredFieldMissing {
                field: format!("location.{}", name),
            }),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| ValidationError::invalid(format!("location.{}", name), "must be a number")),
        }
    };
    let location = Location::new(coordinate("latitude")?, coordinate("longitude")?);
    location.validate().map_err(|e| match e {
        ValidationError::InvalidValue { field, reason } => ValidationError::InvalidValue {
            field: format!("location.{}", field),
            reason,
        },
        other => other,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn validate(raw: &str) -> Result<Value, ValidationError> {
        ReportValidator::default().validate(raw.as_bytes())
    }

    #[test]
    fn test_valid_report_is_trimmed() {
        let normalized = validate(
            r#"{"need":"  water ","address":"Antakya","location":{"latitude":36.2,"longitude":36.16},"tags":[" urgent "]}"#,
        )
        .unwrap();
        assert_eq!(normalized["need"], "water");
        assert_eq!(normalized["tags"][0], "urgent");
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(validate(""), Err(ValidationError::EmptyPayload));
        assert_eq!(validate("   \n"), Err(ValidationError::EmptyPayload));
        assert_eq!(validate("{}"), Err(ValidationError::EmptyPayload));
    }

    #[test]
    fn test_structure_errors() {
        assert!(matches!(validate("{\"a\":"), Err(ValidationError::Malformed { .. })));
        assert_eq!(
            validate("[1,2]"),
            Err(ValidationError::NotAnObject {
                found: "array".to_string()
            })
        );
    }

    #[test]
    fn test_blank_nested_field_is_named() {
        assert_eq!(
            validate(r#"{"contact":{"name":"   "}}"#),
            Err(ValidationError::BlankField {
                field: "contact.name".to_string()
            })
        );
    }

    #[test]
    fn test_location_checks() {
        assert_eq!(
            validate(r#"{"location":{"latitude":36.2}}"#),
            Err(ValidationError::RequiredFieldMissing {
                field: "location.longitude".to_string()
            })
        );
        assert!(matches!(
            validate(r#"{"location":{"latitude":120,"longitude":30}}"#),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "location.latitude"
        ));
        assert!(matches!(
            validate(r#"{"location":"Hatay"}"#),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_size_limit() {
        let validator = ReportValidator::new(16);
        let err = validator.validate(br#"{"need":"blankets and tents"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_depth_limit() {
        let validator = ReportValidator::default().with_max_depth(2);
        assert!(validator.validate(br#"{"a":{"b":1}}"#).is_ok());
        assert_eq!(
            validator.validate(br#"{"a":{"b":{"c":1}}}"#),
            Err(ValidationError::TooDeep { limit: 2 })
        );
    }

    proptest! {
        #[test]
        fn prop_accepted_reports_have_no_padded_strings(
            fields in proptest::collection::btree_map("[a-z]{1,6}", "[ ]{0,2}[a-z]{1,8}[ ]{0,2}", 1..6),
        ) {
            let raw = serde_json::to_vec(&fields).unwrap();
            let normalized = ReportValidator::default().validate(&raw).unwrap();
            for (key, original) in &fields {
                prop_assert_eq!(normalized[key].as_str(), Some(original.trim()));
            }
        }

        #[test]
        fn prop_non_objects_are_rejected(n in any::<i64>()) {
            let raw = json!(n).to_string();
            let rejected = matches!(
                ReportValidator::default().validate(raw.as_bytes()),
                Err(ValidationError::NotAnObject { .. })
            );
            prop_assert!(rejected);
        }
    }
}
