use ahash::AHashMap;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("no schema registered for system `{system_id}`")]
    NoSchema { system_id: String },

    #[error("schema for system `{system_id}` is not a valid JSON Schema: {detail}")]
    BadSchema { system_id: String, detail: String },

    #[error("message rejected at `{pointer}`: {detail}")]
    Invalid { pointer: String, detail: String },
}

pub type Result<T> = std::result::Result<T, ValidateError>;

// ---------------------------------------------------------------------------
// MessageValidator
// ---------------------------------------------------------------------------

/// Structural message validation against per-system JSON Schemas.
///
/// Schemas are compiled once at construction and immutable for the process
/// lifetime. A failed validation is terminal for that send attempt: the
/// orchestrator never retries it, since resubmitting the same shape can
/// never succeed.
pub struct MessageValidator {
    validators: AHashMap<String, jsonschema::Validator>,
}

impl MessageValidator {
    /// Compile one validator per `(system_id, schema)` pair.
    pub fn new<'a>(schemas: impl IntoIterator<Item = (String, &'a Value)>) -> Result<Self> {
        let mut validators = AHashMap::new();
        for (system_id, schema) in schemas {
            let validator =
                jsonschema::validator_for(schema).map_err(|e| ValidateError::BadSchema {
                    system_id: system_id.clone(),
                    detail: e.to_string(),
                })?;
            validators.insert(system_id, validator);
        }
        Ok(Self { validators })
    }

    pub fn has_schema(&self, system_id: &str) -> bool {
        self.validators.contains_key(system_id)
    }

    /// Check `message` against the system's schema, reporting the first
    /// violation with its JSON pointer.
    pub fn validate(&self, system_id: &str, message: &Value) -> Result<()> {
        let validator = self
            .validators
            .get(system_id)
            .ok_or_else(|| ValidateError::NoSchema {
                system_id: system_id.to_string(),
            })?;

        match validator.validate(message) {
            Ok(()) => Ok(()),
            Err(err) => Err(ValidateError::Invalid {
                pointer: err.instance_path.to_string(),
                detail: err.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> MessageValidator {
        let schema = json!({
            "type": "object",
            "required": ["event", "user"],
            "properties": {
                "event": { "type": "string" },
                "user": { "type": "string" },
                "count": { "type": "integer", "minimum": 0 }
            }
        });
        MessageValidator::new([("crm".to_string(), &schema)]).unwrap()
    }

    #[test]
    fn accepts_conforming_message() {
        let v = validator();
        assert!(v
            .validate("crm", &json!({"event": "login", "user": "ada"}))
            .is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let v = validator();
        let err = v.validate("crm", &json!({"event": "login"})).unwrap_err();
        assert!(matches!(err, ValidateError::Invalid { .. }));
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn rejects_wrong_type_with_pointer() {
        let v = validator();
        let err = v
            .validate("crm", &json!({"event": "login", "user": "ada", "count": -3}))
            .unwrap_err();
        match err {
            ValidateError::Invalid { pointer, .. } => assert_eq!(pointer, "/count"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_system_is_no_schema() {
        let v = validator();
        let err = v.validate("erp", &json!({})).unwrap_err();
        assert!(matches!(err, ValidateError::NoSchema { .. }));
        assert!(!v.has_schema("erp"));
        assert!(v.has_schema("crm"));
    }

    #[test]
    fn invalid_schema_fails_at_construction() {
        let bad = json!({"type": "not-a-type"});
        let result = MessageValidator::new([("crm".to_string(), &bad)]);
        assert!(matches!(result, Err(ValidateError::BadSchema { .. })));
    }
}
