use ahash::AHashMap;
use serde_json::{Map, Value};

use crate::types::Direction;

// ---------------------------------------------------------------------------
// FieldMappings
// ---------------------------------------------------------------------------

/// Per-system mapping tables, both oriented `{external_field: internal_field}`.
#[derive(Debug, Clone, Default)]
pub struct FieldMappings {
    pub inbound: AHashMap<String, String>,
    pub outbound: AHashMap<String, String>,
}

impl FieldMappings {
    pub fn new(
        inbound: impl IntoIterator<Item = (String, String)>,
        outbound: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            inbound: inbound.into_iter().collect(),
            outbound: outbound.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// DataTransformer
// ---------------------------------------------------------------------------

/// Projects payloads between the internal and external field namings.
///
/// Mapped fields present in the source are copied under their mapped name;
/// everything else is dropped. Missing fields are not an error here (the
/// validator owns required-field checks). Systems with no configured mappings
/// pass payloads through unchanged.
pub struct DataTransformer {
    mappings: AHashMap<String, FieldMappings>,
}

impl DataTransformer {
    pub fn new(mappings: impl IntoIterator<Item = (String, FieldMappings)>) -> Self {
        Self {
            mappings: mappings.into_iter().collect(),
        }
    }

    /// Map `data` for `system_id` in the given direction.
    ///
    /// Non-object payloads are returned untouched; there are no fields to
    /// project.
    pub fn transform(&self, system_id: &str, data: &Value, direction: Direction) -> Value {
        let Some(tables) = self.mappings.get(system_id) else {
            return data.clone();
        };
        let Some(source) = data.as_object() else {
            return data.clone();
        };

        let table = match direction {
            Direction::In => &tables.inbound,
            Direction::Out => &tables.outbound,
        };

        let mut target = Map::with_capacity(table.len());
        for (external, internal) in table {
            let (from, to) = match direction {
                // inbound: external payload -> internal names
                Direction::In => (external.as_str(), internal.as_str()),
                // outbound: internal payload -> external names
                Direction::Out => (internal.as_str(), external.as_str()),
            };
            if let Some(v) = source.get(from) {
                target.insert(to.to_string(), v.clone());
            }
        }
        Value::Object(target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transformer() -> DataTransformer {
        DataTransformer::new([(
            "crm".to_string(),
            FieldMappings::new(
                [
                    ("evt".to_string(), "event".to_string()),
                    ("who".to_string(), "user".to_string()),
                ],
                [
                    ("evt".to_string(), "event".to_string()),
                    ("who".to_string(), "user".to_string()),
                ],
            ),
        )])
    }

    #[test]
    fn outbound_renames_internal_fields() {
        let t = transformer();
        let out = t.transform(
            "crm",
            &json!({"event": "login", "user": "ada"}),
            Direction::Out,
        );
        assert_eq!(out, json!({"evt": "login", "who": "ada"}));
    }

    #[test]
    fn inbound_renames_external_fields() {
        let t = transformer();
        let inn = t.transform(
            "crm",
            &json!({"evt": "login", "who": "ada"}),
            Direction::In,
        );
        assert_eq!(inn, json!({"event": "login", "user": "ada"}));
    }

    #[test]
    fn unmapped_fields_are_dropped_not_preserved() {
        let t = transformer();
        let out = t.transform(
            "crm",
            &json!({"event": "login", "trace_id": "abc"}),
            Direction::Out,
        );
        assert_eq!(out, json!({"evt": "login"}));
    }

    #[test]
    fn round_trip_restores_only_doubly_mapped_fields() {
        let t = DataTransformer::new([(
            "crm".to_string(),
            FieldMappings::new(
                // inbound knows only `evt`
                [("evt".to_string(), "event".to_string())],
                // outbound knows `evt` and `who`
                [
                    ("evt".to_string(), "event".to_string()),
                    ("who".to_string(), "user".to_string()),
                ],
            ),
        )]);

        let original = json!({"event": "login", "user": "ada", "extra": 1});
        let out = t.transform("crm", &original, Direction::Out);
        let back = t.transform("crm", &out, Direction::In);

        // `user` survived outbound but has no inbound mapping; `extra` was
        // never mapped. Only `event` makes the full trip.
        assert_eq!(back, json!({"event": "login"}));
    }

    #[test]
    fn missing_source_fields_are_skipped() {
        let t = transformer();
        let out = t.transform("crm", &json!({"user": "ada"}), Direction::Out);
        assert_eq!(out, json!({"who": "ada"}));
    }

    #[test]
    fn unknown_system_passes_through() {
        let t = transformer();
        let data = json!({"anything": true});
        assert_eq!(t.transform("nope", &data, Direction::Out), data);
    }

    #[test]
    fn non_object_payloads_pass_through() {
        let t = transformer();
        assert_eq!(t.transform("crm", &json!(42), Direction::Out), json!(42));
    }
}
