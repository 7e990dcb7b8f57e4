use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Structural contract for protocol documents (JSON Schema 2020-12).
///
/// Keys ending in `_config` are config blocks; every other top-level key is a
/// family mapping command names to command definitions.
const DOCUMENT_SCHEMA: &str = r##"{
    "$schema": "https://json-schema.org/draft/2020-12/schema",
    "type": "object",
    "patternProperties": {
        "_config$": { "$ref": "#/$defs/config" }
    },
    "additionalProperties": {
        "type": "object",
        "additionalProperties": { "$ref": "#/$defs/command" }
    },
    "$defs": {
        "command": {
            "type": "object",
            "anyOf": [
                { "required": ["command"] },
                { "required": ["code"] }
            ],
            "properties": {
                "command": { "type": "string" },
                "code": { "type": "string" },
                "variables": {
                    "type": "object",
                    "additionalProperties": { "$ref": "#/$defs/variable" }
                },
                "crc16": { "type": "boolean" },
                "checksum": { "type": "boolean" },
                "sum_crc": { "type": "boolean" },
                "callback": { "type": "string" },
                "response": { "type": "object" },
                "hide": { "type": "boolean" },
                "cache": { "type": "boolean" },
                "influx": { "type": "boolean" },
                "metrics": { "type": "boolean" }
            }
        },
        "variable": {
            "oneOf": [
                { "type": "string" },
                {
                    "type": "array",
                    "minItems": 1,
                    "maxItems": 3,
                    "prefixItems": [{ "type": "integer", "minimum": 0 }],
                    "items": { "type": "number" }
                },
                {
                    "type": "object",
                    "required": ["width"],
                    "properties": {
                        "width": { "type": "integer", "minimum": 0 },
                        "min": { "type": "number" },
                        "max": { "type": "number" }
                    },
                    "additionalProperties": false
                }
            ]
        },
        "config": {
            "type": "object",
            "properties": {
                "start_bit": { "type": "string" },
                "start_marker": { "type": "string" },
                "ending_character": { "type": "string" },
                "terminator": { "type": "string" },
                "seperator": { "type": "string" },
                "separator": { "type": "string" },
                "response_seperator": { "type": "string" },
                "response_separator": { "type": "string" },
                "variable_length_fillout": { "type": "string", "minLength": 1 },
                "pad": { "type": "string", "minLength": 1 },
                "crc16": { "type": "boolean" },
                "checksum": { "type": "boolean" },
                "response_start": { "type": "string" },
                "response_header_length": { "type": "integer", "minimum": 0 },
                "header_length": { "type": "integer", "minimum": 0 },
                "crc_length": { "type": "integer", "minimum": 0 },
                "checksum_length": { "type": "integer", "minimum": 0 },
                "response_format": { "enum": ["fields", "hex_words"] },
                "legacy_signed_offset": { "type": "boolean" }
            }
        }
    }
}"##;

static PERMISSIVE: OnceLock<std::result::Result<Validator, String>> = OnceLock::new();
static STRICT: OnceLock<std::result::Result<Validator, String>> = OnceLock::new();

/// Check a protocol document against the structural contract.
pub fn validate_document(document: &Value, strict: bool) -> Result<()> {
    let slot = if strict { &STRICT } else { &PERMISSIVE };
    let validator = slot
        .get_or_init(|| compile(strict))
        .as_ref()
        .map_err(|err| SchemaError::Invalid(format!("document contract: {err}")))?;

    let mut errors = validator.iter_errors(document);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::Invalid(message));
    }

    Ok(())
}

fn compile(strict: bool) -> std::result::Result<Validator, String> {
    let mut schema: Value = serde_json::from_str(DOCUMENT_SCHEMA).map_err(|e| e.to_string())?;
    if strict {
        apply_strict_mode(&mut schema);
    }
    jsonschema::validator_for(&schema).map_err(|err| err.to_string())
}

fn apply_strict_mode(schema: &mut Value) {
    for def in ["command", "config"] {
        if let Some(Value::Object(map)) = schema.pointer_mut(&format!("/$defs/{def}")) {
            map.insert("additionalProperties".to_string(), Value::Bool(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_minimal_document() {
        let doc = json!({
            "query": { "QMOD": { "command": "QMOD" } },
            "query_config": { "ending_character": "\r" }
        });
        assert!(validate_document(&doc, false).is_ok());
        assert!(validate_document(&doc, true).is_ok());
    }

    #[test]
    fn accepts_all_variable_rule_forms() {
        let doc = json!({
            "set": {
                "POP": {
                    "command": "POP",
                    "variables": {
                        "mode": [2, 0, 2],
                        "width_only": [3],
                        "object": { "width": 3, "min": 0, "max": 100 },
                        "phase": "ADJ1"
                    }
                }
            },
            "set_config": {}
        });
        assert!(validate_document(&doc, false).is_ok());
    }

    #[test]
    fn rejects_command_without_code() {
        let doc = json!({ "query": { "QMOD": { "cache": true } } });
        assert!(matches!(
            validate_document(&doc, false),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_wrongly_typed_fields() {
        let doc = json!({
            "query": { "QMOD": { "command": "QMOD", "cache": "yes" } },
            "query_config": { "crc_length": -1 }
        });
        let err = validate_document(&doc, false).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(_)));
    }

    #[test]
    fn rejects_empty_pad() {
        let doc = json!({ "set_config": { "variable_length_fillout": "" } });
        assert!(matches!(
            validate_document(&doc, false),
            Err(SchemaError::Invalid(_))
        ));

        let doc = json!({ "set_config": { "pad": "" } });
        assert!(validate_document(&doc, true).is_err());
    }

    #[test]
    fn rejects_malformed_variable_rule() {
        let doc = json!({
            "set": { "POP": { "command": "POP", "variables": { "mode": [2, 0, 2, 9] } } }
        });
        assert!(validate_document(&doc, false).is_err());

        let doc = json!({
            "set": { "POP": { "command": "POP", "variables": { "mode": { "min": 1 } } } }
        });
        assert!(validate_document(&doc, false).is_err());
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let doc = json!({
            "query": { "QMOD": { "command": "QMOD", "colour": "blue" } },
            "query_config": {}
        });
        assert!(validate_document(&doc, false).is_ok());
        assert!(matches!(
            validate_document(&doc, true),
            Err(SchemaError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_response_format() {
        let doc = json!({ "bms_config": { "response_format": "binary" } });
        assert!(validate_document(&doc, false).is_err());
    }
}
