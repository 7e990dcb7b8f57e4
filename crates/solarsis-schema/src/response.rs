//! Reply parsing: strip markers, split fields, merge into the template.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{
    hex_word_bytes, CommandDef, FamilyConfig, FieldRule, ResponseFormat, ResponseTemplate, TemplateNode,
};
use crate::value::{decode_field, number_value, value_text};

/// A parsed reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResponse {
    /// Reply text with markers, header and checksum removed.
    pub cleaned: String,
    /// Raw fields after splitting.
    pub fields: Vec<String>,
    /// Structured result following the response template.
    pub merged: Value,
    /// Flattened `key=value,...` form of `merged`.
    pub metrics: String,
}

/// Parse a received line for `command` under `config`.
pub fn parse_response(line: &[u8], command: &CommandDef, config: &FamilyConfig) -> ParsedResponse {
    let cleaned = clean_response(line, config);
    let fields = split_fields(&cleaned, config);
    let template = command.response_template();

    let merged = match config.response_format {
        ResponseFormat::Fields => merge_fields(&template, &fields),
        ResponseFormat::HexWords => {
            let data = if config.reply_separator().is_empty() {
                cleaned.as_str()
            } else {
                fields.first().map(String::as_str).unwrap_or_default()
            };
            merge_hex_words(&template, data, config.legacy_signed_offset)
        }
    };
    let metrics = metric_string(&merged);

    ParsedResponse {
        cleaned,
        fields,
        merged,
        metrics,
    }
}

/// Strip everything up to the response-start marker, the trailing checksum
/// bytes and, for replies longer than one byte, the fixed header.
///
/// The cut is made one byte past where the marker begins, so only the first
/// byte of a multi-byte marker is removed and the header length has to cover
/// the rest. Without a response-start marker the first byte is dropped; when
/// the marker is configured but missing nothing is dropped from the front.
pub fn clean_response(line: &[u8], config: &FamilyConfig) -> String {
    let start = match config.response_start.as_deref() {
        None | Some("") => 1,
        Some(marker) => find(line, marker.as_bytes()).map_or(0, |pos| pos + 1),
    };
    let end = line.len().saturating_sub(config.checksum_length);
    if end <= start {
        return String::new();
    }

    let mut body = &line[start..end];
    if body.len() > 1 {
        body = &body[config.header_length.min(body.len())..];
    }
    String::from_utf8_lossy(body).trim().to_string()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Split a cleaned reply into raw fields.
///
/// Uses the response separator, falling back to the field separator; an
/// empty separator yields one field per character.
pub fn split_fields(cleaned: &str, config: &FamilyConfig) -> Vec<String> {
    let separator = config.reply_separator();
    if separator.is_empty() {
        cleaned.chars().map(String::from).collect()
    } else {
        cleaned.split(separator).map(str::to_string).collect()
    }
}

fn merge_fields(template: &ResponseTemplate, fields: &[String]) -> Value {
    let mut cursor = 0usize;
    let mut decoded = Map::new();
    Value::Object(merge_nodes(template.nodes(), fields, &mut cursor, &mut decoded))
}

fn merge_nodes(
    nodes: &[TemplateNode],
    fields: &[String],
    cursor: &mut usize,
    decoded: &mut Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for node in nodes {
        match node {
            TemplateNode::Field { key, rule } => {
                let raw = fields.get(*cursor).map(String::as_str);
                *cursor += 1;
                if let Some(value) = decode_field(raw, rule, decoded) {
                    decoded.insert(key.clone(), value.clone());
                    out.insert(key.clone(), value);
                }
            }
            TemplateNode::Group { key, children } => {
                let group = merge_nodes(children, fields, cursor, decoded);
                out.insert(key.clone(), Value::Object(group));
            }
        }
    }
    out
}

fn merge_hex_words(template: &ResponseTemplate, data: &str, legacy_offset: bool) -> Value {
    let mut cursor = 0usize;
    Value::Object(hex_nodes(template.nodes(), data.as_bytes(), &mut cursor, legacy_offset))
}

fn hex_nodes(nodes: &[TemplateNode], data: &[u8], cursor: &mut usize, legacy_offset: bool) -> Map<String, Value> {
    let mut out = Map::new();
    for node in nodes {
        match node {
            TemplateNode::Field {
                key,
                rule: FieldRule::Scale(width),
            } => {
                // Bad widths only reach here through an override config.
                let Some(bytes) = hex_word_bytes(*width) else {
                    continue;
                };
                let digits = bytes * 2;
                let from = (*cursor).min(data.len());
                let to = cursor.saturating_add(digits).min(data.len());
                *cursor = cursor.saturating_add(digits);

                if let Some(word) = parse_hex(&data[from..to]) {
                    let value = if *width < 0.0 {
                        signed(word, bytes, legacy_offset)
                    } else {
                        i128::from(word)
                    };
                    out.insert(key.clone(), number_value(value as f64));
                }
            }
            TemplateNode::Field { .. } => {}
            TemplateNode::Group { key, children } => {
                let group = hex_nodes(children, data, cursor, legacy_offset);
                out.insert(key.clone(), Value::Object(group));
            }
        }
    }
    out
}

fn parse_hex(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || digits.len() > 16 {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    u64::from_str_radix(text, 16).ok()
}

/// Two's-complement reading of a `bytes`-wide word (`bytes` in 1..=8).
fn signed(word: u64, bytes: usize, legacy_offset: bool) -> i128 {
    let bits = (bytes * 8) as u32;
    let word = i128::from(word);
    if word < 1i128 << (bits - 1) {
        return word;
    }
    let offset = if legacy_offset { (1i128 << bits) - 1 } else { 1i128 << bits };
    word - offset
}

/// Flatten a merged result into `key=value,...`.
///
/// Nested keys are joined with `.`; absent fields never appear.
pub fn metric_string(merged: &Value) -> String {
    let mut pairs = Vec::new();
    flatten("", merged, &mut pairs);
    pairs.join(",")
}

fn flatten(prefix: &str, value: &Value, pairs: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, pairs);
            }
        }
        Value::Null => {}
        leaf => pairs.push(format!("{prefix}={}", value_text(leaf))),
    }
}
