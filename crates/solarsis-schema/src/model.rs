//! Typed protocol tree.
//!
//! Converted once from the JSON document; decode-time code never sniffs JSON
//! types again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};

/// How a single command parameter is encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableRule {
    /// Append this literal to the supplied value.
    Literal(String),
    /// Clamp, pad and truncate a numeric value.
    Numeric(NumericRule),
}

/// Fixed-width numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRule {
    /// Encoded width in characters; 0 leaves the value unpadded.
    pub width: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// How one reply field is decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Divide the numeric raw value by the factor (0 means 1).
    Scale(f64),
    /// Pass the raw value through when true, drop it when false.
    Flag(bool),
    /// Substring of an earlier decoded field.
    BackRef(BackRef),
    /// Numeric when the raw value parses as a number, string otherwise.
    Passthrough,
}

/// Substring of an already decoded field, guarded by its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackRef {
    /// Key of the earlier decoded field.
    pub key: String,
    /// Required character length of that field.
    pub expected_len: usize,
    pub start: usize,
    pub end: usize,
}

/// One entry of a reply template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// A leaf consuming exactly one raw field.
    Field { key: String, rule: FieldRule },
    /// A nested object; consumes nothing itself.
    Group {
        key: String,
        children: Vec<TemplateNode>,
    },
}

/// Ordered reply template of a command.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTemplate {
    nodes: Vec<TemplateNode>,
}

impl ResponseTemplate {
    /// Build a template from already typed nodes.
    pub fn new(nodes: Vec<TemplateNode>) -> Self {
        Self { nodes }
    }

    /// Template used for commands that declare no reply: `{"success": 1}`.
    pub fn success() -> Self {
        Self::new(vec![TemplateNode::Field {
            key: "success".to_string(),
            rule: FieldRule::Scale(1.0),
        }])
    }

    /// Convert a JSON template object.
    pub fn from_json(map: &Map<String, Value>) -> Result<Self> {
        Ok(Self::new(parse_nodes(map, "")?))
    }

    /// Top-level nodes in declaration order.
    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Number of raw fields the template consumes.
    pub fn leaf_count(&self) -> usize {
        fn count(nodes: &[TemplateNode]) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    TemplateNode::Field { .. } => 1,
                    TemplateNode::Group { children, .. } => count(children),
                })
                .sum()
        }
        count(&self.nodes)
    }

    /// Reject scale leaves that cannot be read as hex words: the width must
    /// be a whole number of bytes between 1 and 8.
    pub fn check_hex_words(&self, at: &str) -> Result<()> {
        fn walk(nodes: &[TemplateNode], at: &str) -> Result<()> {
            for node in nodes {
                match node {
                    TemplateNode::Field {
                        key,
                        rule: FieldRule::Scale(width),
                    } if hex_word_bytes(*width).is_none() => {
                        return Err(SchemaError::Invalid(format!(
                            "hex word '{at}.{key}' must be a byte width of 1..=8 (negative for signed), got {width}"
                        )));
                    }
                    TemplateNode::Field { .. } => {}
                    TemplateNode::Group { key, children } => walk(children, &format!("{at}.{key}"))?,
                }
            }
            Ok(())
        }
        walk(&self.nodes, at)
    }
}

/// Byte width of a hex-word leaf, `None` unless `|width|` is a whole number
/// in `1..=8`.
pub fn hex_word_bytes(width: f64) -> Option<usize> {
    let bytes = width.abs();
    (bytes.fract() == 0.0 && (1.0..=8.0).contains(&bytes)).then_some(bytes as usize)
}

fn parse_nodes(map: &Map<String, Value>, prefix: &str) -> Result<Vec<TemplateNode>> {
    map.iter()
        .map(|(key, value)| {
            let at = format!("{prefix}{key}");
            let node = match value {
                Value::Number(n) => TemplateNode::Field {
                    key: key.clone(),
                    rule: FieldRule::Scale(n.as_f64().unwrap_or(1.0)),
                },
                Value::Bool(b) => TemplateNode::Field {
                    key: key.clone(),
                    rule: FieldRule::Flag(*b),
                },
                Value::String(_) => TemplateNode::Field {
                    key: key.clone(),
                    rule: FieldRule::Passthrough,
                },
                Value::Array(items) => TemplateNode::Field {
                    key: key.clone(),
                    rule: FieldRule::BackRef(parse_back_ref(items, &at)?),
                },
                Value::Object(children) => TemplateNode::Group {
                    key: key.clone(),
                    children: parse_nodes(children, &format!("{at}."))?,
                },
                Value::Null => {
                    return Err(SchemaError::Invalid(format!(
                        "response field '{at}' must not be null"
                    )))
                }
            };
            Ok(node)
        })
        .collect()
}

fn parse_back_ref(items: &[Value], at: &str) -> Result<BackRef> {
    let [key, expected_len, start, end] = items else {
        return Err(SchemaError::Invalid(format!(
            "back-reference '{at}' needs [key, length, start, end], got {} items",
            items.len()
        )));
    };

    let key = match key {
        Value::String(key) => key.clone(),
        other => {
            return Err(SchemaError::Invalid(format!(
                "back-reference '{at}' key must be a string, got {other}"
            )))
        }
    };

    Ok(BackRef {
        key,
        expected_len: index_of(expected_len, at)?,
        start: index_of(start, at)?,
        end: index_of(end, at)?,
    })
}

/// Lengths and offsets may be written as numbers or numeric strings.
fn index_of(value: &Value, at: &str) -> Result<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            SchemaError::Invalid(format!(
                "back-reference '{at}' expects non-negative integers, got {value}"
            ))
        })
}

impl VariableRule {
    /// Convert a variable rule: a literal string, `[width, min?, max?]` or
    /// `{width, min?, max?}`.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        let invalid = |reason: &str| SchemaError::Invalid(format!("variable '{name}': {reason}"));

        match value {
            Value::String(literal) => Ok(Self::Literal(literal.clone())),
            Value::Array(items) => {
                let width = items
                    .first()
                    .and_then(Value::as_u64)
                    .ok_or_else(|| invalid("width must be a non-negative integer"))?;
                let bound = |idx: usize| match items.get(idx) {
                    None => Ok(None),
                    Some(v) => v
                        .as_f64()
                        .map(Some)
                        .ok_or_else(|| invalid("bounds must be numbers")),
                };
                if items.len() > 3 {
                    return Err(invalid("expected at most [width, min, max]"));
                }
                Ok(Self::Numeric(NumericRule {
                    width: width as usize,
                    min: bound(1)?,
                    max: bound(2)?,
                }))
            }
            Value::Object(map) => {
                let width = map
                    .get("width")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| invalid("width must be a non-negative integer"))?;
                let bound = |key: &str| match map.get(key) {
                    None | Some(Value::Null) => Ok(None),
                    Some(v) => v
                        .as_f64()
                        .map(Some)
                        .ok_or_else(|| invalid("bounds must be numbers")),
                };
                Ok(Self::Numeric(NumericRule {
                    width: width as usize,
                    min: bound("min")?,
                    max: bound("max")?,
                }))
            }
            _ => Err(invalid("expected a literal string or a numeric rule")),
        }
    }
}

/// Reply layout of a family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Separator-delimited fields, one per template leaf.
    #[default]
    Fields,
    /// One hex string; each numeric leaf consumes `2 * |n|` hex digits.
    HexWords,
}

/// Shared framing settings of a family (`<family>_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    /// Block name as written in the document, e.g. `query_config`.
    #[serde(skip)]
    pub name: String,
    #[serde(alias = "start_bit")]
    pub start_marker: String,
    #[serde(alias = "ending_character")]
    pub terminator: String,
    #[serde(alias = "seperator")]
    pub separator: String,
    #[serde(alias = "response_seperator")]
    pub response_separator: Option<String>,
    /// Left-pad string for numeric parameters.
    #[serde(alias = "variable_length_fillout")]
    pub pad: String,
    /// Append the CRC-16 unless a command opts out.
    #[serde(alias = "crc16")]
    pub checksum: bool,
    pub response_start: Option<String>,
    #[serde(alias = "response_header_length")]
    pub header_length: usize,
    #[serde(alias = "crc_length")]
    pub checksum_length: usize,
    pub response_format: ResponseFormat,
    /// Subtract 0xFFFF instead of 0x10000 for negative hex words.
    pub legacy_signed_offset: bool,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            start_marker: String::new(),
            terminator: "\r".to_string(),
            separator: String::new(),
            response_separator: None,
            pad: "0".to_string(),
            checksum: false,
            response_start: None,
            header_length: 0,
            checksum_length: 0,
            response_format: ResponseFormat::Fields,
            legacy_signed_offset: false,
        }
    }
}

impl FamilyConfig {
    /// Convert a config block.
    pub fn from_json(name: &str, value: &Value) -> Result<Self> {
        let mut config: FamilyConfig = serde_json::from_value(value.clone())
            .map_err(|err| SchemaError::Invalid(format!("config '{name}': {err}")))?;
        if config.pad.is_empty() {
            return Err(SchemaError::Invalid(format!(
                "config '{name}': variable_length_fillout must not be empty"
            )));
        }
        config.name = name.to_string();
        Ok(config)
    }

    /// Separator used to split replies; an empty string splits into characters.
    pub fn reply_separator(&self) -> &str {
        match self.response_separator.as_deref() {
            Some(sep) if !sep.is_empty() => sep,
            _ => &self.separator,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(alias = "command")]
    code: String,
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default, alias = "crc16")]
    checksum: Option<bool>,
    #[serde(default)]
    sum_crc: bool,
    #[serde(default)]
    callback: Option<String>,
    #[serde(default)]
    response: Option<Map<String, Value>>,
    #[serde(default)]
    hide: bool,
    #[serde(default)]
    cache: bool,
    #[serde(default, alias = "influx")]
    metrics: bool,
}

/// One command of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDef {
    pub family: String,
    pub name: String,
    /// Raw command code sent after the start marker.
    pub code: String,
    /// Parameter rules in declaration order.
    pub variables: Vec<(String, VariableRule)>,
    /// Per-command CRC override; `None` follows the family config.
    pub checksum: Option<bool>,
    /// Append the byte-sum checksum.
    pub sum_checksum: bool,
    /// Default post-receive callback name.
    pub callback: Option<String>,
    pub response: Option<ResponseTemplate>,
    pub hidden: bool,
    pub cache: bool,
    pub metrics: bool,
}

impl CommandDef {
    /// Convert a command definition.
    pub fn from_json(family: &str, name: &str, value: &Value) -> Result<Self> {
        let at = format!("{family}/{name}");
        let raw: RawCommand = serde_json::from_value(value.clone())
            .map_err(|err| SchemaError::Invalid(format!("command '{at}': {err}")))?;

        let variables = raw
            .variables
            .iter()
            .map(|(var, rule)| Ok((var.clone(), VariableRule::from_json(var, rule)?)))
            .collect::<Result<Vec<_>>>()?;

        let response = raw
            .response
            .as_ref()
            .map(ResponseTemplate::from_json)
            .transpose()
            .map_err(|err| SchemaError::Invalid(format!("command '{at}': {err}")))?;

        Ok(Self {
            family: family.to_string(),
            name: name.to_string(),
            code: raw.code,
            variables,
            checksum: raw.checksum,
            sum_checksum: raw.sum_crc,
            callback: raw.callback,
            response,
            hidden: raw.hide,
            cache: raw.cache,
            metrics: raw.metrics,
        })
    }

    /// Canonical `family/command` path.
    pub fn path(&self) -> String {
        format!("{}/{}", self.family, self.name)
    }

    /// Whether the CRC-16 is appended under `config`.
    pub fn checksum_enabled(&self, config: &FamilyConfig) -> bool {
        self.checksum.unwrap_or(config.checksum)
    }

    /// Declared reply template, or `{"success": 1}`.
    pub fn response_template(&self) -> ResponseTemplate {
        self.response.clone().unwrap_or_else(ResponseTemplate::success)
    }
}

/// A named group of commands sharing one config block.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub name: String,
    pub commands: Vec<CommandDef>,
}
