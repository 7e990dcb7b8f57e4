//! Parameter encoding and reply field decoding.

use serde_json::{Map, Number, Value};

use crate::error::{Result, SchemaError};
use crate::model::{BackRef, FieldRule, NumericRule, VariableRule};

/// Encode one command parameter under its variable rule.
///
/// Numeric rules clamp, stringify, left-pad with `pad` and keep the rightmost
/// `width` characters. Literal rules append the literal to the value text.
pub fn encode_value(name: &str, value: &Value, rule: &VariableRule, pad: &str) -> Result<String> {
    match rule {
        VariableRule::Literal(literal) => Ok(format!("{}{literal}", value_text(value))),
        VariableRule::Numeric(numeric) => {
            let number = coerce_number(value).ok_or_else(|| SchemaError::InvalidParameter {
                name: name.to_string(),
                value: value_text(value),
                reason: "expected a number".to_string(),
            })?;
            Ok(encode_numeric(number, numeric, pad))
        }
    }
}

fn encode_numeric(number: f64, rule: &NumericRule, pad: &str) -> String {
    let mut number = number;
    if let Some(min) = rule.min {
        if number < min {
            number = min;
        }
    }
    if let Some(max) = rule.max {
        if number > max {
            number = max;
        }
    }

    let text = format_number(number);
    if rule.width == 0 {
        return text;
    }

    // Config loading rejects an empty pad; hand-built configs fall back to '0'.
    let pad = if pad.is_empty() { "0" } else { pad };
    let padded: Vec<char> = pad.repeat(rule.width).chars().chain(text.chars()).collect();
    let keep = padded.len().saturating_sub(rule.width);
    padded[keep..].iter().collect()
}

/// Render a number the way the device expects: integral values carry no
/// fractional part.
pub fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

/// JSON number for `number`, integral when possible. Non-finite values map
/// to `null`.
pub fn number_value(number: f64) -> Value {
    if number.is_finite() && number.fract() == 0.0 && number.abs() < 1e15 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map_or(Value::Null, Value::Number)
    }
}

/// Plain text of a JSON value: strings unquoted, numbers via
/// [`format_number`], `null` empty.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) => format_number(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Decode one raw reply field.
///
/// `decoded` holds the leaves decoded so far, keyed by leaf name, for
/// back-references. `None` means the field is absent from the result.
pub fn decode_field(raw: Option<&str>, rule: &FieldRule, decoded: &Map<String, Value>) -> Option<Value> {
    match rule {
        FieldRule::Scale(factor) => {
            let number = parse_number(raw?)?;
            let divisor = if *factor == 0.0 { 1.0 } else { *factor };
            Some(number_value(number / divisor))
        }
        FieldRule::Flag(true) => raw.map(|r| Value::String(r.to_string())),
        FieldRule::Flag(false) => None,
        FieldRule::BackRef(back_ref) => resolve_back_ref(back_ref, decoded),
        FieldRule::Passthrough => {
            let raw = raw?;
            Some(match parse_number(raw) {
                Some(number) => number_value(number),
                None => Value::String(raw.to_string()),
            })
        }
    }
}

fn resolve_back_ref(back_ref: &BackRef, decoded: &Map<String, Value>) -> Option<Value> {
    let source: Vec<char> = value_text(decoded.get(&back_ref.key)?).chars().collect();
    if source.len() != back_ref.expected_len {
        return None;
    }

    let mut start = back_ref.start.min(source.len());
    let mut end = back_ref.end.min(source.len());
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    Some(Value::String(source[start..end].iter().collect()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn numeric(width: usize, min: Option<f64>, max: Option<f64>) -> VariableRule {
        VariableRule::Numeric(NumericRule { width, min, max })
    }

    #[test]
    fn pads_to_width() {
        let rule = numeric(3, Some(0.0), Some(100.0));
        assert_eq!(encode_value("pct", &json!(7), &rule, "0").unwrap(), "007");
        assert_eq!(encode_value("pct", &json!(7), &rule, " ").unwrap(), "  7");
    }

    #[test]
    fn empty_pad_still_fills_width() {
        let rule = numeric(3, Some(0.0), Some(100.0));
        assert_eq!(encode_value("v", &json!(7), &rule, "").unwrap(), "007");
    }

    #[test]
    fn clamps_each_bound_independently() {
        let both = numeric(3, Some(10.0), Some(100.0));
        assert_eq!(encode_value("v", &json!(5), &both, "0").unwrap(), "010");
        assert_eq!(encode_value("v", &json!(250), &both, "0").unwrap(), "100");

        let min_only = numeric(2, Some(1.0), None);
        assert_eq!(encode_value("v", &json!(0), &min_only, "0").unwrap(), "01");
        assert_eq!(encode_value("v", &json!(99), &min_only, "0").unwrap(), "99");

        let max_only = numeric(2, None, Some(50.0));
        assert_eq!(encode_value("v", &json!(75), &max_only, "0").unwrap(), "50");
    }

    #[test]
    fn keeps_rightmost_characters() {
        let rule = numeric(2, None, None);
        assert_eq!(encode_value("v", &json!(1234), &rule, "0").unwrap(), "34");
    }

    #[test]
    fn fractional_values_and_numeric_strings() {
        let rule = numeric(5, None, None);
        assert_eq!(encode_value("v", &json!(48.5), &rule, "0").unwrap(), "048.5");
        assert_eq!(encode_value("v", &json!("12"), &rule, "0").unwrap(), "00012");
        assert_eq!(encode_value("v", &json!(12.0), &rule, "0").unwrap(), "00012");
    }

    #[test]
    fn width_zero_is_unpadded() {
        let rule = numeric(0, None, Some(9.0));
        assert_eq!(encode_value("v", &json!(42), &rule, "0").unwrap(), "9");
    }

    #[test]
    fn literal_appends_to_value() {
        let rule = VariableRule::Literal("A".to_string());
        assert_eq!(encode_value("v", &json!("05"), &rule, "0").unwrap(), "05A");
        assert_eq!(encode_value("v", &json!(3), &rule, "0").unwrap(), "3A");
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let rule = numeric(2, None, None);
        let err = encode_value("mode", &json!("fast"), &rule, "0").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidParameter { ref name, .. } if name == "mode"));
        assert!(encode_value("mode", &json!(""), &rule, "0").is_err());
        assert!(encode_value("mode", &json!(null), &rule, "0").is_err());
    }

    #[test]
    fn encoded_length_is_width_and_value_is_clamped() {
        for width in 1..=4usize {
            let max = 10f64.powi(width as i32) - 1.0;
            let rule = NumericRule {
                width,
                min: Some(0.0),
                max: Some(max),
            };
            for value in [-50i64, -1, 0, 1, 7, 42, 999, 1_000, 123_456] {
                let encoded = encode_numeric(value as f64, &rule, "0");
                assert_eq!(encoded.chars().count(), width, "value {value} width {width}");
                let expected = (value as f64).clamp(0.0, max);
                assert_eq!(encoded.parse::<f64>().unwrap(), expected);
            }
        }
    }

    #[test]
    fn format_number_drops_integral_fraction() {
        assert_eq!(format_number(25.0), "25");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(number_value(25.0), json!(25));
        assert_eq!(number_value(23.05), json!(23.05));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn scale_divides_and_absent_on_non_numeric() {
        let decoded = Map::new();
        assert_eq!(decode_field(Some("250"), &FieldRule::Scale(10.0), &decoded), Some(json!(25)));
        assert_eq!(decode_field(Some("2305"), &FieldRule::Scale(10.0), &decoded), Some(json!(230.5)));
        assert_eq!(decode_field(Some("0500"), &FieldRule::Scale(1.0), &decoded), Some(json!(500)));
        assert_eq!(decode_field(Some("7"), &FieldRule::Scale(0.0), &decoded), Some(json!(7)));
        assert_eq!(decode_field(Some("abc"), &FieldRule::Scale(1.0), &decoded), None);
        assert_eq!(decode_field(None, &FieldRule::Scale(1.0), &decoded), None);
    }

    #[test]
    fn flag_passes_raw_or_drops() {
        let decoded = Map::new();
        assert_eq!(decode_field(Some("1"), &FieldRule::Flag(true), &decoded), Some(json!("1")));
        assert_eq!(decode_field(Some("1"), &FieldRule::Flag(false), &decoded), None);
    }

    #[test]
    fn passthrough_prefers_numbers() {
        let decoded = Map::new();
        assert_eq!(decode_field(Some("abc"), &FieldRule::Passthrough, &decoded), Some(json!("abc")));
        assert_eq!(decode_field(Some("012"), &FieldRule::Passthrough, &decoded), Some(json!(12)));
        assert_eq!(decode_field(Some(""), &FieldRule::Passthrough, &decoded), Some(json!("")));
        assert_eq!(decode_field(None, &FieldRule::Passthrough, &decoded), None);
    }

    #[test]
    fn back_ref_requires_expected_length() {
        let mut decoded = Map::new();
        decoded.insert("serial".to_string(), json!("92931701100123"));
        decoded.insert("short".to_string(), json!("123"));

        let tail = FieldRule::BackRef(BackRef {
            key: "serial".to_string(),
            expected_len: 14,
            start: 10,
            end: 14,
        });
        assert_eq!(decode_field(None, &tail, &decoded), Some(json!("0123")));

        let wrong_len = FieldRule::BackRef(BackRef {
            key: "short".to_string(),
            expected_len: 14,
            start: 0,
            end: 2,
        });
        assert_eq!(decode_field(Some("x"), &wrong_len, &decoded), None);

        let missing = FieldRule::BackRef(BackRef {
            key: "nope".to_string(),
            expected_len: 3,
            start: 0,
            end: 2,
        });
        assert_eq!(decode_field(Some("x"), &missing, &decoded), None);
    }

    #[test]
    fn back_ref_offsets_clamp_and_swap() {
        let mut decoded = Map::new();
        decoded.insert("code".to_string(), json!(12345));

        let swapped = FieldRule::BackRef(BackRef {
            key: "code".to_string(),
            expected_len: 5,
            start: 3,
            end: 1,
        });
        assert_eq!(decode_field(None, &swapped, &decoded), Some(json!("23")));

        let past_end = FieldRule::BackRef(BackRef {
            key: "code".to_string(),
            expected_len: 5,
            start: 2,
            end: 99,
        });
        assert_eq!(decode_field(None, &past_end, &decoded), Some(json!("345")));
    }
}
