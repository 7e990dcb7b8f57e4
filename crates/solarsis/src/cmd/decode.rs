use solarsis_schema::{normalize_path, parse_response};

use crate::cmd::DecodeArgs;
use crate::exit::{schema_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_decoded, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let schema = args.schema.load()?;
    let (command, config) = schema
        .resolve(&args.path, args.config.as_deref())
        .map_err(|err| schema_error("decode failed", err))?;

    let line = unescape(&args.line)?;
    let parsed = parse_response(&line, command, config);
    print_decoded(&normalize_path(&args.path), &parsed, format);
    Ok(SUCCESS)
}

/// Undo the escapes `Frame::escaped` produces so replies can be pasted back.
fn unescape(text: &str) -> CliResult<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'r' => out.push(b'\r'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'x' => {
                let hex = text.get(i + 2..i + 4).ok_or_else(|| bad_escape(text))?;
                let byte = u8::from_str_radix(hex, 16).map_err(|_| bad_escape(text))?;
                out.push(byte);
                i += 4;
                continue;
            }
            _ => return Err(bad_escape(text)),
        }
        i += 2;
    }
    Ok(out)
}

fn bad_escape(text: &str) -> CliError {
    CliError::new(USAGE, format!("invalid escape sequence in '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_reverses_ascii_escaping() {
        let raw = b"(B\xe7\xc9\r";
        let escaped = raw.escape_ascii().to_string();
        assert_eq!(unescape(&escaped).unwrap(), raw);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(unescape("(230.0 50.0").unwrap(), b"(230.0 50.0");
        assert_eq!(unescape("trailing\\").unwrap(), b"trailing\\");
    }

    #[test]
    fn malformed_escapes_are_usage_errors() {
        assert_eq!(unescape("\\q").unwrap_err().code, USAGE);
        assert_eq!(unescape("\\xZZ").unwrap_err().code, USAGE);
        assert_eq!(unescape("\\x4").unwrap_err().code, USAGE);
    }
}
