use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use solarsis_engine::Reply;
use solarsis_schema::{BuiltFrame, ParsedResponse, ProtocolSchema};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EncodedOutput<'a> {
    path: &'a str,
    config: &'a str,
    parameters: &'a str,
    frame: String,
    hex: String,
    size: usize,
    chunks: Vec<String>,
}

pub fn print_encoded(built: &BuiltFrame, format: OutputFormat) {
    let chunks: Vec<String> = built
        .chunks()
        .iter()
        .map(|chunk| chunk.escape_ascii().to_string())
        .collect();

    match format {
        OutputFormat::Json => {
            let out = EncodedOutput {
                path: &built.path,
                config: &built.config,
                parameters: &built.parameters,
                frame: built.frame.escaped(),
                hex: to_hex(built.frame.as_bytes()),
                size: built.frame.wire_size(),
                chunks,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["path", built.path.as_str()])
                .add_row(vec!["config", built.config.as_str()])
                .add_row(vec!["parameters", built.parameters.as_str()])
                .add_row(vec!["frame".to_string(), built.frame.escaped()])
                .add_row(vec!["hex".to_string(), to_hex(built.frame.as_bytes())])
                .add_row(vec!["chunks".to_string(), chunks.join(" | ")]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} ({}) frame={} hex={} size={}",
                built.path,
                built.config,
                built.frame.escaped(),
                to_hex(built.frame.as_bytes()),
                built.frame.wire_size()
            );
            for (index, chunk) in chunks.iter().enumerate() {
                println!("  chunk {index}: {chunk}");
            }
        }
        OutputFormat::Raw => print_raw(built.frame.as_bytes()),
    }
}

#[derive(Serialize)]
struct DecodedOutput<'a> {
    command: &'a str,
    cleaned: &'a str,
    fields: &'a [String],
    merged: &'a Value,
    metrics: &'a str,
}

pub fn print_decoded(command: &str, parsed: &ParsedResponse, format: OutputFormat) {
    let out = DecodedOutput {
        command,
        cleaned: &parsed.cleaned,
        fields: &parsed.fields,
        merged: &parsed.merged,
        metrics: &parsed.metrics,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        other => print_result(&out, other),
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    #[serde(flatten)]
    reply: &'a Reply,
    timestamp: String,
}

pub fn print_reply(reply: &Reply, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ReplyOutput {
            reply,
            timestamp: now_unix_seconds(),
        }),
        other => print_result(
            &DecodedOutput {
                command: &reply.command,
                cleaned: &reply.cleaned,
                fields: &reply.fields,
                merged: &reply.merged,
                metrics: &reply.metrics,
            },
            other,
        ),
    }
}

fn print_result(out: &DecodedOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in flatten(out.merged) {
                table.add_row(vec![key, value]);
            }
            println!("{}", out.command);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{} {}", out.command, out.metrics);
        }
        OutputFormat::Raw => {
            print_raw(out.cleaned.as_bytes());
            print_raw(b"\n");
        }
    }
}

#[derive(Serialize)]
struct CommandRow<'a> {
    family: &'a str,
    command: &'a str,
    code: &'a str,
    variables: Vec<&'a str>,
    checksum: bool,
    sum_checksum: bool,
    cache: bool,
    metrics: bool,
    hidden: bool,
    callback: Option<&'a str>,
}

#[derive(Serialize)]
struct CommandsOutput<'a> {
    commands: Vec<CommandRow<'a>>,
    routes: Vec<String>,
}

pub fn print_commands(schema: &ProtocolSchema, format: OutputFormat) {
    let mut rows = Vec::new();
    for family in schema.families() {
        let config = schema.config_for(&family.name).ok();
        for command in &family.commands {
            rows.push(CommandRow {
                family: &family.name,
                command: &command.name,
                code: &command.code,
                variables: command.variables.iter().map(|(name, _)| name.as_str()).collect(),
                checksum: config.is_some_and(|cfg| command.checksum_enabled(cfg)),
                sum_checksum: command.sum_checksum,
                cache: command.cache,
                metrics: command.metrics,
                hidden: command.hidden,
                callback: command.callback.as_deref(),
            });
        }
    }
    let routes = schema.routes();

    match format {
        OutputFormat::Json => print_json(&CommandsOutput {
            commands: rows,
            routes,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FAMILY", "COMMAND", "CODE", "VARIABLES", "FLAGS"]);
            for row in &rows {
                table.add_row(vec![
                    row.family.to_string(),
                    row.command.to_string(),
                    row.code.to_string(),
                    row.variables.join(","),
                    flags(row),
                ]);
            }
            println!("{table}");
            for route in &routes {
                println!("{route}");
            }
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!("{}/{} code={} {}", row.family, row.command, row.code, flags(row));
            }
            for route in &routes {
                println!("{route}");
            }
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn flags(row: &CommandRow<'_>) -> String {
    let mut flags = Vec::new();
    if row.checksum {
        flags.push("crc16".to_string());
    }
    if row.sum_checksum {
        flags.push("sum".to_string());
    }
    if row.cache {
        flags.push("cache".to_string());
    }
    if row.metrics {
        flags.push("metrics".to_string());
    }
    if row.hidden {
        flags.push("hidden".to_string());
    }
    if let Some(callback) = row.callback {
        flags.push(format!("callback={callback}"));
    }
    flags.join(" ")
}

/// Dotted `key = value` rows for a merged result.
fn flatten(value: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, rows: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let key = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(&key, child, rows);
                }
            }
            Value::String(text) => rows.push((prefix.to_string(), text.clone())),
            other => rows.push((prefix.to_string(), other.to_string())),
        }
    }

    let mut rows = Vec::new();
    walk("", value, &mut rows);
    rows
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hex_is_lowercase_without_separators() {
        assert_eq!(to_hex(b"Q\xb7\r"), "51b70d");
    }

    #[test]
    fn flatten_uses_dotted_keys() {
        let rows = flatten(&json!({ "voltage": 230.1, "battery": { "capacity": 85 }, "mode": "B" }));
        assert_eq!(
            rows,
            vec![
                ("voltage".to_string(), "230.1".to_string()),
                ("battery.capacity".to_string(), "85".to_string()),
                ("mode".to_string(), "B".to_string()),
            ]
        );
    }
}
