use clap::{Args, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

use solarsis_schema::{Params, ProtocolSchema, RegistryConfig};

use crate::exit::{schema_error, CliResult};
use crate::output::OutputFormat;

pub mod commands;
pub mod decode;
pub mod encode;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Talk to an inverter until interrupted, printing every reply.
    Run(RunArgs),
    /// Build the frame a command would send.
    Encode(EncodeArgs),
    /// Parse a raw reply line for a command.
    Decode(DecodeArgs),
    /// List the commands and routes a protocol document defines.
    Commands(CommandsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Commands(args) => commands::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every command that reads a protocol document.
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Protocol document (JSON).
    pub schema: PathBuf,
    /// Reject command and config keys the loader does not know.
    #[arg(long)]
    pub strict: bool,
}

impl SchemaArgs {
    pub fn load(&self) -> CliResult<ProtocolSchema> {
        load_schema(&self.schema, self.strict)
    }
}

pub fn load_schema(path: &Path, strict: bool) -> CliResult<ProtocolSchema> {
    let config = RegistryConfig {
        strict_mode: strict,
        ..RegistryConfig::default()
    };
    ProtocolSchema::from_file_with_config(path, config)
        .map_err(|err| schema_error(&format!("loading {}", path.display()), err))
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Session document (JSON).
    pub session: PathBuf,
    /// Serial port, overriding the session's.
    #[arg(long, env = "SOLARSIS_PORT")]
    pub port: Option<String>,
    /// Commands or quick commands to queue once the driver starts.
    #[arg(long = "submit", value_name = "PATH")]
    pub submit: Vec<String>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Command path, e.g. `query/QPIGS`.
    pub path: String,
    /// Command parameter as `name=value`; repeatable.
    #[arg(long = "param", short = 'p', value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
    /// Config block to build with instead of the family's.
    #[arg(long)]
    pub config: Option<String>,
}

impl EncodeArgs {
    pub fn params(&self) -> Option<Params> {
        if self.params.is_empty() {
            return None;
        }
        Some(self.params.iter().cloned().collect())
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
    /// Command path the reply belongs to.
    pub path: String,
    /// Reply line; `\r`, `\n`, `\t`, `\\` and `\xNN` escapes are understood.
    pub line: String,
    /// Config block to parse with instead of the family's.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Args, Debug)]
pub struct CommandsArgs {
    #[command(flatten)]
    pub schema: SchemaArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// `name=value`; the value is JSON when it parses as JSON, a string otherwise.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("parameter name missing in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn param_values_prefer_json() {
        assert_eq!(parse_param("mode=2").unwrap(), ("mode".to_string(), json!(2)));
        assert_eq!(parse_param("enable=true").unwrap().1, json!(true));
        assert_eq!(parse_param("phase=ADJ1").unwrap().1, json!("ADJ1"));
        assert_eq!(parse_param("empty=").unwrap().1, json!(""));
    }

    #[test]
    fn param_requires_name_and_separator() {
        assert!(parse_param("mode").is_err());
        assert!(parse_param("=2").is_err());
    }
}
