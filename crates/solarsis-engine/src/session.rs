//! Deployment settings: link, timing, quick commands and schedules.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use solarsis_frame::FrameConfig;
use solarsis_schema::{Params, ProtocolSchema};
use solarsis_transport::SerialConfig;

use crate::error::{EngineError, Result};

/// Default on-demand queue bound.
pub const DEFAULT_MAX_QUEUED: usize = 64;

const MAX_SESSION_FILE_SIZE: u64 = 1024 * 1024;

/// Session document.
///
/// Every field has a default; the legacy key names are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial device path.
    #[serde(alias = "serial_port")]
    pub port: String,
    #[serde(alias = "serial_baudrate")]
    pub baud_rate: u32,
    /// Reply line delimiter.
    #[serde(alias = "serial_parsers_readline")]
    pub line_delimiter: String,
    /// Scheduler tick in milliseconds.
    #[serde(alias = "serial_queue_delay")]
    pub tick_ms: u64,
    /// Reply timeout in milliseconds before the link is restarted.
    #[serde(alias = "serial_restart_threshold")]
    pub restart_threshold_ms: u64,
    /// Drop queued on-demand commands when the link restarts.
    #[serde(alias = "serial_clear_command_queue_on_restart")]
    pub clear_queue_on_restart: bool,
    /// Port of the embedding application's HTTP surface, if any.
    pub http_port: Option<u16>,
    #[serde(alias = "influxUrl")]
    pub metrics_url: Option<String>,
    /// Prefix of every exported metric line.
    #[serde(alias = "influx_pre_header")]
    pub metrics_prefix: String,
    /// Quick-command names exposed as routes.
    #[serde(alias = "ListenOn")]
    pub listen_on: Vec<String>,
    #[serde(alias = "QuickCommands")]
    pub quick_commands: BTreeMap<String, QuickCommand>,
    #[serde(alias = "OnInit")]
    pub on_init: OnInit,
    #[serde(alias = "IntervalCommands")]
    pub interval_commands: Vec<IntervalCommand>,
    pub max_queued_commands: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 2400,
            line_delimiter: "\r".to_string(),
            tick_ms: 100,
            restart_threshold_ms: 10_000,
            clear_queue_on_restart: false,
            http_port: None,
            metrics_url: None,
            metrics_prefix: String::new(),
            listen_on: Vec::new(),
            quick_commands: BTreeMap::new(),
            on_init: OnInit::default(),
            interval_commands: Vec::new(),
            max_queued_commands: DEFAULT_MAX_QUEUED,
        }
    }
}

/// A named shortcut for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QuickCommandRepr")]
pub struct QuickCommand {
    /// Target `family/command` path.
    pub command: String,
    /// Config block override.
    pub config: Option<String>,
    /// Post-receive callback name.
    pub callback: Option<String>,
    /// Pre-send hook name.
    pub before: Option<String>,
    /// Parameters used when the caller supplies none.
    pub default_value: Option<Params>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuickCommandRepr {
    Path(String),
    Full {
        command: String,
        #[serde(default)]
        config: Option<String>,
        #[serde(default)]
        callback: Option<String>,
        #[serde(default)]
        before: Option<String>,
        #[serde(default)]
        default_value: Option<Params>,
    },
}

impl From<QuickCommandRepr> for QuickCommand {
    fn from(repr: QuickCommandRepr) -> Self {
        match repr {
            QuickCommandRepr::Path(command) => Self {
                command,
                config: None,
                callback: None,
                before: None,
                default_value: None,
            },
            QuickCommandRepr::Full {
                command,
                config,
                callback,
                before,
                default_value,
            } => Self {
                command,
                config,
                callback,
                before,
                default_value,
            },
        }
    }
}

/// Commands to run once when the link first opens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnInit {
    /// Quick-command names or command paths.
    #[serde(alias = "RunCommands")]
    pub run_commands: Vec<String>,
}

/// A periodically scheduled command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalCommand {
    /// Target `family/command` path.
    pub command: String,
    #[serde(default)]
    pub config: Option<String>,
    /// Period in milliseconds.
    pub interval: u64,
    #[serde(default)]
    pub callback: Option<String>,
    /// Repeat cap; 0 is unlimited.
    #[serde(default)]
    pub max: u32,
}

impl SessionConfig {
    /// Parse a session document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        session.validate()?;
        Ok(session)
    }

    /// Load a session document from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)
            .map_err(|err| EngineError::InvalidSession(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_SESSION_FILE_SIZE {
            return Err(EngineError::InvalidSession(format!(
                "session file too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|err| EngineError::InvalidSession(format!("{}: {err}", path.display())))?;
        Self::from_json_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.line_delimiter.is_empty() {
            return Err(EngineError::InvalidSession(
                "line delimiter must not be empty".to_string(),
            ));
        }
        if self.tick_ms == 0 {
            return Err(EngineError::InvalidSession(
                "scheduler tick must be greater than zero".to_string(),
            ));
        }
        if self.restart_threshold_ms == 0 {
            return Err(EngineError::InvalidSession(
                "restart threshold must be greater than zero".to_string(),
            ));
        }
        if self.max_queued_commands == 0 {
            return Err(EngineError::InvalidSession(
                "max_queued_commands must be greater than zero".to_string(),
            ));
        }
        if let Some(entry) = self.interval_commands.iter().find(|e| e.interval == 0) {
            return Err(EngineError::InvalidSession(format!(
                "interval command '{}' needs a non-zero interval",
                entry.command
            )));
        }
        Ok(())
    }

    /// Check every path and config named here against `schema`.
    pub fn check_against(&self, schema: &ProtocolSchema) -> Result<()> {
        for quick in self.quick_commands.values() {
            schema.resolve(&quick.command, quick.config.as_deref())?;
        }
        for entry in &self.interval_commands {
            schema.resolve(&entry.command, entry.config.as_deref())?;
        }
        for name in &self.on_init.run_commands {
            if !self.quick_commands.contains_key(name) {
                schema.command(name)?;
            }
        }
        for name in &self.listen_on {
            if !self.quick_commands.contains_key(name) {
                return Err(EngineError::InvalidSession(format!(
                    "listen_on entry '{name}' is not a quick command"
                )));
            }
        }
        Ok(())
    }

    /// Scheduler tick.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Reply timeout before the link restarts.
    pub fn restart_threshold(&self) -> Duration {
        Duration::from_millis(self.restart_threshold_ms)
    }

    /// Serial settings for this session's port.
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            path: self.port.clone(),
            baud_rate: self.baud_rate,
            ..SerialConfig::default()
        }
    }

    /// Line splitting settings for replies.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            delimiter: Bytes::copy_from_slice(self.line_delimiter.as_bytes()),
            ..FrameConfig::default()
        }
    }

    /// Schema routes plus `/name` for every exposed quick command.
    pub fn routes(&self, schema: &ProtocolSchema) -> Vec<String> {
        let mut routes = schema.routes();
        routes.extend(self.listen_on.iter().map(|name| format!("/{name}")));
        routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_schema;

    const LEGACY: &str = r#"{
        "serial_port": "/dev/ttyS1",
        "serial_baudrate": 2400,
        "serial_parsers_readline": "\r",
        "serial_queue_delay": 200,
        "serial_restart_threshold": 5000,
        "serial_clear_command_queue_on_restart": true,
        "http_port": 3000,
        "influxUrl": "http://localhost:8086/write?db=solar",
        "influx_pre_header": "mpi_",
        "ListenOn": ["battery_percent"],
        "QuickCommands": {
            "battery_percent": {
                "command": "set/PBATT",
                "callback": "after_set",
                "default_value": { "percent": 20 }
            },
            "mode": "query/QMOD"
        },
        "OnInit": { "RunCommands": ["mode"] },
        "IntervalCommands": [
            { "command": "query/QPIGS", "config": "query_config", "interval": 1000, "max": 3 }
        ]
    }"#;

    #[test]
    fn legacy_keys_are_accepted() {
        let session = SessionConfig::from_json_str(LEGACY).unwrap();

        assert_eq!(session.port, "/dev/ttyS1");
        assert_eq!(session.tick(), Duration::from_millis(200));
        assert_eq!(session.restart_threshold(), Duration::from_secs(5));
        assert!(session.clear_queue_on_restart);
        assert_eq!(session.http_port, Some(3000));
        assert_eq!(session.metrics_prefix, "mpi_");
        assert_eq!(session.on_init.run_commands, ["mode"]);
        assert_eq!(session.interval_commands[0].max, 3);
        assert_eq!(session.max_queued_commands, DEFAULT_MAX_QUEUED);
    }

    #[test]
    fn quick_command_may_be_a_bare_path() {
        let session = SessionConfig::from_json_str(LEGACY).unwrap();
        let mode = &session.quick_commands["mode"];
        assert_eq!(mode.command, "query/QMOD");
        assert!(mode.callback.is_none());

        let battery = &session.quick_commands["battery_percent"];
        assert_eq!(battery.callback.as_deref(), Some("after_set"));
        assert_eq!(battery.default_value.as_ref().unwrap()["percent"], 20);
    }

    #[test]
    fn defaults_apply_to_empty_document() {
        let session = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(session, SessionConfig::default());
        assert_eq!(session.serial_config().baud_rate, 2400);
        assert_eq!(session.frame_config().delimiter.as_ref(), b"\r");
    }

    #[test]
    fn invalid_settings_are_rejected() {
        for json in [
            r#"{ "serial_queue_delay": 0 }"#,
            r#"{ "serial_restart_threshold": 0 }"#,
            r#"{ "serial_parsers_readline": "" }"#,
            r#"{ "max_queued_commands": 0 }"#,
            r#"{ "IntervalCommands": [{ "command": "query/QPIGS", "interval": 0 }] }"#,
        ] {
            assert!(
                matches!(SessionConfig::from_json_str(json), Err(EngineError::InvalidSession(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn paths_are_checked_against_schema() {
        let schema = sample_schema();
        let session = SessionConfig::from_json_str(LEGACY).unwrap();
        session.check_against(&schema).unwrap();

        let bad = SessionConfig::from_json_str(
            r#"{ "IntervalCommands": [{ "command": "query/NOPE", "interval": 10 }] }"#,
        )
        .unwrap();
        assert!(matches!(bad.check_against(&schema), Err(EngineError::Schema(_))));

        let bad_listen = SessionConfig::from_json_str(r#"{ "ListenOn": ["ghost"] }"#).unwrap();
        assert!(matches!(
            bad_listen.check_against(&schema),
            Err(EngineError::InvalidSession(_))
        ));
    }

    #[test]
    fn routes_include_exposed_quick_commands() {
        let schema = sample_schema();
        let session = SessionConfig::from_json_str(LEGACY).unwrap();
        let routes = session.routes(&schema);
        assert!(routes.contains(&"/query/QPIGS/cache".to_string()));
        assert_eq!(routes.last().map(String::as_str), Some("/battery_percent"));
    }
}
