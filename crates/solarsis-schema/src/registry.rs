use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value;

use crate::builder::{build_frame, BuiltFrame, Params};
use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::model::{CommandDef, Family, FamilyConfig, ResponseFormat};
use crate::validator::validate_document;

const CONFIG_SUFFIX: &str = "_config";

/// A loaded protocol document: command families plus their config blocks.
#[derive(Debug, Clone)]
pub struct ProtocolSchema {
    families: Vec<Family>,
    configs: Vec<FamilyConfig>,
    config: RegistryConfig,
}

impl ProtocolSchema {
    /// Load a document from a JSON string with default config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_json_str_with_config(json, RegistryConfig::default())
    }

    /// Load a document from a JSON string with explicit config.
    pub fn from_json_str_with_config(json: &str, config: RegistryConfig) -> Result<Self> {
        if json.len() > config.max_document_size {
            return Err(SchemaError::LoadFailed(format!(
                "schema document too large ({} bytes, max {})",
                json.len(),
                config.max_document_size
            )));
        }
        let document: Value = serde_json::from_str(json)?;
        Self::from_value_with_config(&document, config)
    }

    /// Load a document from a parsed JSON value with default config.
    pub fn from_value(document: &Value) -> Result<Self> {
        Self::from_value_with_config(document, RegistryConfig::default())
    }

    /// Load a document from a parsed JSON value with explicit config.
    pub fn from_value_with_config(document: &Value, config: RegistryConfig) -> Result<Self> {
        validate_document(document, config.strict_mode)?;

        let Some(entries) = document.as_object() else {
            return Err(SchemaError::Invalid("document must be an object".to_string()));
        };

        let mut families = Vec::new();
        let mut configs = Vec::new();
        let mut command_count = 0usize;

        for (key, value) in entries {
            if key.ends_with(CONFIG_SUFFIX) {
                configs.push(FamilyConfig::from_json(key, value)?);
                continue;
            }

            let Some(commands) = value.as_object() else {
                return Err(SchemaError::Invalid(format!("family '{key}' must be an object")));
            };

            command_count = command_count.saturating_add(commands.len());
            if command_count > config.max_commands {
                return Err(SchemaError::LoadFailed(format!(
                    "command count exceeds configured max ({})",
                    config.max_commands
                )));
            }

            let commands = commands
                .iter()
                .map(|(name, def)| CommandDef::from_json(key, name, def))
                .collect::<Result<Vec<_>>>()?;
            families.push(Family {
                name: key.clone(),
                commands,
            });
        }

        for family in &families {
            let wanted = config_name(&family.name);
            if !configs.iter().any(|c| c.name == wanted) {
                return Err(SchemaError::Invalid(format!(
                    "family '{}' has no '{wanted}' block",
                    family.name
                )));
            }
            if configs
                .iter()
                .any(|c| c.name == wanted && c.response_format == ResponseFormat::HexWords)
            {
                for command in &family.commands {
                    command
                        .response_template()
                        .check_hex_words(&format!("{}/{}", family.name, command.name))?;
                }
            }
        }

        tracing::debug!(
            families = families.len(),
            configs = configs.len(),
            commands = command_count,
            "protocol schema loaded"
        );

        Ok(Self {
            families,
            configs,
            config,
        })
    }

    /// Load a document from disk with default config.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_with_config(path, RegistryConfig::default())
    }

    /// Load a document from disk with explicit config.
    pub fn from_file_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;
        let metadata = file
            .metadata()
            .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
        if !metadata.is_file() {
            return Err(SchemaError::LoadFailed(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if metadata.len() > config.max_document_size as u64 {
            return Err(SchemaError::LoadFailed(format!(
                "schema document too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let read_limit = u64::try_from(config.max_document_size.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        Self::from_json_str_with_config(&content, config)
    }

    /// Families in document order.
    pub fn families(&self) -> &[Family] {
        &self.families
    }

    /// Family by name.
    pub fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Config blocks in document order.
    pub fn configs(&self) -> &[FamilyConfig] {
        &self.configs
    }

    /// Command at `family/command` (leading and trailing `/` ignored).
    pub fn command(&self, path: &str) -> Result<&CommandDef> {
        let normalized = normalize_path(path);
        let (family, name) = normalized
            .split_once('/')
            .ok_or_else(|| SchemaError::UnknownCommand(path.to_string()))?;

        self.family(family)
            .and_then(|f| f.commands.iter().find(|c| c.name == name))
            .ok_or_else(|| SchemaError::UnknownCommand(path.to_string()))
    }

    /// Config block by its full name, e.g. `query_config` or `/query_config`.
    pub fn config(&self, name: &str) -> Result<&FamilyConfig> {
        let normalized = normalize_path(name);
        self.configs
            .iter()
            .find(|c| c.name == normalized)
            .ok_or_else(|| SchemaError::UnknownConfig(name.to_string()))
    }

    /// Config block of a family.
    pub fn config_for(&self, family: &str) -> Result<&FamilyConfig> {
        self.config(&config_name(family))
    }

    /// Command plus the config block to frame it with.
    ///
    /// `config_override` names a config block replacing the family's own.
    pub fn resolve(&self, path: &str, config_override: Option<&str>) -> Result<(&CommandDef, &FamilyConfig)> {
        let command = self.command(path)?;
        let config = match config_override {
            Some(name) => self.config(name)?,
            None => self.config_for(&command.family)?,
        };
        Ok((command, config))
    }

    /// Build the outbound frame for a command.
    ///
    /// `params` wins over `defaults`; with neither, only parameterless
    /// commands encode anything.
    pub fn build(
        &self,
        path: &str,
        params: Option<&Params>,
        defaults: Option<&Params>,
        config_override: Option<&str>,
    ) -> Result<BuiltFrame> {
        let (command, config) = self.resolve(path, config_override)?;
        build_frame(command, config, params.or(defaults))
    }

    /// Route table: `/family`, `/family/command` for visible commands and
    /// `/family/command/cache` for cached visible commands.
    pub fn routes(&self) -> Vec<String> {
        let mut routes = Vec::new();
        for family in &self.families {
            routes.push(format!("/{}", family.name));
            for command in family.commands.iter().filter(|c| !c.hidden) {
                routes.push(format!("/{}/{}", family.name, command.name));
                if command.cache {
                    routes.push(format!("/{}/{}/cache", family.name, command.name));
                }
            }
        }
        routes
    }

    /// Number of commands across all families.
    pub fn command_count(&self) -> usize {
        self.families.iter().map(|f| f.commands.len()).sum()
    }

    /// Loader configuration this schema was built with.
    pub fn registry_config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl FromStr for ProtocolSchema {
    type Err = SchemaError;

    fn from_str(json: &str) -> Result<Self> {
        Self::from_json_str(json)
    }
}

/// Canonical `family/command` form of a path: surrounding `/` removed.
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

fn config_name(family: &str) -> String {
    format!("{family}{CONFIG_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;

    use super::*;
    use crate::fixtures::SAMPLE_SCHEMA;

    fn sample() -> ProtocolSchema {
        ProtocolSchema::from_json_str(SAMPLE_SCHEMA).unwrap()
    }

    #[test]
    fn families_and_commands_keep_document_order() {
        let schema = sample();
        let names: Vec<&str> = schema.families().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["query", "set", "p17"]);

        let query = schema.family("query").unwrap();
        let commands: Vec<&str> = query.commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(commands, ["QPIGS", "QMOD", "QID", "QBMS"]);
    }

    #[test]
    fn command_lookup_normalizes_slashes() {
        let schema = sample();
        assert_eq!(schema.command("/query/QPIGS").unwrap().code, "QPIGS");
        assert_eq!(schema.command("query/QMOD/").unwrap().code, "QMOD");
        assert!(matches!(
            schema.command("query/NOPE"),
            Err(SchemaError::UnknownCommand(_))
        ));
        assert!(matches!(schema.command("query"), Err(SchemaError::UnknownCommand(_))));
    }

    #[test]
    fn resolve_uses_family_config_or_override() {
        let schema = sample();
        let (_, config) = schema.resolve("query/QPIGS", None).unwrap();
        assert_eq!(config.name, "query_config");

        let (_, config) = schema.resolve("query/QPIGS", Some("raw_config")).unwrap();
        assert_eq!(config.name, "raw_config");
        assert!(schema.config("/raw_config").is_ok());

        assert!(matches!(
            schema.resolve("query/QPIGS", Some("missing_config")),
            Err(SchemaError::UnknownConfig(_))
        ));
    }

    #[test]
    fn routes_skip_hidden_and_list_caches() {
        let routes = sample().routes();
        assert!(routes.contains(&"/query".to_string()));
        assert!(routes.contains(&"/query/QPIGS".to_string()));
        assert!(routes.contains(&"/query/QPIGS/cache".to_string()));
        assert!(!routes.contains(&"/query/QMOD/cache".to_string()));
        assert!(!routes.iter().any(|r| r.starts_with("/set/PBATT")));
    }

    #[test]
    fn family_without_config_is_rejected() {
        let document = json!({ "query": { "QPI": { "command": "QPI" } } });
        let err = ProtocolSchema::from_value(&document).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(msg) if msg.contains("query_config")));
    }

    #[test]
    fn hex_word_family_rejects_unreadable_widths() {
        let document = json!({
            "bms": { "QB": { "command": "QB", "response": { "big": 1e20 } } },
            "bms_config": { "response_format": "hex_words" }
        });
        let err = ProtocolSchema::from_value(&document).unwrap_err();
        assert!(matches!(err, SchemaError::Invalid(msg) if msg.contains("bms/QB.big")));

        let fractional = json!({
            "bms": { "QB": { "command": "QB", "response": { "v": 1.5 } } },
            "bms_config": { "response_format": "hex_words" }
        });
        assert!(ProtocolSchema::from_value(&fractional).is_err());

        let fields = json!({
            "bms": { "QB": { "command": "QB", "response": { "v": 1.5 } } },
            "bms_config": {}
        });
        assert!(ProtocolSchema::from_value(&fields).is_ok());
    }

    #[test]
    fn orphan_config_block_is_allowed() {
        let document = json!({ "spare_config": { "start_marker": "" } });
        let schema = ProtocolSchema::from_value(&document).unwrap();
        assert!(schema.families().is_empty());
        assert!(schema.config("spare_config").is_ok());
    }

    #[test]
    fn command_limit_is_enforced() {
        let config = RegistryConfig {
            max_commands: 2,
            ..RegistryConfig::default()
        };
        let err = ProtocolSchema::from_json_str_with_config(SAMPLE_SCHEMA, config).unwrap_err();
        assert!(matches!(err, SchemaError::LoadFailed(_)));
    }

    #[test]
    fn document_size_limit_is_enforced() {
        let config = RegistryConfig {
            max_document_size: 16,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            ProtocolSchema::from_json_str_with_config(SAMPLE_SCHEMA, config),
            Err(SchemaError::LoadFailed(_))
        ));
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            ProtocolSchema::from_json_str("{ nope"),
            Err(SchemaError::InvalidJson(_))
        ));
    }

    #[test]
    fn loads_from_file_and_from_str() {
        let dir = std::env::temp_dir().join(format!("solarsis-schema-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("protocol.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(SAMPLE_SCHEMA.as_bytes())
            .unwrap();

        let schema = ProtocolSchema::from_file(&path).unwrap();
        assert_eq!(schema.command_count(), sample().command_count());

        let parsed: ProtocolSchema = SAMPLE_SCHEMA.parse().unwrap();
        assert_eq!(parsed.families().len(), 3);

        assert!(matches!(
            ProtocolSchema::from_file(&dir.join("missing.json")),
            Err(SchemaError::LoadFailed(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn normalize_path_trims_slashes() {
        assert_eq!(normalize_path("/query/QPIGS/"), "query/QPIGS");
        assert_eq!(normalize_path("query/QPIGS"), "query/QPIGS");
    }
}
