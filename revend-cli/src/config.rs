//! Configuration loading for the migration CLI.
//!
//! One TOML file holds the run settings, the audit naming, the database
//! connection and the entities to migrate. Unknown keys are rejected.

use revend_core::{
    AuditEntitiesConfig, AuditEntityDeclaration, MiddleAuditEntityDeclaration, MigrationSettings,
};
use revend_pg::DbConfig;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevendConfig {
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub audit: AuditEntitiesConfig,
    /// Falls back to `REVEND_DB_*` environment variables when absent.
    pub database: Option<DbConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, rename = "audit_entity")]
    pub audit_entities: Vec<AuditEntityDeclaration>,
    #[serde(default, rename = "middle_entity")]
    pub middle_entities: Vec<MiddleAuditEntityDeclaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or REVEND_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl RevendConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: RevendConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = self.migration.validate() {
            return Err(ConfigError::InvalidValue {
                field: "migration".to_string(),
                reason: e.to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for (index, decl) in self.audit_entities.iter().enumerate() {
            let field = format!("audit_entity[{}]", index);
            require(&field, "name", &decl.name)?;
            require(&field, "id_column", &decl.id_column)?;
            unique(&mut seen, &field, &decl.name)?;
        }
        for (index, decl) in self.middle_entities.iter().enumerate() {
            let field = format!("middle_entity[{}]", index);
            require(&field, "name", &decl.name)?;
            require(&field, "join_column", &decl.join_column)?;
            require(&field, "inverse_join_column", &decl.inverse_join_column)?;
            unique(&mut seen, &field, &decl.name)?;
        }

        if let Some(db) = &self.database {
            if db.fetch_size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "database.fetch_size".to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Database settings from the file, or from the environment.
    pub fn database(&self) -> DbConfig {
        self.database.clone().unwrap_or_else(DbConfig::from_env)
    }
}

fn require(field: &str, attribute: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.{}", field, attribute),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn unique(seen: &mut BTreeSet<String>, field: &str, name: &str) -> Result<(), ConfigError> {
    if !seen.insert(name.to_string()) {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.name", field),
            reason: format!("{} is declared more than once", name),
        });
    }
    Ok(())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("REVEND_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use revend_core::RowLimit;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_full_config_parses() {
        let file = write_config(
            r#"
[migration]
nullify_existing_end_columns = true
debug_logging = false
batch_size = 250
max_rows_converted = -1

[audit]
revision_end_timestamp_enabled = true
revision_info_table = "revinfo"

[database]
host = "db.internal"
dbname = "app"
fetch_size = 1000

[logging]
format = "json"

[[audit_entity]]
name = "customer_aud"
id_column = "id"

[[middle_entity]]
name = "customer_address_aud"
join_column = "customer_id"
inverse_join_column = "address_id"
"#,
        );

        let config = RevendConfig::from_path(file.path()).unwrap();
        config.validate().unwrap();

        assert!(config.migration.nullify_existing_end_columns);
        assert!(!config.migration.debug_logging);
        assert_eq!(config.migration.batch_size, 250);
        assert_eq!(config.migration.max_rows_converted, RowLimit::Unbounded);
        assert!(config.audit.revision_end_timestamp_enabled);
        assert_eq!(config.audit.revision_info_table, "revinfo");
        assert_eq!(config.audit.revision_field_name, "REV");
        assert_eq!(config.logging.format, LogFormat::Json);

        let db = config.database();
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 5432);
        assert_eq!(db.fetch_size, 1000);

        assert_eq!(
            config.audit_entities,
            vec![AuditEntityDeclaration::new("customer_aud", "id")]
        );
        assert_eq!(
            config.middle_entities,
            vec![MiddleAuditEntityDeclaration::new(
                "customer_address_aud",
                "customer_id",
                "address_id"
            )]
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("");
        let config = RevendConfig::from_path(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.migration.batch_size, 100);
        assert!(config.migration.debug_logging);
        assert!(config.audit_entities.is_empty());
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_row_limit_forms() {
        let file = write_config("[migration]\nmax_rows_converted = \"unbounded\"\n");
        let config = RevendConfig::from_path(file.path()).unwrap();
        assert_eq!(config.migration.max_rows_converted, RowLimit::Unbounded);

        let file = write_config("[migration]\nmax_rows_converted = 10\n");
        let config = RevendConfig::from_path(file.path()).unwrap();
        assert_eq!(config.migration.max_rows_converted, RowLimit::from_raw(10).unwrap());

        let file = write_config("[migration]\nmax_rows_converted = 0\n");
        assert!(matches!(
            RevendConfig::from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = write_config("[migration]\nbatchsize = 10\n");
        assert!(matches!(
            RevendConfig::from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));

        let file = write_config("[[audit_entity]]\nname = \"a\"\nid_column = \"id\"\nextra = 1\n");
        assert!(matches!(
            RevendConfig::from_path(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let file = write_config("[migration]\nbatch_size = 0\n");
        let config = RevendConfig::from_path(file.path()).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "migration"
        ));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let file = write_config(
            r#"
[[audit_entity]]
name = "customer_aud"
id_column = "id"

[[audit_entity]]
name = "customer_aud"
id_column = "id"
"#,
        );
        let config = RevendConfig::from_path(file.path()).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "audit_entity[1].name"
        ));
    }

    #[test]
    fn test_empty_key_column_rejected() {
        let file = write_config(
            "[[middle_entity]]\nname = \"a\"\njoin_column = \"x\"\ninverse_join_column = \" \"\n",
        );
        let config = RevendConfig::from_path(file.path()).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. })
                if field == "middle_entity[0].inverse_join_column"
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = RevendConfig::from_path(Path::new("/nonexistent/revend.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
