use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{AccessToken, Role};

const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("unsupported config extension: {0} (use .json, .toml, .yaml or .yml)")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("{feature} support is not compiled in; rebuild with --features {feature}")]
    FeatureDisabled { feature: &'static str },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub finance_store: StoreConfig,
    #[serde(default)]
    pub clinic_store: ClinicStoreConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub notifications: NotifierConfig,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            json_logs: false,
            finance_store: StoreConfig::default(),
            clinic_store: ClinicStoreConfig::default(),
            tokens: Vec::new(),
            notifications: NotifierConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
    #[serde(rename_all = "camelCase")]
    Redis {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Postgres {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_connections: Option<u32>,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClinicStoreConfig {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotifierConfig {
    #[default]
    Log,
    Webhook { url: String },
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Name of an environment variable holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
}

impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_env", &self.token_env)
            .field("role", &self.role)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

impl TokenConfig {
    fn resolve(&self) -> Result<String, ConfigError> {
        let value = match (&self.token, &self.token_env) {
            (Some(token), _) => token.clone(),
            (None, Some(var)) => std::env::var(var).map_err(|_| {
                ConfigError::Invalid(format!("token env var {var} is not set"))
            })?,
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "{} token needs `token` or `tokenEnv`",
                    self.role.as_str()
                )));
            }
        };
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{} token is empty",
                self.role.as_str()
            )));
        }
        Ok(value)
    }
}

impl ServerConfig {
    /// Reads a config file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&raw, &extension).map_err(|err| match err {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn parse(raw: &str, extension: &str) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: PathBuf::new(),
            message,
        };
        match extension {
            "json" => serde_json::from_str(raw).map_err(|err| parse_error(err.to_string())),
            "toml" => toml::from_str(raw).map_err(|err| parse_error(err.to_string())),
            #[cfg(feature = "config-yaml")]
            "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|err| parse_error(err.to_string())),
            #[cfg(not(feature = "config-yaml"))]
            "yaml" | "yml" => Err(ConfigError::FeatureDisabled {
                feature: "config-yaml",
            }),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".to_string()));
        }
        self.access_tokens()?;

        match &self.finance_store {
            StoreConfig::Memory => {}
            StoreConfig::Sqlite { .. } => {
                require_feature("store-sqlite", cfg!(feature = "store-sqlite"))?;
            }
            StoreConfig::Redis { url, .. } => {
                require_feature("store-redis", cfg!(feature = "store-redis"))?;
                require_non_empty("financeStore.url", url)?;
            }
            StoreConfig::Postgres {
                url,
                max_connections,
            } => {
                require_feature("store-postgres", cfg!(feature = "store-postgres"))?;
                require_non_empty("financeStore.url", url)?;
                if *max_connections == Some(0) {
                    return Err(ConfigError::Invalid(
                        "financeStore.maxConnections must be > 0".to_string(),
                    ));
                }
            }
        }
        if let ClinicStoreConfig::Sqlite { .. } = self.clinic_store {
            require_feature("store-sqlite", cfg!(feature = "store-sqlite"))?;
        }
        if let NotifierConfig::Webhook { url } = &self.notifications {
            require_non_empty("notifications.url", url)?;
        }
        Ok(())
    }

    /// Resolves every configured token. Duplicates and doctor or patient
    /// tokens without a subject are rejected.
    pub fn access_tokens(&self) -> Result<Vec<AccessToken>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.tokens.len());
        for entry in &self.tokens {
            let token = entry.resolve()?;
            if !seen.insert(token.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate token for role {}",
                    entry.role.as_str()
                )));
            }
            let subject = entry
                .subject_id
                .as_deref()
                .map(str::trim)
                .filter(|subject| !subject.is_empty());
            let mut access = AccessToken::new(token, entry.role);
            match subject {
                Some(subject) => access = access.with_subject(subject),
                None if entry.role.needs_subject() => {
                    return Err(ConfigError::Invalid(format!(
                        "{} token requires subjectId",
                        entry.role.as_str()
                    )));
                }
                None => {}
            }
            out.push(access);
        }
        Ok(out)
    }
}

fn require_feature(feature: &'static str, enabled: bool) -> Result<(), ConfigError> {
    if enabled {
        Ok(())
    } else {
        Err(ConfigError::FeatureDisabled { feature })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_tagged_stores() {
        let config = ServerConfig::parse(
            r#"
listen = "0.0.0.0:9000"
jsonLogs = true

[financeStore]
kind = "sqlite"
path = "data/ims.sqlite"

[[tokens]]
token = "admin-secret"
role = "admin"

[[tokens]]
token = "doc-secret"
role = "doctor"
subjectId = "doc-1"
"#,
            "toml",
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert!(config.json_logs);
        assert_eq!(
            config.finance_store,
            StoreConfig::Sqlite {
                path: PathBuf::from("data/ims.sqlite")
            }
        );
        assert_eq!(config.clinic_store, ClinicStoreConfig::Memory);
        assert_eq!(config.notifications, NotifierConfig::Log);
        let tokens = config.access_tokens().unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].subject_id.as_deref(), Some("doc-1"));
    }

    #[test]
    fn parses_json_defaults() {
        let config = ServerConfig::parse(
            r#"{"financeStore": {"kind": "redis", "url": "redis://localhost", "prefix": "x"}}"#,
            "json",
        )
        .unwrap();
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(
            config.finance_store,
            StoreConfig::Redis {
                url: "redis://localhost".to_string(),
                prefix: Some("x".to_string())
            }
        );
    }

    #[test]
    fn validate_rejects_bad_tokens() {
        let token = |token: &str, role: Role, subject: Option<&str>| TokenConfig {
            token: Some(token.to_string()),
            token_env: None,
            role,
            subject_id: subject.map(str::to_string),
        };

        let config = ServerConfig {
            tokens: vec![token("same", Role::Admin, None), token("same", Role::Finance, None)],
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServerConfig {
            tokens: vec![token("p", Role::Patient, None)],
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ServerConfig {
            tokens: vec![token("  ", Role::Admin, None)],
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn debug_redacts_token_values() {
        let entry = TokenConfig {
            token: Some("super-secret".to_string()),
            token_env: None,
            role: Role::Admin,
            subject_id: None,
        };
        let rendered = format!("{entry:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            ServerConfig::parse("", "ini"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
