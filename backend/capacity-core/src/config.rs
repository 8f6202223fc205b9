// src/config.rs
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::error::CapacityError;
use crate::ingest::ColumnAliases;
use crate::snapshot::{SourcePaths, SourceStore};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment configuration error: {0}")]
    Env(#[from] envy::Error),
    #[error("CSV_DELIMITER must be a single ASCII character or 'tab', got '{0}'")]
    InvalidDelimiter(String),
    #[error("Column aliases could not be loaded: {0}")]
    Aliases(#[from] CapacityError),
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8000
}

fn default_availability_file() -> PathBuf {
    PathBuf::from("data/availability.csv")
}

fn default_production_file() -> PathBuf {
    PathBuf::from("data/production.csv")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploaded")
}

fn default_csv_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server Configuration
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    // Source Exports
    #[serde(default = "default_availability_file")]
    pub availability_file: PathBuf,
    #[serde(default = "default_production_file")]
    pub production_file: PathBuf,
    pub departments_file: Option<PathBuf>,
    pub display_names_file: Option<PathBuf>,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    // Parsing
    pub column_aliases_file: Option<PathBuf>,
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Ok(envy::from_env::<Config>()?)
    }

    pub fn delimiter(&self) -> Result<u8, ConfigError> {
        let raw = self.csv_delimiter.as_str();
        if raw.eq_ignore_ascii_case("tab") || raw == "\\t" {
            return Ok(b'\t');
        }
        match raw.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(ConfigError::InvalidDelimiter(raw.to_string())),
        }
    }

    pub fn column_aliases(&self) -> Result<ColumnAliases, ConfigError> {
        match &self.column_aliases_file {
            Some(path) => Ok(ColumnAliases::from_file(path)?),
            None => Ok(ColumnAliases::default()),
        }
    }

    pub fn source_paths(&self) -> SourcePaths {
        SourcePaths {
            availability: Some(self.availability_file.clone()),
            production: Some(self.production_file.clone()),
            departments: self.departments_file.clone(),
            display_names: self.display_names_file.clone(),
            upload_dir: self.upload_dir.clone(),
        }
    }

    pub fn source_store(&self) -> Result<SourceStore, ConfigError> {
        let store = SourceStore::new(self.source_paths(), self.column_aliases()?, self.delimiter()?);
        info!(
            "Sources: availability={}, production={}, uploads in {}",
            self.availability_file.display(),
            self.production_file.display(),
            self.upload_dir.display()
        );
        Ok(store)
    }

    /// Certificate and key, when both are configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        envy::from_iter::<_, Config>(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn defaults_apply_for_empty_environment() {
        let config = config_from(&[]);
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.upload_dir, PathBuf::from("uploaded"));
        assert_eq!(config.delimiter().unwrap(), b',');
        assert!(config.tls_paths().is_none());
        assert!(config.departments_file.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_from(&[
            ("SERVER_PORT", "9100"),
            ("PRODUCTION_FILE", "/srv/exports/zlecenia.csv"),
            ("DEPARTMENTS_FILE", "/srv/exports/dzialy.csv"),
            ("CSV_DELIMITER", ";"),
            ("CERT_PATH", "cert.pem"),
            ("KEY_PATH", "key.pem"),
        ]);
        assert_eq!(config.server_port, 9100);
        assert_eq!(config.delimiter().unwrap(), b';');
        let paths = config.source_paths();
        assert_eq!(paths.production, Some(PathBuf::from("/srv/exports/zlecenia.csv")));
        assert_eq!(paths.departments, Some(PathBuf::from("/srv/exports/dzialy.csv")));
        assert!(paths.display_names.is_none());
        assert_eq!(
            config.tls_paths(),
            Some((PathBuf::from("cert.pem"), PathBuf::from("key.pem")))
        );
    }

    #[test]
    fn delimiter_must_be_one_ascii_character() {
        assert_eq!(config_from(&[("CSV_DELIMITER", "tab")]).delimiter().unwrap(), b'\t');
        assert!(matches!(
            config_from(&[("CSV_DELIMITER", ";;")]).delimiter(),
            Err(ConfigError::InvalidDelimiter(_))
        ));
        assert!(config_from(&[("CSV_DELIMITER", "§")]).delimiter().is_err());
    }

    #[test]
    fn tls_requires_both_paths() {
        assert!(config_from(&[("CERT_PATH", "cert.pem")]).tls_paths().is_none());
    }
}
