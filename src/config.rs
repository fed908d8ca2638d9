//! Configuration management for the ReelSafe server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Minio,
    R2,
    S3,
    B2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Upload session tuning
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Lifetime of a session from initialize
    pub session_ttl_secs: i64,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
    /// How long committed/failed sessions keep answering duplicate triggers
    pub terminal_retention_secs: i64,
    /// Request body limit for a single chunk
    pub max_chunk_bytes: usize,
    /// Directory for ephemeral chunk bytes; in-memory when unset
    pub chunk_dir: Option<PathBuf>,
}

impl UploadConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Lifetime of presigned playback references
    pub url_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Minio,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "videos".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
            },
            database: DatabaseConfig {
                url: "sqlite:./reelsafe.db".to_string(),
            },
            upload: UploadConfig::default(),
            playback: PlaybackConfig { url_ttl_secs: 300 },
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            session_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
            terminal_retention_secs: 600,
            max_chunk_bytes: 16 * 1024 * 1024,
            chunk_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let upload_defaults = UploadConfig::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_or("SERVER_PORT", 3000),
            },
            storage: StorageConfig {
                provider: match env::var("S3_PROVIDER").unwrap_or_else(|_| "minio".to_string()).as_str() {
                    "r2" => StorageProvider::R2,
                    "s3" => StorageProvider::S3,
                    "b2" => StorageProvider::B2,
                    _ => StorageProvider::Minio,
                },
                endpoint: env::var("S3_ENDPOINT")?,
                bucket: env::var("S3_BUCKET")?,
                access_key: env::var("S3_ACCESS_KEY")?,
                secret_key: env::var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./reelsafe.db".to_string()),
            },
            upload: UploadConfig {
                session_ttl_secs: parse_or("UPLOAD_SESSION_TTL_SECS", upload_defaults.session_ttl_secs),
                sweep_interval_secs: parse_or("UPLOAD_SWEEP_INTERVAL_SECS", upload_defaults.sweep_interval_secs),
                terminal_retention_secs: parse_or(
                    "UPLOAD_TERMINAL_RETENTION_SECS",
                    upload_defaults.terminal_retention_secs,
                ),
                max_chunk_bytes: parse_or("UPLOAD_MAX_CHUNK_BYTES", upload_defaults.max_chunk_bytes),
                chunk_dir: env::var("UPLOAD_CHUNK_DIR").ok().map(PathBuf::from),
            },
            playback: PlaybackConfig {
                url_ttl_secs: parse_or("PLAYBACK_URL_TTL_SECS", 300),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upload.session_ttl_secs, 86_400);
        assert_eq!(config.upload.sweep_interval(), Duration::from_secs(300));
        assert!(config.upload.chunk_dir.is_none());
        assert_eq!(config.playback.url_ttl_secs, 300);
    }

    #[test]
    fn test_parse_or_falls_back() {
        assert_eq!(parse_or("REELSAFE_TEST_UNSET_VARIABLE", 42u16), 42);
    }
}
