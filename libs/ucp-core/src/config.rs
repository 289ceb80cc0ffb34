use std::path::PathBuf;

use clap::{crate_authors, crate_description, crate_version, Parser};
use serde::Deserialize;

use crate::telemetry::LogFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// CLI flags. Every flag also reads from an env var (teacher's
/// `#[arg(..., env)]` convention) and takes precedence over both the env
/// var and the YAML config file, per the override order in
/// `SPEC_FULL.md` §5.2 (CLI > env > file > built-in default).
#[derive(Parser, Debug)]
#[command(
    name = "radius-ucp",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
pub struct Args {
    /// Path to the YAML config file.
    #[arg(long, default_value = "/etc/radius/ucp-config.yaml", env = "RADIUS_CONFIG")]
    pub config: PathBuf,

    #[arg(long, env = "RADIUS_PORT")]
    pub port: Option<u16>,

    #[arg(long, default_value = "info", env = "RADIUS_LOG_FILTER")]
    pub log_filter: String,

    #[arg(long, value_enum, env = "RADIUS_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    #[arg(long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    pub tracing_url: Option<String>,

    #[arg(long, env = "RADIUS_SAMPLE_RATIO")]
    pub sample_ratio: Option<f64>,

    #[arg(long, env = "RADIUS_STORAGE_PROVIDER")]
    pub storage_provider: Option<String>,

    #[arg(long, env = "RADIUS_ETCD_ENDPOINTS", value_delimiter = ',')]
    pub etcd_endpoints: Option<Vec<String>>,

    #[arg(long, env = "RADIUS_WORKER_CONCURRENCY")]
    pub worker_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileServer {
    port: Option<u16>,
    host: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileEtcd {
    endpoints: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileStorage {
    provider: Option<String>,
    etcd: FileEtcd,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileWorker {
    concurrency: Option<usize>,
    lease_duration_secs: Option<u64>,
    visibility_timeout_secs: Option<u64>,
    retry_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileLogging {
    filter: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FileTracing {
    endpoint_url: Option<String>,
    sample_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    server: FileServer,
    storage: FileStorage,
    worker: FileWorker,
    logging: FileLogging,
    tracing: FileTracing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProvider {
    Memory,
    Etcd,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub host: String,
    pub storage_provider: StorageProvider,
    pub etcd_endpoints: Vec<String>,
    pub worker_concurrency: usize,
    pub lease_duration: chrono::Duration,
    pub visibility_timeout: chrono::Duration,
    pub retry_attempts: u32,
    pub log_filter: String,
    pub log_format: LogFormat,
    pub tracing_url: Option<String>,
    pub sample_ratio: f64,
}

impl Settings {
    /// Layers the YAML file under env/CLI overrides (`Args` fields are
    /// already env-backed by clap). A missing config file is not an error
    /// -- built-in defaults stand in, matching the teacher's own
    /// zero-config default startup.
    pub fn load(args: &Args) -> Result<Settings, ConfigError> {
        let file = if args.config.exists() {
            let raw = std::fs::read_to_string(&args.config).map_err(|source| ConfigError::Read {
                path: args.config.clone(),
                source,
            })?;
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: args.config.clone(),
                source,
            })?
        } else {
            FileConfig::default()
        };

        let storage_provider = match args
            .storage_provider
            .clone()
            .or(file.storage.provider)
            .as_deref()
        {
            Some("etcd") => StorageProvider::Etcd,
            _ => StorageProvider::Memory,
        };

        let log_format = args.log_format.clone().unwrap_or(match file.logging.format.as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        });

        Ok(Settings {
            port: args.port.or(file.server.port).unwrap_or(8080),
            host: file.server.host.unwrap_or_else(|| "0.0.0.0".to_owned()),
            storage_provider,
            etcd_endpoints: args
                .etcd_endpoints
                .clone()
                .or(file.storage.etcd.endpoints)
                .unwrap_or_else(|| vec!["http://localhost:2379".to_owned()]),
            worker_concurrency: args
                .worker_concurrency
                .or(file.worker.concurrency)
                .unwrap_or(8),
            lease_duration: chrono::Duration::seconds(
                file.worker.lease_duration_secs.unwrap_or(30) as i64,
            ),
            visibility_timeout: chrono::Duration::seconds(
                file.worker.visibility_timeout_secs.unwrap_or(60) as i64,
            ),
            retry_attempts: file.worker.retry_attempts.unwrap_or(5),
            log_filter: if args.log_filter != "info" {
                args.log_filter.clone()
            } else {
                file.logging.filter.unwrap_or(args.log_filter.clone())
            },
            log_format,
            tracing_url: args.tracing_url.clone().or(file.tracing.endpoint_url),
            sample_ratio: args.sample_ratio.or(file.tracing.sample_ratio).unwrap_or(0.1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_or_overrides() {
        let args = Args {
            config: PathBuf::from("/nonexistent/ucp-config.yaml"),
            port: None,
            log_filter: "info".to_owned(),
            log_format: None,
            tracing_url: None,
            sample_ratio: None,
            storage_provider: None,
            etcd_endpoints: None,
            worker_concurrency: None,
        };
        let settings = Settings::load(&args).unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.storage_provider, StorageProvider::Memory);
        assert_eq!(settings.worker_concurrency, 8);
    }

    #[test]
    fn cli_override_wins_over_missing_file() {
        let args = Args {
            config: PathBuf::from("/nonexistent/ucp-config.yaml"),
            port: Some(9090),
            log_filter: "info".to_owned(),
            log_format: None,
            tracing_url: None,
            sample_ratio: None,
            storage_provider: Some("etcd".to_owned()),
            etcd_endpoints: Some(vec!["http://etcd:2379".to_owned()]),
            worker_concurrency: None,
        };
        let settings = Settings::load(&args).unwrap();
        assert_eq!(settings.port, 9090);
        assert_eq!(settings.storage_provider, StorageProvider::Etcd);
        assert_eq!(settings.etcd_endpoints, vec!["http://etcd:2379".to_owned()]);
    }
}
