//! CLI configuration.
//!
//! Every option is available as a flag with an environment-variable
//! fallback, grouped the way the service consumes them: network binding,
//! pipeline tuning, blob storage and the extraction provider.

use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser};

use docket_opendal::StorageConfig;
use docket_pipeline::{PipelineConfig, Tier};
use docket_server::{ProviderConfig, ServiceConfig};

use crate::TRACING_TARGET_CONFIG;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "docket")]
#[command(about = "Docket document extraction server")]
#[command(version)]
pub struct Cli {
    /// Server network configuration.
    #[clap(flatten)]
    pub server: ServerConfig,

    /// Pipeline tuning.
    #[clap(flatten)]
    pub pipeline: PipelineArgs,

    /// Blob storage configuration.
    #[clap(flatten)]
    pub storage: StorageArgs,

    /// Extraction provider configuration.
    #[clap(flatten)]
    pub provider: ProviderArgs,
}

/// Network binding options.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Address to bind.
    #[clap(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind.
    #[clap(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` for the TCP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Pipeline tuning options.
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Provider quota tier (standard or free).
    #[clap(long, env = "TIER", default_value = "standard")]
    pub tier: Tier,

    /// Limiter refill rate override, tokens per second.
    #[clap(long, env = "RATE")]
    pub rate: Option<f64>,

    /// Limiter burst capacity override.
    #[clap(long, env = "BURST")]
    pub burst: Option<u32>,

    /// Dispatcher pool size override.
    #[clap(long, env = "MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Minimum poll spacing in seconds.
    #[clap(long, env = "POLL_INTERVAL_SECS", default_value_t = 2)]
    pub poll_interval_secs: u64,

    /// Per-page poll cap in seconds.
    #[clap(long, env = "POLL_DEADLINE_SECS", default_value_t = 600)]
    pub poll_deadline_secs: u64,

    /// Session retention window in seconds.
    #[clap(long, env = "RETENTION_SECS", default_value_t = 24 * 60 * 60)]
    pub retention_secs: u64,

    /// Per-file upload cap in bytes.
    #[clap(long, env = "MAX_FILE_SIZE", default_value_t = 4 * 1024 * 1024)]
    pub max_file_size: usize,

    /// Upload count cap per session.
    #[clap(long, env = "MAX_FILES_PER_SESSION", default_value_t = 20)]
    pub max_files_per_session: usize,

    /// Credit grant for users the ledger has not seen.
    #[clap(long, env = "CREDIT_GRANT", default_value_t = 500)]
    pub credit_grant: i64,
}

impl PipelineArgs {
    fn build(&self) -> PipelineConfig {
        let mut config = PipelineConfig::for_tier(self.tier);
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(burst) = self.burst {
            config.burst = burst;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        config.poll_interval_min = Duration::from_secs(self.poll_interval_secs);
        config.poll_deadline = Duration::from_secs(self.poll_deadline_secs);
        config.retention = Duration::from_secs(self.retention_secs);
        config.max_file_size = self.max_file_size;
        config.max_files_per_session = self.max_files_per_session;
        config
    }
}

/// Blob storage options.
#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    /// Storage backend: memory, fs or s3.
    #[clap(long, env = "STORAGE_BACKEND", default_value = "memory")]
    pub storage_backend: String,

    /// Root directory for the fs backend.
    #[clap(long, env = "FS_ROOT", default_value = "./data/blobs")]
    pub fs_root: String,

    /// Bucket for the s3 backend.
    #[clap(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Region for the s3 backend.
    #[clap(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    /// Custom endpoint for S3-compatible services.
    #[clap(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,
}

impl StorageArgs {
    fn build(&self) -> anyhow::Result<StorageConfig> {
        match self.storage_backend.as_str() {
            "memory" => Ok(StorageConfig::Memory),
            "fs" => Ok(StorageConfig::Fs {
                root: self.fs_root.clone(),
            }),
            "s3" => {
                let bucket = self
                    .s3_bucket
                    .clone()
                    .context("--s3-bucket is required for the s3 backend")?;
                Ok(StorageConfig::S3 {
                    bucket,
                    region: self.s3_region.clone(),
                    endpoint: self.s3_endpoint.clone(),
                    access_key_id: None,
                    secret_access_key: None,
                })
            }
            other => anyhow::bail!("unknown storage backend {other:?}"),
        }
    }
}

/// Extraction provider options.
#[derive(Debug, Clone, Args)]
pub struct ProviderArgs {
    /// Extraction service base URL; omit to use the demo extractor.
    #[clap(long, env = "EXTRACTOR_ENDPOINT")]
    pub extractor_endpoint: Option<String>,

    /// Extraction service API key.
    #[clap(long, env = "EXTRACTOR_API_KEY")]
    pub extractor_api_key: Option<String>,
}

impl ProviderArgs {
    fn build(&self) -> anyhow::Result<ProviderConfig> {
        match (&self.extractor_endpoint, &self.extractor_api_key) {
            (Some(endpoint), Some(api_key)) => Ok(ProviderConfig::Http {
                endpoint: endpoint.clone(),
                api_key: api_key.clone(),
            }),
            (Some(_), None) => {
                anyhow::bail!("--extractor-api-key is required with --extractor-endpoint")
            }
            _ => {
                #[cfg(feature = "mock")]
                {
                    Ok(ProviderConfig::Mock)
                }
                #[cfg(not(feature = "mock"))]
                {
                    anyhow::bail!(
                        "no extraction provider configured; set --extractor-endpoint \
                         or build with the 'mock' feature"
                    )
                }
            }
        }
    }
}

impl Cli {
    /// Loads .env, then parses flags and environment.
    pub fn init() -> Self {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
        Self::parse()
    }

    /// Assembles the service configuration.
    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        Ok(ServiceConfig {
            pipeline: self.pipeline.build(),
            storage: self.storage.build()?,
            provider: self.provider.build()?,
            credit_grant: self.pipeline.credit_grant,
        })
    }

    /// Logs configuration at startup (no sensitive values).
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            host = %self.server.host,
            port = self.server.port,
            tier = %self.pipeline.tier,
            storage = %self.storage.storage_backend,
            extractor = self
                .provider
                .extractor_endpoint
                .as_deref()
                .unwrap_or("mock"),
            retention_secs = self.pipeline.retention_secs,
            "configuration"
        );
    }
}
