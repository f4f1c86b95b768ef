//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use icr_core::{LabelRegion, PipelineConfig};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 50)
    pub body_limit_mb: usize,
    /// Maximum file size per uploaded image in MB (default: 25)
    pub max_file_size_mb: usize,
    /// Request timeout in seconds (default: 360, above the OCR timeout)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL URL; in-memory repositories when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Database connection pool minimum connections (default: 2)
    pub database_min_connections: u32,
    /// Root directory for stored images; in-memory storage when unset
    pub storage_dir: Option<PathBuf>,
    /// Google Vision API key (enables the real OCR provider when set)
    pub google_vision_api_key: Option<String>,
    /// Allow the mock OCR provider when no API key is configured
    pub allow_mock_ocr: bool,
    /// Hard bound on one OCR provider call in seconds (default: 300)
    pub ocr_timeout_secs: u64,
    /// Process-wide OCR call budget (default: 60 per minute)
    pub ocr_calls_per_minute: usize,
    /// JSON file holding the card catalog
    pub card_catalog_path: Option<PathBuf>,
    /// Relative label crop (default: top 22% of the slab photo)
    pub label_region: LabelRegion,
    /// Candidates kept per scan (default: 5)
    pub match_top_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 50,
            max_file_size_mb: 25,
            timeout_secs: 360,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 20,
            database_min_connections: 2,
            storage_dir: None,
            google_vision_api_key: None,
            allow_mock_ocr: true, // Enabled by default for tests; from_env() defaults to false
            ocr_timeout_secs: 300,
            ocr_calls_per_minute: 60,
            card_catalog_path: None,
            label_region: LabelRegion::default(),
            match_top_n: 5,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .and_then(|h| h.parse::<Ipv4Addr>().ok())
            .map(|ip| ip.octets())
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // On by default; RATE_LIMIT_ENABLED=false turns it off
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let allow_mock_ocr = std::env::var("ALLOW_MOCK_OCR")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let label_region = match std::env::var("LABEL_REGION") {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring LABEL_REGION, using default crop");
                defaults.label_region
            }),
            Err(_) => defaults.label_region,
        };

        let config = Self {
            port: env_or("PORT", defaults.port),
            host,
            allowed_origins,
            body_limit_mb: env_or("BODY_LIMIT_MB", defaults.body_limit_mb),
            max_file_size_mb: env_or("MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_or("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            database_min_connections: env_or(
                "DATABASE_MIN_CONNECTIONS",
                defaults.database_min_connections,
            ),
            storage_dir: non_empty_var("STORAGE_DIR").map(PathBuf::from),
            google_vision_api_key: non_empty_var("GOOGLE_VISION_API_KEY"),
            allow_mock_ocr,
            ocr_timeout_secs: env_or("OCR_TIMEOUT_SECS", defaults.ocr_timeout_secs),
            ocr_calls_per_minute: env_or("OCR_CALLS_PER_MINUTE", defaults.ocr_calls_per_minute),
            card_catalog_path: non_empty_var("CARD_CATALOG_PATH").map(PathBuf::from),
            label_region,
            match_top_n: env_or("MATCH_TOP_N", defaults.match_top_n),
        };

        if config.timeout_secs <= config.ocr_timeout_secs {
            tracing::warn!(
                request_timeout_secs = config.timeout_secs,
                ocr_timeout_secs = config.ocr_timeout_secs,
                "Request timeout does not exceed the OCR timeout; slow OCR calls will be cut off"
            );
        }

        config
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Maximum size of one uploaded image in bytes
    pub fn max_file_size(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Library-level tunables derived from this configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            label_region: self.label_region,
            ocr_timeout: Duration::from_secs(self.ocr_timeout_secs),
            ..PipelineConfig::default()
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
