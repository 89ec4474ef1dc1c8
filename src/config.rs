//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (the variables deployment platforms set)
//! 2. Environment variables (APP_SERVER__PORT, APP_FFMPEG__TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names which
//! contain an underscore themselves (`timeout_secs`, `max_file_bytes`) survive
//! the mapping intact.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Allows making copies of the struct
///   - `Serialize`: Can convert this struct to JSON, TOML, etc.
///   - `Deserialize`: Can create this struct from JSON, TOML, etc.
///
/// ## Why separate config structs:
/// Each group maps to one table in config.toml, so `[ffmpeg]` settings never
/// get mixed up with `[server]` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub ffmpeg: FfmpegConfig,
    pub limits: LimitsConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on (1-65535)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Identity reported by the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// Where uploads, manifests and merged output live while a request is in flight.
///
/// A relative `scratch_dir` is resolved against the working directory when
/// the server starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub scratch_dir: PathBuf,
}

/// External concatenation tool settings.
///
/// ## Fields:
/// - `binary`: program name (looked up on PATH) or absolute path to ffmpeg
/// - `timeout_secs`: upper bound on one concatenation run; the child process
///   is killed once it is exceeded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    pub binary: String,
    pub timeout_secs: u64,
}

/// Upload limits applied while reading the multipart body.
///
/// ## Fields:
/// - `max_files`: maximum number of file parts in one merge request
/// - `max_file_bytes`: maximum size of a single uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_files: usize,
    pub max_file_bytes: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),   // Usually runs next to n8n in a container
                port: 3456,
            },
            service: ServiceConfig {
                name: "n8n-ffmpeg".to_string(),
            },
            storage: StorageConfig {
                scratch_dir: PathBuf::from("temp"),
            },
            ffmpeg: FfmpegConfig {
                binary: "ffmpeg".to_string(),
                timeout_secs: 300,             // 5 minutes covers hour-long podcasts with stream copy
            },
            limits: LimitsConfig {
                max_files: 100,
                max_file_bytes: 500 * 1024 * 1024,  // 500 MiB per file
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=127.0.0.1`: Override server host
    /// - `APP_STORAGE__SCRATCH_DIR=/var/tmp/merge`: Move the scratch directory
    /// - `APP_FFMPEG__BINARY=/usr/local/bin/ffmpeg`: Use a specific ffmpeg build
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The service name and ffmpeg binary are not empty
    /// - The ffmpeg timeout and both upload limits are greater than 0
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.service.name.trim().is_empty() {
            return Err(anyhow::anyhow!("Service name cannot be empty"));
        }

        if self.storage.scratch_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Scratch directory cannot be empty"));
        }

        if self.ffmpeg.binary.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg binary cannot be empty"));
        }

        if self.ffmpeg.timeout_secs == 0 {
            return Err(anyhow::anyhow!("ffmpeg timeout must be greater than 0"));
        }

        if self.limits.max_files == 0 {
            return Err(anyhow::anyhow!("Max files must be greater than 0"));
        }

        if self.limits.max_file_bytes == 0 {
            return Err(anyhow::anyhow!("Max file size must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// The ffmpeg timeout as a `Duration`.
    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg.timeout_secs)
    }
}
