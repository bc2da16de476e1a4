//! Service configuration
//!
//! Parsed once at startup from command-line flags with environment fallbacks,
//! then shared read-only by every request.

use clap::{Args, Parser};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 200 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max upload size must be greater than zero")]
    ZeroUploadLimit,

    #[error("tool timeout must be greater than zero")]
    ZeroTimeout,

    #[error("{what} not found: {}", .path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("temporary root is not a directory: {}", .path.display())]
    InvalidTmpRoot { path: PathBuf },
}

/// Configuration for the bundle conversion service
#[derive(Debug, Clone, Parser)]
#[command(name = "apkforge")]
#[command(about = "Converts uploaded Android App Bundles into signed universal APKs")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    #[command(flatten)]
    pub tool: ToolConfig,

    #[command(flatten)]
    pub signing: SigningConfig,

    /// Maximum accepted upload size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Wall-clock limit for a single bundletool invocation, in seconds
    #[arg(long, env = "TOOL_TIMEOUT_SECS", default_value_t = DEFAULT_TOOL_TIMEOUT_SECS)]
    pub tool_timeout_secs: u64,

    /// Directory holding request workspaces and delivery copies (defaults to the system temp dir)
    #[arg(long, env = "TMP_ROOT")]
    pub tmp_root: Option<PathBuf>,

    /// Allowed CORS origins, comma separated; `*` allows any origin
    #[arg(long, env = "CORS_ALLOW_ORIGIN", value_delimiter = ',', default_value = "*")]
    pub cors_allow_origin: Vec<String>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Location of the external packaging tool
#[derive(Debug, Clone, Args)]
pub struct ToolConfig {
    /// bundletool jar (`bundletool-all-*.jar`) or an executable wrapper
    #[arg(long = "bundletool", env = "BUNDLETOOL_PATH")]
    pub bundletool: PathBuf,

    /// Java launcher used when `--bundletool` points at a jar
    #[arg(long = "java", env = "JAVA_BIN", default_value = "java")]
    pub java: PathBuf,
}

impl ToolConfig {
    /// Whether bundletool must be launched through `java -jar`.
    pub fn is_jar(&self) -> bool {
        self.bundletool
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
    }
}

/// Keystore credentials handed to bundletool for signing
#[derive(Clone, Args)]
pub struct SigningConfig {
    /// Java keystore used to sign the generated APKs
    #[arg(long = "keystore", env = "KEYSTORE_PATH")]
    pub keystore: PathBuf,

    /// Keystore password
    #[arg(long = "keystore-pass", env = "KEYSTORE_PASS", hide_env_values = true)]
    pub keystore_pass: String,

    /// Alias of the signing key inside the keystore
    #[arg(long = "key-alias", env = "KEY_ALIAS")]
    pub key_alias: String,

    /// Password of the signing key
    #[arg(long = "key-pass", env = "KEY_PASS", hide_env_values = true)]
    pub key_pass: String,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("keystore", &self.keystore)
            .field("keystore_pass", &"<redacted>")
            .field("key_alias", &self.key_alias)
            .field("key_pass", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn tmp_root(&self) -> PathBuf {
        self.tmp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::ZeroUploadLimit);
        }

        if self.tool_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        if !self.signing.keystore.is_file() {
            return Err(ConfigError::MissingFile {
                what: "keystore",
                path: self.signing.keystore.clone(),
            });
        }

        // A bare program name is resolved through PATH at spawn time.
        if (self.tool.is_jar() || is_explicit_path(&self.tool.bundletool))
            && !self.tool.bundletool.is_file()
        {
            return Err(ConfigError::MissingFile {
                what: "bundletool",
                path: self.tool.bundletool.clone(),
            });
        }

        if let Some(root) = &self.tmp_root {
            if !root.is_dir() {
                return Err(ConfigError::InvalidTmpRoot { path: root.clone() });
            }
        }

        Ok(())
    }
}

fn is_explicit_path(path: &Path) -> bool {
    path.components().count() > 1 || path.is_absolute()
}
