//! Environment-driven configuration.
//!
//! | variable | default |
//! |---|---|
//! | `CLEARCARE_DB_PATH` | `clearcare.db` |
//! | `CLEARCARE_LOG_MODE` | `auto` (`file` on a TTY, else `stdout`) |
//! | `CLEARCARE_LOG_FILE` | `clearcare.log` |
//! | `CLEARCARE_SANITIZE_MAX_BYTES` | 16384 |
//!
//! The key password is read separately by [`key_password`] so it is never
//! held in `AppConfig`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use zeroize::Zeroizing;

use crate::adapters::sanitize;

const DB_PATH_ENV: &str = "CLEARCARE_DB_PATH";
const LOG_MODE_ENV: &str = "CLEARCARE_LOG_MODE";
const LOG_FILE_ENV: &str = "CLEARCARE_LOG_FILE";
const SANITIZE_MAX_BYTES_ENV: &str = "CLEARCARE_SANITIZE_MAX_BYTES";

/// Secure sources for the key password, highest precedence first:
/// - `CLEARCARE_KEY_PASSWORD_FD` (read from an already-open FD, then close it)
/// - `CLEARCARE_KEY_PASSWORD_FILE` (read from a file path)
/// - `/run/secrets/clearcare_key_password` (Docker/Compose secret default)
/// - `CLEARCARE_KEY_PASSWORD`, debug builds only
const KEY_PASSWORD_FD_ENV: &str = "CLEARCARE_KEY_PASSWORD_FD";
const KEY_PASSWORD_FILE_ENV: &str = "CLEARCARE_KEY_PASSWORD_FILE";
const KEY_PASSWORD_DOCKER_SECRET_PATH: &str = "/run/secrets/clearcare_key_password";
const KEY_PASSWORD_ENV_DEV: &str = "CLEARCARE_KEY_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error(
        "Missing key password: provide {KEY_PASSWORD_FD_ENV} or {KEY_PASSWORD_FILE_ENV} (or mount {KEY_PASSWORD_DOCKER_SECRET_PATH})"
    )]
    MissingPassword,

    #[error("Could not read key password: {0}")]
    PasswordSource(#[from] std::io::Error),
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// File when attached to a terminal, stdout otherwise.
    Auto,
    File,
    Stdout,
}

impl FromStr for LogMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "file" => Ok(Self::File),
            "stdout" => Ok(Self::Stdout),
            _ => Err(ConfigError::InvalidValue {
                name: LOG_MODE_ENV,
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log_mode: LogMode,
    pub log_file: PathBuf,
    pub sanitize_max_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("clearcare.db"),
            log_mode: LogMode::Auto,
            log_file: PathBuf::from("clearcare.log"),
            sanitize_max_bytes: sanitize::DEFAULT_MAX_BYTES,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = env(DB_PATH_ENV).filter(|v| !v.trim().is_empty()) {
            config.db_path = PathBuf::from(path.trim());
        }
        if let Some(mode) = env(LOG_MODE_ENV) {
            config.log_mode = mode.parse()?;
        }
        if let Some(path) = env(LOG_FILE_ENV).filter(|v| !v.trim().is_empty()) {
            config.log_file = PathBuf::from(path.trim());
        }
        if let Some(raw) = env(SANITIZE_MAX_BYTES_ENV) {
            config.sanitize_max_bytes = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&v| v > 0)
                .ok_or(ConfigError::InvalidValue {
                    name: SANITIZE_MAX_BYTES_ENV,
                    value: raw.clone(),
                })?;
        }
        Ok(config)
    }
}

/// Read the key password from the most trusted source that is configured.
///
/// # Errors
/// Returns `MissingPassword` if no source is configured or the secret is
/// empty, and `PasswordSource` if a configured source cannot be read.
pub fn key_password() -> Result<Zeroizing<String>, ConfigError> {
    resolve_password(
        |name| std::env::var(name).ok(),
        Path::new(KEY_PASSWORD_DOCKER_SECRET_PATH),
    )
}

fn resolve_password(
    env: impl Fn(&str) -> Option<String>,
    docker_secret: &Path,
) -> Result<Zeroizing<String>, ConfigError> {
    #[cfg(unix)]
    if let Some(fd) = env(KEY_PASSWORD_FD_ENV) {
        return read_fd(&fd).and_then(non_empty);
    }

    if let Some(path) = env(KEY_PASSWORD_FILE_ENV) {
        let content = Zeroizing::new(std::fs::read_to_string(path.trim())?);
        return non_empty(content);
    }

    if docker_secret.exists() {
        let content = Zeroizing::new(std::fs::read_to_string(docker_secret)?);
        return non_empty(content);
    }

    if cfg!(debug_assertions) {
        if let Some(value) = env(KEY_PASSWORD_ENV_DEV) {
            return non_empty(Zeroizing::new(value));
        }
    }

    Err(ConfigError::MissingPassword)
}

#[cfg(unix)]
fn read_fd(raw: &str) -> Result<Zeroizing<String>, ConfigError> {
    use std::io::Read;
    use std::os::unix::io::FromRawFd;

    let fd: i32 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: KEY_PASSWORD_FD_ENV,
        value: raw.to_string(),
    })?;
    if fd <= 2 {
        // stdio is never a secret channel
        return Err(ConfigError::InvalidValue {
            name: KEY_PASSWORD_FD_ENV,
            value: raw.to_string(),
        });
    }

    // SAFETY: the operator hands this FD over for a one-time read; we take
    // ownership and close it on drop.
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut buf = Zeroizing::new(String::new());
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

fn non_empty(secret: Zeroizing<String>) -> Result<Zeroizing<String>, ConfigError> {
    let trimmed = secret.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        return Err(ConfigError::MissingPassword);
    }
    Ok(Zeroizing::new(trimmed.to_string()))
}
