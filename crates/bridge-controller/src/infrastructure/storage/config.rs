//! TOML-based persistence of the configuration and secret records.
//!
//! The records live in the platform-appropriate config directory:
//! - Windows:  `%APPDATA%\BridgeOrchestrator\`
//! - Linux:    `~/.config/bridge-orchestrator/`
//! - macOS:    `~/Library/Application Support/BridgeOrchestrator/`
//!
//! # Example `config.toml`
//!
//! ```toml
//! host = "192.168.1.20"
//! port = 8081
//! log_level = "info"
//! max_resolution_attempts = 3
//!
//! [timeouts]
//! confirmation_secs = 30
//! csr_secs = 5
//! enumeration_secs = 10
//!
//! [identity]
//! state = "known"
//! serial = "0A1B2C3D"
//! ```
//!
//! # Atomic writes
//!
//! A record is first written to a sibling `*.tmp` file and then renamed over
//! the real file.  A rename within one directory is atomic, so a reader sees
//! either the old record or the new one, never a half-written bundle.
//!
//! # Serde default values
//!
//! Every field has a default so a missing file, an empty file, or a file from
//! an older version loads without error.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bridge_core::{BridgeIdentity, BundleError, CredentialBundle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::DEFAULT_SESSION_PORT;

const CONFIG_FILE: &str = "config.toml";
const SECRETS_FILE: &str = "secrets.toml";

/// Error type for record persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A record could not be serialized to TOML.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The secrets record holds a partial or malformed bundle.
    #[error("stored credentials are unusable: {0}")]
    InvalidBundle(#[from] BundleError),
}

// ── Record schema ─────────────────────────────────────────────────────────────

/// The persisted configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Address of the bridge.  `None` until the user enters or picks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Port of the authenticated session endpoint.
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Consecutive unresolvable-identity results tolerated before the stored
    /// credentials are discarded.
    #[serde(default = "default_max_resolution_attempts")]
    pub max_resolution_attempts: u32,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Identity of the paired bridge.  Managed by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<BridgeIdentity>,
}

/// Bounds on the waits the orchestrator performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// How long to wait for the physical button press.  Matches the bridge's
    /// own pairing window.
    #[serde(default = "default_confirmation_secs")]
    pub confirmation_secs: u64,
    /// How long to wait for the signed certificate once the CSR is sent.
    #[serde(default = "default_csr_secs")]
    pub csr_secs: u64,
    /// How long device enumeration may take on a fresh session.
    #[serde(default = "default_enumeration_secs")]
    pub enumeration_secs: u64,
}

impl TimeoutConfig {
    pub fn confirmation(&self) -> Duration {
        Duration::from_secs(self.confirmation_secs)
    }

    pub fn csr(&self) -> Duration {
        Duration::from_secs(self.csr_secs)
    }

    pub fn enumeration(&self) -> Duration {
        Duration::from_secs(self.enumeration_secs)
    }
}

impl ModuleConfig {
    /// Returns the configured host with whitespace removed, treating an empty
    /// value as unset.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// The persisted secrets record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct SecretRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bundle: Option<StoredBundle>,
}

/// On-disk shape of a bundle.  Fields are optional so that a damaged file is
/// detected as partial instead of failing to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct StoredBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

impl From<&CredentialBundle> for StoredBundle {
    fn from(bundle: &CredentialBundle) -> Self {
        Self {
            root_certificate: Some(bundle.root_certificate().to_string()),
            client_certificate: Some(bundle.client_certificate().to_string()),
            private_key: Some(bundle.private_key().to_string()),
        }
    }
}

impl SecretRecord {
    fn into_bundle(self) -> Result<Option<CredentialBundle>, BundleError> {
        match self.bundle {
            None => Ok(None),
            Some(stored) => CredentialBundle::from_parts(
                stored.root_certificate,
                stored.client_certificate,
                stored.private_key,
            ),
        }
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_SESSION_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_resolution_attempts() -> u32 {
    3
}
fn default_confirmation_secs() -> u64 {
    30
}
fn default_csr_secs() -> u64 {
    5
}
fn default_enumeration_secs() -> u64 {
    10
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            log_level: default_log_level(),
            max_resolution_attempts: default_max_resolution_attempts(),
            timeouts: TimeoutConfig::default(),
            identity: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            confirmation_secs: default_confirmation_secs(),
            csr_secs: default_csr_secs(),
            enumeration_secs: default_enumeration_secs(),
        }
    }
}

// ── Store trait ───────────────────────────────────────────────────────────────

/// Durable holder of the configuration record and the credential bundle.
///
/// Each `save_*` call must be atomic for its record.
pub trait StateStore: Send + Sync {
    fn load_config(&self) -> Result<ModuleConfig, StorageError>;

    fn save_config(&self, config: &ModuleConfig) -> Result<(), StorageError>;

    /// Loads the stored bundle.
    ///
    /// # Errors
    ///
    /// A partial bundle is reported as [`StorageError::InvalidBundle`], never
    /// returned.
    fn load_credentials(&self) -> Result<Option<CredentialBundle>, StorageError>;

    /// Replaces the stored bundle; `None` clears it.
    fn save_credentials(&self, bundle: Option<&CredentialBundle>) -> Result<(), StorageError>;
}

// ── File store ────────────────────────────────────────────────────────────────

/// [`StateStore`] backed by two TOML files in one directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Uses the platform-appropriate config directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined from the environment.
    pub fn platform_default() -> Result<Self, StorageError> {
        platform_config_dir()
            .map(Self::new)
            .ok_or(StorageError::NoPlatformConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.dir.join(SECRETS_FILE)
    }

    /// Reads a file, mapping "not found" to `None`.
    fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn write_atomic(&self, path: &Path, content: &str, private: bool) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = path.with_extension("toml.tmp");
        write_file(&tmp, content, private).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl StateStore for FileStateStore {
    fn load_config(&self) -> Result<ModuleConfig, StorageError> {
        match Self::read_optional(&self.config_path())? {
            Some(content) => Ok(toml::from_str(&content)?),
            None => Ok(ModuleConfig::default()),
        }
    }

    fn save_config(&self, config: &ModuleConfig) -> Result<(), StorageError> {
        let content = toml::to_string_pretty(config)?;
        self.write_atomic(&self.config_path(), &content, false)
    }

    fn load_credentials(&self) -> Result<Option<CredentialBundle>, StorageError> {
        let Some(content) = Self::read_optional(&self.secrets_path())? else {
            return Ok(None);
        };
        let record: SecretRecord = toml::from_str(&content)?;
        Ok(record.into_bundle()?)
    }

    fn save_credentials(&self, bundle: Option<&CredentialBundle>) -> Result<(), StorageError> {
        let record = SecretRecord {
            bundle: bundle.map(StoredBundle::from),
        };
        let content = toml::to_string_pretty(&record)?;
        self.write_atomic(&self.secrets_path(), &content, true)
    }
}

/// Writes `content` to `path`, restricting permissions for private records.
fn write_file(path: &Path, content: &str, private: bool) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

/// Resolves the platform config directory for this application.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("BridgeOrchestrator"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("bridge-orchestrator"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("BridgeOrchestrator")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// [`StateStore`] kept in memory; for tests and hosts with their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    config: Mutex<ModuleConfig>,
    bundle: Mutex<Option<CredentialBundle>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(config: ModuleConfig, bundle: Option<CredentialBundle>) -> Self {
        Self {
            config: Mutex::new(config),
            bundle: Mutex::new(bundle),
        }
    }
}

impl StateStore for MemoryStateStore {
    fn load_config(&self) -> Result<ModuleConfig, StorageError> {
        Ok(self.config.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_config(&self, config: &ModuleConfig) -> Result<(), StorageError> {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config.clone();
        Ok(())
    }

    fn load_credentials(&self) -> Result<Option<CredentialBundle>, StorageError> {
        Ok(self.bundle.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save_credentials(&self, bundle: Option<&CredentialBundle>) -> Result<(), StorageError> {
        *self.bundle.lock().unwrap_or_else(PoisonError::into_inner) = bundle.cloned();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
