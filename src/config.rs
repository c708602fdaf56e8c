//! Configuration file parser for ~/.config/rill/config.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`,
//! which is enough for `--once` runs against a public document. Unknown
//! keys are silently ignored by serde, though we log a warning when the
//! file contains potential typos.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid URL for '{key}': {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All sections use `#[serde(default)]` so any subset of keys can be
/// specified. The custom Debug impl masks the document token to keep it
/// out of logs and error messages.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelaySection,
    pub document: DocumentSection,
    pub poll: PollSection,
    pub cache: CacheSection,
}

/// The CORS relay the browser deployment needs; feeds marked
/// `noCorsProxy` skip it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// Relay endpoint; the feed URL is appended verbatim. Empty disables
    /// the relay and fetches feeds directly.
    pub url: String,
    /// Value for the fixed `Origin` header the relay expects.
    pub origin: String,
    /// Value for the relay's `Usage` accounting header.
    pub usage: String,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DocumentSection {
    /// Document API root.
    pub api_base: String,
    /// Listing endpoint for the out-of-band change probe (e.g.
    /// `users/someone/gists`). Absent disables the probe.
    pub updates_path: Option<String>,
    /// Bearer token for the document API.
    pub token: Option<String>,
    /// Named document ids; `--profile` picks one, "default" otherwise.
    pub profiles: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSection {
    /// Seconds between out-of-band change probes.
    pub update_check_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Snapshot file path; defaults to `snapshot.json` under the config
    /// directory.
    pub path: Option<PathBuf>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            url: String::new(),
            origin: String::new(),
            usage: "rill".to_string(),
        }
    }
}

impl Default for DocumentSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            updates_path: None,
            token: None,
            profiles: HashMap::new(),
        }
    }
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            update_check_secs: 60,
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { path: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelaySection::default(),
            document: DocumentSection::default(),
            poll: PollSection::default(),
            cache: CacheSection::default(),
        }
    }
}

/// Mask the document token in Debug output to prevent secret leakage.
impl std::fmt::Debug for DocumentSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSection")
            .field("api_base", &self.api_base)
            .field("updates_path", &self.updates_path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("profiles", &self.profiles)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("relay", &self.relay)
            .field("document", &self.document)
            .field("poll", &self.poll)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, logged as warning
    /// - Malformed relay/API URLs → `Err(ConfigError::InvalidUrl)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown sections
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["relay", "document", "poll", "cache"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            profiles = config.document.profiles.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.relay.url.is_empty() {
            Url::parse(&self.relay.url).map_err(|source| ConfigError::InvalidUrl {
                key: "relay.url",
                source,
            })?;
        }
        Url::parse(&self.document.api_base).map_err(|source| ConfigError::InvalidUrl {
            key: "document.api_base",
            source,
        })?;
        Ok(())
    }

    /// Resolves the document id for a profile name; no name means the
    /// "default" profile.
    pub fn document_id(&self, profile: Option<&str>) -> Option<&str> {
        self.document
            .profiles
            .get(profile.unwrap_or("default"))
            .map(String::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================
