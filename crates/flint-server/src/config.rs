//! Server configuration.
//!
//! `FlintConfig` is the layered configuration: built-in defaults, then an
//! optional TOML file, then CLI flags and their `FLINT_*` environment
//! fallbacks. The helpers below convert its CLI-friendly strings (like
//! "100M" or "allkeys-lfu") into the engine's config types.

use std::path::Path;
use std::time::Duration;

use flint_core::{EngineConfig, EvictionPolicy, ExpiryConfig, ShardConfig};
use flint_protocol::{AbsoluteExpiryRule, DEFAULT_ABSOLUTE_EXPIRY_FLOOR_MS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid {field} value: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Everything the server needs to build an engine and parse commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlintConfig {
    /// Number of shards. 0 means one per available CPU core.
    pub shards: usize,
    /// Total memory limit across all shards, e.g. "100M". Unset means
    /// unlimited.
    pub maxmemory: Option<String>,
    /// Total key limit across all shards. Unset means unlimited.
    pub maxkeys: Option<usize>,
    /// noeviction, allkeys-lru or allkeys-lfu.
    pub maxmemory_policy: String,
    /// Interval between active expiry passes, in milliseconds.
    pub expiry_tick_ms: u64,
    /// floor, future-only or any.
    pub absolute_expiry: String,
    /// Smallest EXAT/PXAT instant accepted under the `floor` rule.
    pub absolute_expiry_floor_ms: u64,
    /// Pending watch notifications a session may hold before updates are
    /// skipped.
    pub watch_queue_capacity: usize,
}

impl Default for FlintConfig {
    fn default() -> Self {
        Self {
            shards: 0,
            maxmemory: None,
            maxkeys: None,
            maxmemory_policy: "noeviction".into(),
            expiry_tick_ms: ExpiryConfig::default().tick.as_millis() as u64,
            absolute_expiry: "floor".into(),
            absolute_expiry_floor_ms: DEFAULT_ABSOLUTE_EXPIRY_FLOOR_MS,
            watch_queue_capacity: 64,
        }
    }
}

impl FlintConfig {
    /// Loads a config from a TOML file. Missing fields take their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Parses a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Renders the config as TOML, e.g. for `--config-template`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolves `shards = 0` to the number of available cores.
    pub fn resolved_shard_count(&self) -> usize {
        if self.shards > 0 {
            return self.shards;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// The memory limit in bytes, if one is set.
    pub fn max_memory_bytes(&self) -> Result<Option<usize>, ConfigError> {
        self.maxmemory
            .as_deref()
            .map(|raw| parse_byte_size(raw).map_err(|e| ConfigError::invalid("maxmemory", e)))
            .transpose()
    }

    /// How SET validates EXAT/PXAT timestamps.
    pub fn absolute_expiry_rule(&self) -> Result<AbsoluteExpiryRule, ConfigError> {
        parse_absolute_expiry_rule(&self.absolute_expiry, self.absolute_expiry_floor_ms)
            .map_err(|e| ConfigError::invalid("absolute-expiry", e))
    }

    /// Validates the config and builds the engine configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let shard_count = self.resolved_shard_count();
        let max_memory = self.max_memory_bytes()?;
        let policy = parse_eviction_policy(&self.maxmemory_policy)
            .map_err(|e| ConfigError::invalid("maxmemory-policy", e))?;
        if self.expiry_tick_ms == 0 {
            return Err(ConfigError::invalid("expiry-tick-ms", "must be at least 1"));
        }
        if self.watch_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "watch-queue-capacity",
                "must be at least 1",
            ));
        }
        let expiry = ExpiryConfig {
            tick: Duration::from_millis(self.expiry_tick_ms),
            ..ExpiryConfig::default()
        };
        Ok(build_engine_config(
            max_memory,
            self.maxkeys,
            policy,
            shard_count,
            expiry,
        ))
    }
}

/// Parses a human-readable byte size string into a number of bytes.
///
/// Supports suffixes: K/KB (kibibytes), M/MB (mebibytes), G/GB (gibibytes).
/// Plain numbers are treated as bytes. Case insensitive.
///
/// # Examples
///
/// - "1024" → 1024
/// - "100K" → 102400
/// - "50M" → 52428800
/// - "2G" → 2147483648
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty byte size string".into());
    }

    let upper = input.to_ascii_uppercase();

    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('K') {
        (n, 1024)
    } else {
        (upper.as_str(), 1)
    };

    let num: usize = num_str
        .parse()
        .map_err(|_| format!("invalid byte size: '{input}'"))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("byte size overflow: '{input}'"))
}

/// Parses an eviction policy name from a CLI string.
pub fn parse_eviction_policy(input: &str) -> Result<EvictionPolicy, String> {
    match input.to_ascii_lowercase().as_str() {
        "noeviction" => Ok(EvictionPolicy::NoEviction),
        "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
        "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
        _ => Err(format!(
            "unknown eviction policy '{input}'. valid options: noeviction, allkeys-lru, allkeys-lfu"
        )),
    }
}

/// Parses an absolute expiry rule name. `floor_ms` only applies to
/// `floor`.
pub fn parse_absolute_expiry_rule(input: &str, floor_ms: u64) -> Result<AbsoluteExpiryRule, String> {
    match input.to_ascii_lowercase().as_str() {
        "floor" => Ok(AbsoluteExpiryRule::Floor(floor_ms)),
        "future-only" => Ok(AbsoluteExpiryRule::FutureOnly),
        "any" => Ok(AbsoluteExpiryRule::AnyNonNegative),
        _ => Err(format!(
            "unknown absolute expiry rule '{input}'. valid options: floor, future-only, any"
        )),
    }
}

/// Builds an `EngineConfig` from parsed options.
///
/// `max_memory` and `max_keys` are server-wide limits. They get divided
/// evenly across shards so each shard enforces its own share.
pub fn build_engine_config(
    max_memory: Option<usize>,
    max_keys: Option<usize>,
    eviction_policy: EvictionPolicy,
    shard_count: usize,
    expiry: ExpiryConfig,
) -> EngineConfig {
    // round down: slightly conservative beats overshooting the total
    let per_shard = |total: usize| (total / shard_count.max(1)).max(1);

    EngineConfig {
        shard: ShardConfig {
            max_memory: max_memory.map(per_shard),
            max_keys: max_keys.map(per_shard),
            eviction_policy,
            ..ShardConfig::default()
        },
        expiry,
    }
}
