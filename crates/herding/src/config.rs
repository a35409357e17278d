use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration of a single [`Herd`](crate::Herd).
///
/// Every option is independent and defaults to "unbounded" or "disabled".
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// The name of the herd, attached to all logs and metrics it emits.
    ///
    /// Defaults to `herd`.
    pub name: String,

    /// Upper bound on the number of entries.
    ///
    /// Once exceeded, the least recently used entry is evicted. Both an absent value and `0`
    /// mean the herd is unbounded.
    pub max_entries: Option<u64>,

    /// Time after which an entry is considered expired.
    ///
    /// The age of an entry is measured from the moment it was stored. Entries whose
    /// computation is still running never expire.
    ///
    /// Defaults to no expiry.
    #[serde(with = "humantime_serde")]
    pub max_age: Option<Duration>,

    /// Serve an expired entry one last time.
    ///
    /// When enabled, the first read of an expired entry still returns it and purges it, and only
    /// the following read is a miss. When disabled, an expired entry is an immediate miss.
    pub stale: bool,

    /// Remove entries whose computation failed as soon as it settles.
    ///
    /// By default a failed computation stays cached like any other, and all callers within its
    /// lifetime receive the same error.
    pub evict_on_reject: bool,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            name: "herd".into(),
            max_entries: None,
            max_age: None,
            stale: false,
            evict_on_reject: false,
        }
    }
}

impl HerdConfig {
    /// Loads the configuration from a YAML file, or returns the defaults without a path.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Self::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// The effective capacity, with `0` mapped to unbounded.
    pub(crate) fn capacity(&self) -> Option<u64> {
        self.max_entries.filter(|&max| max > 0)
    }
}

/// Where and how to report metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "herding".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}
