//! Engine-wide configuration (ambient stack: every tunable the core needs,
//! shaped the way the rest of this workspace's ancestry shaped its own
//! config — `Option<T>` fields with accessor methods falling back to a
//! documented default, plus a `fix_settings`-style normalizer for values
//! that depend on each other.
//!
//! Loading this from a file or environment is left to whatever embeds the
//! engine; this module only defines the shape and its defaults.

use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

const DEFAULT_IDLE_TTL_SECS: u64 = 300;
const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 30;
const DEFAULT_GC_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_INSTANCES: usize = 64;

/// Tunables shared by the instance manager and every database it opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrently-open per-project databases before
    /// `acquire` starts evicting idle ones to make room.
    max_instances: Option<usize>,

    /// How long an instance may sit with zero outstanding leases before the
    /// janitor evicts it.
    idle_ttl_secs: Option<u64>,

    /// How often the janitor sweeps for idle instances to evict.
    janitor_interval_secs: Option<u64>,

    /// How often each database's background GC loop runs.
    gc_interval_secs: Option<u64>,

    /// Whether to fsync a collection's log after every commit that touched
    /// it. Off by default (commits are still crash-consistent thanks to
    /// length-prefixed framing and truncate-on-replay; this only affects
    /// whether the most recent commits survive a power loss, not a crash).
    fsync_on_commit: Option<bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_instances: Some(DEFAULT_MAX_INSTANCES),
            idle_ttl_secs: Some(DEFAULT_IDLE_TTL_SECS),
            janitor_interval_secs: Some(DEFAULT_JANITOR_INTERVAL_SECS),
            gc_interval_secs: Some(DEFAULT_GC_INTERVAL_SECS),
            fsync_on_commit: Some(false),
        }
    }
}

impl EngineConfig {
    pub fn max_instances(&self) -> usize {
        self.max_instances.unwrap_or(DEFAULT_MAX_INSTANCES)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs.unwrap_or(DEFAULT_IDLE_TTL_SECS))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.unwrap_or(DEFAULT_JANITOR_INTERVAL_SECS))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.unwrap_or(DEFAULT_GC_INTERVAL_SECS))
    }

    pub fn fsync_on_commit(&self) -> bool {
        self.fsync_on_commit.unwrap_or(false)
    }

    pub fn with_max_instances(mut self, n: usize) -> Self {
        self.max_instances = Some(n);
        self
    }

    pub fn with_idle_ttl_secs(mut self, secs: u64) -> Self {
        self.idle_ttl_secs = Some(secs);
        self
    }

    pub fn with_fsync_on_commit(mut self, enabled: bool) -> Self {
        self.fsync_on_commit = Some(enabled);
        self
    }

    /// Clamps interdependent values into a sane range: a janitor interval
    /// longer than the idle TTL it's meant to enforce would leave instances
    /// alive well past their TTL, so it's pulled down to match.
    pub fn fix_settings(mut self) -> Self {
        if self.max_instances == Some(0) {
            self.max_instances = Some(DEFAULT_MAX_INSTANCES);
        }
        let idle_ttl = self.idle_ttl_secs.unwrap_or(DEFAULT_IDLE_TTL_SECS);
        if self.janitor_interval_secs.unwrap_or(DEFAULT_JANITOR_INTERVAL_SECS) > idle_ttl {
            self.janitor_interval_secs = Some(idle_ttl);
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_nonzero() {
        let config = EngineConfig::default();
        assert!(config.max_instances() > 0);
        assert!(config.idle_ttl() > Duration::ZERO);
    }

    #[test]
    fn fix_settings_caps_janitor_interval_to_idle_ttl() {
        let config = EngineConfig::default()
            .with_idle_ttl_secs(10)
            .fix_settings();
        assert!(config.janitor_interval() <= Duration::from_secs(10));
    }

    #[test]
    fn fix_settings_rejects_zero_max_instances() {
        let config = EngineConfig::default().with_max_instances(0).fix_settings();
        assert_eq!(config.max_instances(), DEFAULT_MAX_INSTANCES);
    }
}
