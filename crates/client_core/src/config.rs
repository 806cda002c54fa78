use std::{fs, path::Path, sync::Arc, time::Duration};

use serde::Deserialize;
use shared::protocol::CommitPolicy;
use tracing::warn;

use crate::latency::{FixedLatency, LatencyBoundary, NoLatency};

pub const DEFAULT_SETTINGS_FILE: &str = "list-tools.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Simulated round trip per mutation; zero commits on the next turn.
    pub latency_ms: u64,
    pub commit_policy: CommitPolicy,
    pub event_capacity: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            latency_ms: 500,
            commit_policy: CommitPolicy::Fifo,
            event_capacity: 256,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn latency_boundary(&self) -> Arc<dyn LatencyBoundary> {
        if self.latency_ms == 0 {
            Arc::new(NoLatency)
        } else {
            Arc::new(FixedLatency::new(self.latency()))
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

/// Defaults, then the TOML file at `path` if it exists, then `APP__*`
/// environment variables.
pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(&raw).unwrap_or_else(|error| {
            warn!(path = %path.display(), %error, "ignoring unreadable settings file");
            Settings::default()
        }),
        Err(_) => Settings::default(),
    };
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn parse_settings(raw: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(raw)
}

pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("APP__LATENCY_MS") {
        match v.parse::<u64>() {
            Ok(parsed) => settings.latency_ms = parsed,
            Err(_) => warn!(value = %v, "APP__LATENCY_MS is not a number; keeping {}", settings.latency_ms),
        }
    }
    if let Some(v) = lookup("APP__COMMIT_POLICY") {
        match parse_commit_policy(&v) {
            Some(policy) => settings.commit_policy = policy,
            None => warn!(value = %v, "unknown APP__COMMIT_POLICY; expected 'fifo' or 'optimistic'"),
        }
    }
    if let Some(v) = lookup("APP__EVENT_CAPACITY") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_capacity = parsed.max(1);
        }
    }
    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

pub fn parse_commit_policy(raw: &str) -> Option<CommitPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "fifo" => Some(CommitPolicy::Fifo),
        "optimistic" => Some(CommitPolicy::Optimistic),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
