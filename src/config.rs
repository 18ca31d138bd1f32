use crate::money::DEFAULT_LESSONS_PER_MONTH;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    pub worker_enabled: bool,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            max_attempts: 8,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
    pub lessons_per_month: u32,
    pub sync: SyncConfig,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            lessons_per_month: DEFAULT_LESSONS_PER_MONTH,
            sync: SyncConfig::default(),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if valid(&v) => v,
        _ => {
            log::warn!("ignoring invalid {}={:?}", key, raw);
            default
        }
    }
}

impl SidecarConfig {
    /// Reads `SCHOOLD_*` variables, loading a `.env` file first when one exists.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let worker_enabled = match lookup("SCHOOLD_SYNC_WORKER") {
            None => defaults.sync.worker_enabled,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                log::warn!("ignoring invalid SCHOOLD_SYNC_WORKER={:?}", raw);
                defaults.sync.worker_enabled
            }),
        };
        let secs = |key: &str, default: Duration| {
            Duration::from_secs(read(lookup, key, default.as_secs(), |v| *v > 0))
        };
        let sync = SyncConfig {
            worker_enabled,
            poll_interval: secs("SCHOOLD_SYNC_POLL_SECS", defaults.sync.poll_interval),
            request_timeout: secs("SCHOOLD_SYNC_TIMEOUT_SECS", defaults.sync.request_timeout),
            max_attempts: read(lookup, "SCHOOLD_SYNC_MAX_ATTEMPTS", defaults.sync.max_attempts, |v| *v > 0),
            base_delay: secs("SCHOOLD_SYNC_BASE_DELAY_SECS", defaults.sync.base_delay),
            max_delay: secs("SCHOOLD_SYNC_MAX_DELAY_SECS", defaults.sync.max_delay),
        };
        Self {
            lessons_per_month: read(
                lookup,
                "SCHOOLD_LESSONS_PER_MONTH",
                defaults.lessons_per_month,
                |v| *v > 0,
            ),
            sync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> SidecarConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SidecarConfig::from_lookup(&move |k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(cfg(&[]), SidecarConfig::default());
        assert_eq!(SidecarConfig::default().lessons_per_month, 12);
    }

    #[test]
    fn overrides_apply_and_bad_values_fall_back() {
        let c = cfg(&[
            ("SCHOOLD_SYNC_WORKER", "off"),
            ("SCHOOLD_LESSONS_PER_MONTH", "8"),
            ("SCHOOLD_SYNC_MAX_ATTEMPTS", "zero"),
            ("SCHOOLD_SYNC_POLL_SECS", "0"),
            ("SCHOOLD_SYNC_BASE_DELAY_SECS", "5"),
        ]);
        assert!(!c.sync.worker_enabled);
        assert_eq!(c.lessons_per_month, 8);
        assert_eq!(c.sync.max_attempts, 8);
        assert_eq!(c.sync.poll_interval, Duration::from_secs(30));
        assert_eq!(c.sync.base_delay, Duration::from_secs(5));
    }
}
