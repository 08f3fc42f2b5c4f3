use std::{env, path::PathBuf, time::Duration};

pub const DEFAULT_SYNC_URL: &str = "ws://localhost:8000/ws";
const DEFAULT_SETTINGS_FILE: &str = "focus-flow-settings.json";

const CONNECT_TIMEOUT_SECS: u64 = 5;
const HEARTBEAT_SECS: u64 = 30;
const RECONNECT_FLOOR_MS: u64 = 1000;
const RECONNECT_CEILING_SECS: u64 = 30;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DRIFT_THRESHOLD_SECS: u32 = 2;

/// Tunables for the realtime sync channel.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceiling: Duration,
    pub max_reconnect_attempts: u32,
    /// Remote and local remaining time may differ by this many seconds
    /// before the local timer is overwritten.
    pub drift_threshold_secs: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SYNC_URL.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_SECS),
            reconnect_floor: Duration::from_millis(RECONNECT_FLOOR_MS),
            reconnect_ceiling: Duration::from_secs(RECONNECT_CEILING_SECS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            drift_threshold_secs: DRIFT_THRESHOLD_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub settings_path: PathBuf,
    pub debug: bool,
    pub auto_connect: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let debug = env_flag("FOCUS_FLOW_DEBUG").unwrap_or(false);
        let auto_connect = env_flag("FOCUS_FLOW_AUTOCONNECT").unwrap_or(true);

        let url = env::var("FOCUS_FLOW_WS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYNC_URL.to_string());

        let settings_path = env::var_os("FOCUS_FLOW_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

        Self {
            sync: SyncConfig {
                url,
                ..SyncConfig::default()
            },
            settings_path,
            debug,
            auto_connect,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|value| parse_flag(&value))
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_sync_contract() {
        let config = SyncConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_floor, Duration::from_secs(1));
        assert_eq!(config.reconnect_ceiling, Duration::from_secs(30));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.drift_threshold_secs, 2);
    }

    #[test]
    fn flags_accept_one_and_true() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag("0"));
    }
}
