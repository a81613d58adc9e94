//! Config keys stored in the key-value store and matchmaking tunables read
//! from the environment.

use std::time::Duration;

/// Channel and role identifiers kept in `hellbot.json`
pub mod keys {
    pub const REGISTERED_ROLE_ID: &str = "registered_role_id";
    pub const STAFF_ROLE_ID: &str = "staff_role_id";
    pub const VOC_CREATE_CHANNEL_ID: &str = "voc_create_channel_id";
    pub const MATCHMAKING_VOC_CREATE_CHANNEL_ID: &str = "matchmaking_voc_create_channel_id";
    pub const TEMP_VOCALS_CHANNEL_ID: &str = "temp_vocals_channel_id";
    pub const TEMP_MATCHMAKING_VOCALS_CHANNEL_ID: &str = "temp_matchmaking_vocals_channel_id";
    pub const SUMMARY_LINKS_CHANNEL_ID: &str = "summary_links_channel_id";
    pub const MATCHMAKING_LOGS_CHANNEL_ID: &str = "matchmaking_logs_channel_id";
    pub const LOGS_CHANNEL_ID: &str = "logs_channel_id";
    pub const REGISTRATION_CHANNEL_ID: &str = "registration_channel_id";
    pub const MATCH_CATEGORY_ID: &str = "match_category_id";
    pub const NEWBIE_ROLE_ID: &str = "newbie_role_id";

    /// Keys shown by `/get_config` even when unset
    pub const KNOWN: &[&str] = &[
        REGISTERED_ROLE_ID,
        STAFF_ROLE_ID,
        "nm_role_id",
        "nmpz_role_id",
        VOC_CREATE_CHANNEL_ID,
        MATCHMAKING_VOC_CREATE_CHANNEL_ID,
        TEMP_VOCALS_CHANNEL_ID,
        TEMP_MATCHMAKING_VOCALS_CHANNEL_ID,
        SUMMARY_LINKS_CHANNEL_ID,
        MATCHMAKING_LOGS_CHANNEL_ID,
        LOGS_CHANNEL_ID,
        REGISTRATION_CHANNEL_ID,
        MATCH_CATEGORY_ID,
        NEWBIE_ROLE_ID,
    ];
}

/// Timing parameters of the matchmaking scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakingSettings {
    /// Countdown per missing point of score (`wait = (1 - score) * scale`)
    pub wait_scale: Duration,

    /// Upper bound on any countdown
    pub max_wait: Duration,

    /// Countdowns shorter than this commit immediately
    pub immediate_below: Duration,

    /// How long a participant of an open match may stay out of voice
    pub grace_period: Duration,

    /// UTC hour of the daily flag refresh
    pub flag_refresh_hour: u32,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            wait_scale: Duration::from_secs(100),
            max_wait: Duration::from_secs(60),
            immediate_below: Duration::from_secs(5),
            grace_period: Duration::from_secs(120),
            flag_refresh_hour: 17,
        }
    }
}

impl MatchmakingSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            wait_scale: env_secs("MATCHMAKING_WAIT_SCALE_SECS").unwrap_or(defaults.wait_scale),
            max_wait: env_secs("MATCHMAKING_MAX_WAIT_SECS").unwrap_or(defaults.max_wait),
            immediate_below: env_secs("MATCHMAKING_IMMEDIATE_BELOW_SECS")
                .unwrap_or(defaults.immediate_below),
            grace_period: env_secs("MATCHMAKING_GRACE_SECS").unwrap_or(defaults.grace_period),
            flag_refresh_hour: std::env::var("FLAG_REFRESH_HOUR_UTC")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|h| *h < 24)
                .unwrap_or(defaults.flag_refresh_hour),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}
