pub mod config;
pub mod general;
pub mod matchmaking;
pub mod registration;

pub use config::{get_config, remove_config, set_config};
pub use general::{help, ping};
pub use matchmaking::{close_match, matchmaking_logs, queue};
pub use registration::{register, ruleset, team};
