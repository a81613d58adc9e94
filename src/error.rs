use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    #[error("Config key not found: '{key}'")]
    ConfigNotFound { key: String },

    // State errors
    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Registration errors
    #[error("Player already registered: {discord_id}")]
    AlreadyRegistered { discord_id: String },

    #[error("Player not registered: {discord_id}")]
    NotRegistered { discord_id: String },

    #[error("A player cannot make a team with themselves")]
    SelfPairing,

    #[error("Team already exists: {team}")]
    TeamExists { team: String },

    #[error("Team not found: {team}")]
    TeamNotFound { team: String },

    #[error("Invalid GeoGuessr profile: {geoguessr_id}")]
    InvalidProfile { geoguessr_id: String },

    // Matchmaking errors
    #[error("No open match for {what}")]
    MatchNotFound { what: String },

    #[error("Duel {duel_id} does not involve the teams of the match")]
    UnattributableResult { duel_id: String },

    #[error("Matchmaking scheduler is not running")]
    SchedulerUnavailable,

    // External services
    #[error("External API error: {message}")]
    ExternalApi { message: String },

    // Discord errors
    #[error("Discord API error: {message}")]
    Discord { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Discord {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::ExternalApi {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

use poise::serenity_prelude as serenity;
