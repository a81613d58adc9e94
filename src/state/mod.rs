pub mod ledger;
pub mod registry;
pub mod ruleset;

pub use ledger::{Match, MatchStatus, MatchmakingState, PendingTeams};
pub use registry::{Player, Registry, Team};
pub use ruleset::Ruleset;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read a JSON document, returning `None` if the file does not exist yet
pub async fn load_json<T: DeserializeOwned>(path: &Path) -> crate::error::Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| crate::error::BotError::ConfigParse {
                path: path.display().to_string(),
                source: e,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(crate::error::BotError::StateLoad {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Save a JSON document atomically (write to a temp file, then rename)
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> crate::error::Result<()> {
    let content = serde_json::to_string_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, &content).await.map_err(|e| {
        crate::error::BotError::StateSave {
            path: path.display().to_string(),
            source: e,
        }
    })?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        crate::error::BotError::StateSave {
            path: path.display().to_string(),
            source: e,
        }
    })?;

    Ok(())
}
