use serde::{Deserialize, Serialize};
use std::fmt;

/// Game-mode variant a team queues under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, poise::ChoiceParameter)]
pub enum Ruleset {
    /// No move, 30 seconds
    #[serde(rename = "NM")]
    #[name = "NM 30s"]
    Nm,
    /// No move, no pan, no zoom, 15 seconds
    #[serde(rename = "NMPZ")]
    #[name = "NMPZ 15s"]
    Nmpz,
}

impl Ruleset {
    /// Queue order; a team eligible for both is enqueued under the first
    pub const ALL: [Ruleset; 2] = [Ruleset::Nm, Ruleset::Nmpz];

    pub fn as_str(&self) -> &'static str {
        match self {
            Ruleset::Nm => "NM",
            Ruleset::Nmpz => "NMPZ",
        }
    }

    /// Config key holding the Discord role that opts a player into this ruleset
    pub fn role_key(&self) -> &'static str {
        match self {
            Ruleset::Nm => "nm_role_id",
            Ruleset::Nmpz => "nmpz_role_id",
        }
    }

    /// Infer the ruleset from the movement restrictions of a duel
    pub fn from_movement(forbid_moves: bool, forbid_rotating: bool, forbid_zooming: bool) -> Option<Self> {
        match (forbid_moves, forbid_rotating, forbid_zooming) {
            (true, true, true) => Some(Ruleset::Nmpz),
            (true, false, false) => Some(Ruleset::Nm),
            _ => None,
        }
    }
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_persisted_names() {
        assert_eq!(serde_json::to_string(&Ruleset::Nm).unwrap(), "\"NM\"");
        assert_eq!(
            serde_json::from_str::<Ruleset>("\"NMPZ\"").unwrap(),
            Ruleset::Nmpz
        );
    }

    #[test]
    fn test_from_movement() {
        assert_eq!(Ruleset::from_movement(true, true, true), Some(Ruleset::Nmpz));
        assert_eq!(Ruleset::from_movement(true, false, false), Some(Ruleset::Nm));
        assert_eq!(Ruleset::from_movement(false, false, false), None);
    }
}
