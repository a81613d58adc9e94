use serde::{Deserialize, Serialize};
use std::path::Path;

use super::Ruleset;
use crate::error::Result;

/// Pending queues and open matches (`matchmaking.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingState {
    #[serde(default)]
    pub pending_teams: PendingTeams,

    #[serde(default)]
    pub current_matches: Vec<Match>,
}

impl MatchmakingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(path: &Path) -> Result<Self> {
        Ok(super::load_json(path).await?.unwrap_or_default())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        super::save_json(path, self).await
    }

    pub fn open_match_of_team(&self, team: &str) -> Option<&Match> {
        self.current_matches
            .iter()
            .find(|m| m.status == MatchStatus::Open && m.involves_team(team))
    }

    pub fn open_match_of_user(&self, user_id: u64) -> Option<&Match> {
        self.current_matches
            .iter()
            .find(|m| m.status == MatchStatus::Open && m.users_ids.contains(&user_id))
    }

    pub fn open_match_of_channel(&self, channel_id: u64) -> Option<&Match> {
        self.current_matches
            .iter()
            .find(|m| m.status == MatchStatus::Open && m.text_channel_id == Some(channel_id))
    }

    /// Record a newly opened match
    pub fn open(&mut self, record: Match) {
        self.current_matches.push(record);
    }

    /// Remove the match of `team` from the ledger, returning it marked closed
    pub fn close(&mut self, team: &str) -> Option<Match> {
        let index = self
            .current_matches
            .iter()
            .position(|m| m.involves_team(team))?;
        let mut closed = self.current_matches.remove(index);
        closed.status = MatchStatus::Closed;
        Some(closed)
    }
}

/// One ordered queue of team names per ruleset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingTeams {
    #[serde(rename = "NM", default)]
    pub nm: Vec<String>,

    #[serde(rename = "NMPZ", default)]
    pub nmpz: Vec<String>,
}

impl PendingTeams {
    pub fn queue(&self, ruleset: Ruleset) -> &[String] {
        match ruleset {
            Ruleset::Nm => &self.nm,
            Ruleset::Nmpz => &self.nmpz,
        }
    }

    fn queue_mut(&mut self, ruleset: Ruleset) -> &mut Vec<String> {
        match ruleset {
            Ruleset::Nm => &mut self.nm,
            Ruleset::Nmpz => &mut self.nmpz,
        }
    }

    /// The ruleset queue currently holding `team`
    pub fn ruleset_of(&self, team: &str) -> Option<Ruleset> {
        Ruleset::ALL
            .into_iter()
            .find(|r| self.queue(*r).iter().any(|t| t == team))
    }

    /// Append `team` to a queue. No-op returning false if it is queued anywhere already.
    pub fn enqueue(&mut self, team: &str, ruleset: Ruleset) -> bool {
        if self.ruleset_of(team).is_some() {
            return false;
        }
        self.queue_mut(ruleset).push(team.to_string());
        true
    }

    /// Remove `team` from every queue
    pub fn remove(&mut self, team: &str) -> bool {
        let mut removed = false;
        for ruleset in Ruleset::ALL {
            let queue = self.queue_mut(ruleset);
            let before = queue.len();
            queue.retain(|t| t != team);
            removed |= queue.len() != before;
        }
        removed
    }

    /// Queued team having `user_id` as a member (team names embed member ids)
    pub fn team_with_member(&self, user_id: u64) -> Option<&String> {
        let id = user_id.to_string();
        Ruleset::ALL
            .into_iter()
            .flat_map(|r| self.queue(r).iter())
            .find(|team| team.split('_').any(|part| part == id))
    }

    pub fn len(&self) -> usize {
        self.nm.len() + self.nmpz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Open,
    Closed,
}

/// An active match between two teams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub team1: String,
    pub team2: String,

    /// Discord IDs of the four players
    pub users_ids: Vec<u64>,

    pub match_type: Ruleset,

    #[serde(default)]
    pub text_channel_id: Option<u64>,

    /// Voice channels of both teams, renamed while the match is pending
    #[serde(default)]
    pub voice_channel_ids: Vec<u64>,

    pub status: MatchStatus,

    /// Unix timestamp
    #[serde(default)]
    pub opened_at: i64,
}

impl Match {
    pub fn involves_team(&self, team: &str) -> bool {
        self.team1 == team || self.team2 == team
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match() -> Match {
        Match {
            team1: "1_2".into(),
            team2: "3_4".into(),
            users_ids: vec![1, 2, 3, 4],
            match_type: Ruleset::Nm,
            text_channel_id: Some(99),
            voice_channel_ids: vec![10, 11],
            status: MatchStatus::Open,
            opened_at: 0,
        }
    }

    #[test]
    fn test_team_in_at_most_one_queue() {
        let mut pending = PendingTeams::default();
        assert!(pending.enqueue("1_2", Ruleset::Nm));
        assert!(!pending.enqueue("1_2", Ruleset::Nmpz));
        assert!(!pending.enqueue("1_2", Ruleset::Nm));
        assert_eq!(pending.ruleset_of("1_2"), Some(Ruleset::Nm));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_remove_from_every_queue() {
        let mut pending = PendingTeams {
            nm: vec!["1_2".into(), "3_4".into()],
            nmpz: vec!["1_2".into()],
        };
        assert!(pending.remove("1_2"));
        assert_eq!(pending.nm, vec!["3_4"]);
        assert!(pending.nmpz.is_empty());
        assert!(!pending.remove("1_2"));
    }

    #[test]
    fn test_team_with_member_matches_whole_ids() {
        let mut pending = PendingTeams::default();
        pending.enqueue("12_34", Ruleset::Nmpz);
        assert_eq!(pending.team_with_member(34).map(String::as_str), Some("12_34"));
        assert!(pending.team_with_member(3).is_none());
    }

    #[test]
    fn test_ledger_lookup_and_close() {
        let mut state = MatchmakingState::new();
        state.open(sample_match());

        assert!(state.open_match_of_user(3).is_some());
        assert!(state.open_match_of_channel(99).is_some());
        assert_eq!(
            state.open_match_of_team("3_4").map(|m| m.team1.as_str()),
            Some("1_2")
        );

        let closed = state.close("1_2").unwrap();
        assert_eq!(closed.status, MatchStatus::Closed);
        assert!(state.current_matches.is_empty());
        assert!(state.close("1_2").is_none());
    }

    #[test]
    fn test_persisted_json_layout() {
        let json = r#"{"pendingTeams": {"NM": ["1_2"], "NMPZ": []}, "currentMatches": []}"#;
        let state: MatchmakingState = serde_json::from_str(json).unwrap();
        assert_eq!(
            state.pending_teams.queue(Ruleset::Nm).to_vec(),
            vec!["1_2".to_string()]
        );

        let value = serde_json::to_value(&state).unwrap();
        assert!(value["pendingTeams"]["NMPZ"].is_array());
        assert!(value["currentMatches"].is_array());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchmaking.json");

        let mut state = MatchmakingState::new();
        state.pending_teams.enqueue("5_6", Ruleset::Nmpz);
        state.open(sample_match());
        state.save(&path).await.unwrap();

        let loaded = MatchmakingState::load(&path).await.unwrap();
        assert_eq!(loaded.pending_teams, state.pending_teams);
        assert_eq!(loaded.current_matches, state.current_matches);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
