use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::Ruleset;
use crate::error::{BotError, Result};

/// Registered players and teams (`inscriptions.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    /// Discord ID (as string) -> player
    #[serde(default)]
    pub players: HashMap<String, Player>,

    /// Team name -> team
    #[serde(default)]
    pub teams: HashMap<String, Team>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or create new if not exists
    pub async fn load(path: &Path) -> Result<Self> {
        Ok(super::load_json(path).await?.unwrap_or_default())
    }

    /// Save to a JSON file atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        super::save_json(path, self).await
    }

    pub fn player(&self, discord_id: u64) -> Option<&Player> {
        self.players.get(&discord_id.to_string())
    }

    pub fn team(&self, name: &str) -> Option<&Team> {
        self.teams.get(name)
    }

    pub fn register_player(&mut self, player: Player) -> Result<()> {
        if self.players.contains_key(&player.discord_id) {
            return Err(BotError::AlreadyRegistered {
                discord_id: player.discord_id,
            });
        }
        self.players.insert(player.discord_id.clone(), player);
        Ok(())
    }

    /// Find the team made of exactly these two players, in either order
    pub fn team_of_pair(&self, a: u64, b: u64) -> Option<&Team> {
        self.teams
            .get(&Team::name_for(a, b))
            .or_else(|| self.teams.get(&Team::name_for(b, a)))
    }

    /// Form a team; `initiator` becomes member1 and leads the team name
    pub fn create_team(&mut self, initiator: u64, partner: u64) -> Result<Team> {
        if initiator == partner {
            return Err(BotError::SelfPairing);
        }
        let member1 = self
            .player(initiator)
            .cloned()
            .ok_or(BotError::NotRegistered {
                discord_id: initiator.to_string(),
            })?;
        let member2 = self
            .player(partner)
            .cloned()
            .ok_or(BotError::NotRegistered {
                discord_id: partner.to_string(),
            })?;
        if let Some(existing) = self.team_of_pair(initiator, partner) {
            return Err(BotError::TeamExists {
                team: existing.name.clone(),
            });
        }

        let team = Team::new(member1, member2);
        self.teams.insert(team.name.clone(), team.clone());
        Ok(team)
    }

    /// Refresh a player's flag and pro status, including team snapshots.
    /// Returns the previous flag if anything changed.
    pub fn update_profile(&mut self, discord_id: u64, flag: &str, is_pro: bool) -> Option<String> {
        let key = discord_id.to_string();
        let player = self.players.get_mut(&key)?;
        if player.flag == flag && player.is_pro == is_pro {
            return None;
        }
        let previous = std::mem::replace(&mut player.flag, flag.to_string());
        player.is_pro = is_pro;

        for team in self.teams.values_mut() {
            for member in [&mut team.member1, &mut team.member2] {
                if member.discord_id == key {
                    member.flag = flag.to_string();
                    member.is_pro = is_pro;
                }
            }
        }
        Some(previous)
    }

    /// Append a duel outcome to both teams' history.
    /// Returns false, touching nothing, if either team already processed the duel.
    pub fn record_duel(
        &mut self,
        winner: &str,
        loser: &str,
        duel_id: &str,
        ruleset: Ruleset,
    ) -> Result<bool> {
        for name in [winner, loser] {
            let team = self.teams.get(name).ok_or_else(|| BotError::TeamNotFound {
                team: name.to_string(),
            })?;
            if team.has_processed(duel_id) {
                return Ok(false);
            }
        }

        for (name, opponent, won) in [(winner, loser, true), (loser, winner, false)] {
            if let Some(team) = self.teams.get_mut(name) {
                team.score.push(if won { "1" } else { "0" }.to_string());
                team.previous_opponents.push(opponent.to_string());
                team.previous_duel_ids.push(duel_id.to_string());
                team.last_gamemode = Some(ruleset);
            }
        }
        Ok(true)
    }
}

/// A registered player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Discord user ID (snowflake as string)
    pub discord_id: String,

    pub geoguessr_id: String,

    pub surname: String,

    /// ISO country code, lower case
    pub flag: String,

    #[serde(default)]
    pub is_pro: bool,
}

impl Player {
    pub fn discord_id_u64(&self) -> Option<u64> {
        self.discord_id.parse().ok()
    }
}

/// A two-player team and its match history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub name: String,
    pub member1: Player,
    pub member2: Player,

    /// "1" for a win, "0" for a loss, oldest first
    #[serde(default)]
    pub score: Vec<String>,

    /// Opponent team names, oldest first
    #[serde(default)]
    pub previous_opponents: Vec<String>,

    #[serde(default)]
    pub previous_duel_ids: Vec<String>,

    #[serde(default)]
    pub last_gamemode: Option<Ruleset>,
}

impl Team {
    pub fn new(member1: Player, member2: Player) -> Self {
        Self {
            name: format!("{}_{}", member1.discord_id, member2.discord_id),
            member1,
            member2,
            score: Vec::new(),
            previous_opponents: Vec::new(),
            previous_duel_ids: Vec::new(),
            last_gamemode: None,
        }
    }

    pub fn name_for(member1: u64, member2: u64) -> String {
        format!("{}_{}", member1, member2)
    }

    pub fn members(&self) -> [&Player; 2] {
        [&self.member1, &self.member2]
    }

    pub fn member_ids(&self) -> Vec<u64> {
        self.members()
            .iter()
            .filter_map(|p| p.discord_id_u64())
            .collect()
    }

    pub fn games_played(&self) -> usize {
        self.score.len()
    }

    pub fn wins(&self) -> usize {
        self.score.iter().filter(|s| s.as_str() == "1").count()
    }

    pub fn win_ratio(&self) -> f64 {
        if self.score.is_empty() {
            0.0
        } else {
            self.wins() as f64 / self.games_played() as f64
        }
    }

    /// 0-based position of the latest meeting with `opponent`, counted from the newest entry
    pub fn rank_since_last_meeting(&self, opponent: &str) -> Option<usize> {
        self.previous_opponents
            .iter()
            .rev()
            .position(|name| name == opponent)
    }

    pub fn has_processed(&self, duel_id: &str) -> bool {
        self.previous_duel_ids.iter().any(|id| id == duel_id)
    }

    pub fn display_name(&self) -> String {
        format!("{} & {}", self.member1.surname, self.member2.surname)
    }
}
