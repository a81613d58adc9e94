//! GeoGuessr API client: duel results and player profiles

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BotError, Result};
use crate::state::Ruleset;

const GAME_SERVER_URL: &str = "https://game-server.geoguessr.com/api/duels";
const API_URL: &str = "https://www.geoguessr.com/api/v3/users";

/// Country and subscription status of a GeoGuessr account
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub geoguessr_id: String,
    pub nick: String,
    /// ISO country code, lower case
    pub flag: String,
    pub is_pro: bool,
}

/// A player taking part in a finished duel
#[derive(Debug, Clone, PartialEq)]
pub struct DuelPlayer {
    pub geoguessr_id: String,
}

/// Parsed outcome of a finished duel
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DuelOutcome {
    pub duel_id: String,
    pub winning_players: Vec<DuelPlayer>,
    pub losing_players: Vec<DuelPlayer>,
    pub is_draw: bool,
    pub map_name: Option<String>,
    pub rounds: u32,
    /// Inferred from the movement options, when they match a known ruleset
    pub ruleset: Option<Ruleset>,
}

impl DuelOutcome {
    pub fn winner_ids(&self) -> impl Iterator<Item = &str> {
        self.winning_players.iter().map(|p| p.geoguessr_id.as_str())
    }

    /// Every player of the duel, winners first
    pub fn player_ids(&self) -> impl Iterator<Item = &str> {
        self.winning_players
            .iter()
            .chain(&self.losing_players)
            .map(|p| p.geoguessr_id.as_str())
    }
}

/// Source of external game data
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch_duel(&self, duel_id: &str) -> Result<DuelOutcome>;

    async fn fetch_profile(&self, geoguessr_id: &str) -> Result<Profile>;

    /// Fails closed: any lookup error counts as "does not exist"
    async fn profile_exists(&self, geoguessr_id: &str) -> bool {
        self.fetch_profile(geoguessr_id).await.is_ok()
    }
}

/// HTTP client for the public GeoGuessr endpoints
#[derive(Clone)]
pub struct GeoGuessrClient {
    http_client: reqwest::Client,
    /// `_ncfa` session cookie, required by the duel endpoint
    ncfa_cookie: Option<String>,
}

impl GeoGuessrClient {
    pub fn new(ncfa_cookie: Option<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            ncfa_cookie,
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("GEOGUESSR_NCFA").ok().filter(|s| !s.is_empty()))
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let request = self.http_client.get(url);
        match &self.ncfa_cookie {
            Some(cookie) => request.header(reqwest::header::COOKIE, format!("_ncfa={}", cookie)),
            None => request,
        }
    }
}

#[async_trait]
impl ResultSource for GeoGuessrClient {
    async fn fetch_duel(&self, duel_id: &str) -> Result<DuelOutcome> {
        let url = format!("{}/{}", GAME_SERVER_URL, urlencoding::encode(duel_id));
        debug!("Fetching duel {}", duel_id);
        let response = self.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BotError::ExternalApi {
                message: format!("duel {} lookup returned {}", duel_id, response.status()),
            });
        }
        let duel: DuelResponse = response.json().await?;
        Ok(duel.into_outcome(duel_id))
    }

    async fn fetch_profile(&self, geoguessr_id: &str) -> Result<Profile> {
        let url = format!("{}/{}", API_URL, urlencoding::encode(geoguessr_id));
        let response = self.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BotError::InvalidProfile {
                geoguessr_id: geoguessr_id.to_string(),
            });
        }
        let user: UserResponse = response.json().await?;
        Ok(Profile {
            geoguessr_id: geoguessr_id.to_string(),
            nick: user.nick,
            flag: user.country_code.to_lowercase(),
            is_pro: user.is_pro_user,
        })
    }
}

/// Accept either a bare id or a `geoguessr.com/user/<id>` profile link
pub fn parse_geoguessr_id(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains("geoguessr.com/user/") {
        trimmed
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(trimmed)
            .to_string()
    } else {
        trimmed.to_string()
    }
}

/// First hyphenated lower-case UUID found in a message (summary links embed the duel id)
pub fn extract_duel_id(text: &str) -> Option<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .filter(|token| token.len() == 36)
        .filter(|token| !token.chars().any(|c| c.is_ascii_uppercase()))
        .find_map(|token| uuid::Uuid::parse_str(token).ok())
        .map(|id| id.hyphenated().to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    #[serde(default)]
    nick: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    is_pro_user: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuelResponse {
    #[serde(default)]
    teams: Vec<DuelTeam>,
    #[serde(default)]
    current_round_number: u32,
    #[serde(default)]
    options: Option<DuelOptions>,
    #[serde(default)]
    result: Option<DuelResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuelTeam {
    id: String,
    #[serde(default)]
    players: Vec<DuelTeamPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuelTeamPlayer {
    player_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuelOptions {
    #[serde(default)]
    map: Option<DuelMap>,
    #[serde(default)]
    movement_options: Option<MovementOptions>,
}

#[derive(Debug, Deserialize)]
struct DuelMap {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovementOptions {
    #[serde(default)]
    forbid_moves: bool,
    #[serde(default)]
    forbid_zooming: bool,
    #[serde(default)]
    forbid_rotating: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuelResult {
    #[serde(default)]
    is_draw: bool,
    #[serde(default)]
    winning_team_id: Option<String>,
}

impl DuelResponse {
    fn into_outcome(self, duel_id: &str) -> DuelOutcome {
        let (is_draw, winning_team_id) = match self.result {
            Some(result) => (result.is_draw, result.winning_team_id),
            None => (false, None),
        };

        let mut outcome = DuelOutcome {
            duel_id: duel_id.to_string(),
            is_draw,
            rounds: self.current_round_number,
            ..Default::default()
        };

        if let Some(options) = self.options {
            outcome.map_name = options.map.map(|m| m.name).filter(|n| !n.is_empty());
            let movement = options.movement_options.unwrap_or_default();
            outcome.ruleset = Ruleset::from_movement(
                movement.forbid_moves,
                movement.forbid_rotating,
                movement.forbid_zooming,
            );
        }

        for team in self.teams {
            let players: Vec<DuelPlayer> = team
                .players
                .into_iter()
                .map(|p| DuelPlayer {
                    geoguessr_id: p.player_id,
                })
                .collect();
            if winning_team_id.as_deref() == Some(team.id.as_str()) {
                outcome.winning_players.extend(players);
            } else {
                outcome.losing_players.extend(players);
            }
        }

        outcome
    }
}
