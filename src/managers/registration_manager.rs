use chrono::{DateTime, Duration as ChronoDuration, Utc};
use poise::serenity_prelude::{self as serenity, GuildId, Http, UserId};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{BotError, Result};
use crate::external::{append_detached, parse_geoguessr_id, ResultSource, SharedSheetSink, Worksheet};
use crate::matchmaking::MatchmakingHandle;
use crate::messages::flag_to_emoji;
use crate::state::{Player, Team};

const NICKNAME_MAX_CHARS: usize = 32;

/// A flag that changed during a refresh
#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    pub discord_id: u64,
    pub previous: String,
    pub current: String,
}

/// Player registration, team formation and profile refresh
pub struct RegistrationManager {
    matchmaking: MatchmakingHandle,
    results: Arc<dyn ResultSource>,
    sheets: SharedSheetSink,
}

impl RegistrationManager {
    pub fn new(
        matchmaking: MatchmakingHandle,
        results: Arc<dyn ResultSource>,
        sheets: SharedSheetSink,
    ) -> Self {
        Self {
            matchmaking,
            results,
            sheets,
        }
    }

    /// Register a player from a GeoGuessr id or profile link.
    /// The profile has to exist; its flag and pro status are copied.
    pub async fn register(&self, discord_id: u64, surname: &str, geoguessr_input: &str) -> Result<Player> {
        if self.matchmaking.player(discord_id).await?.is_some() {
            return Err(BotError::AlreadyRegistered {
                discord_id: discord_id.to_string(),
            });
        }

        let geoguessr_id = parse_geoguessr_id(geoguessr_input);
        if geoguessr_id.is_empty() || !self.results.profile_exists(&geoguessr_id).await {
            return Err(BotError::InvalidProfile { geoguessr_id });
        }
        let profile = self.results.fetch_profile(&geoguessr_id).await?;

        info!(
            "GeoGuessr profile {} ({}) found for {}",
            profile.nick, profile.geoguessr_id, discord_id
        );
        let nick = profile.nick;
        let player = Player {
            discord_id: discord_id.to_string(),
            geoguessr_id: profile.geoguessr_id,
            surname: surname.trim().to_string(),
            flag: profile.flag,
            is_pro: profile.is_pro,
        };
        self.matchmaking.register_player(player.clone()).await?;
        info!("Player {} registered ({})", player.surname, player.geoguessr_id);

        append_detached(
            &self.sheets,
            Worksheet::Registrations,
            vec![
                player.discord_id.clone(),
                player.surname.clone(),
                player.geoguessr_id.clone(),
                nick,
                player.flag.clone(),
                player.is_pro.to_string(),
                Utc::now().to_rfc3339(),
            ],
        );
        Ok(player)
    }

    pub async fn create_team(&self, initiator: u64, partner: u64) -> Result<Team> {
        let team = self.matchmaking.create_team(initiator, partner).await?;
        append_detached(
            &self.sheets,
            Worksheet::Teams,
            vec![
                team.name.clone(),
                team.member1.surname.clone(),
                team.member2.surname.clone(),
                Utc::now().to_rfc3339(),
            ],
        );
        Ok(team)
    }

    /// Re-read every player's profile. Lookup failures leave the player untouched.
    pub async fn refresh_flags(&self) -> Result<Vec<FlagChange>> {
        let players = self.matchmaking.players().await?;
        let mut changes = Vec::new();

        for player in players {
            let Some(discord_id) = player.discord_id_u64() else {
                continue;
            };
            let profile = match self.results.fetch_profile(&player.geoguessr_id).await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!("Could not refresh profile of {}: {}", player.surname, e);
                    continue;
                }
            };
            if let Some(previous) = self
                .matchmaking
                .update_profile(discord_id, profile.flag.clone(), profile.is_pro)
                .await?
            {
                if previous != profile.flag {
                    changes.push(FlagChange {
                        discord_id,
                        previous,
                        current: profile.flag,
                    });
                }
            }
        }

        info!("Flag refresh done, {} flag(s) changed", changes.len());
        Ok(changes)
    }
}

pub type SharedRegistrationManager = Arc<RegistrationManager>;

/// Nickname carrying the flag emoji of `flag` in front, or `None` if it already does.
/// An emoji prefix for `previous` is replaced rather than stacked.
pub fn prefixed_nickname(display_name: &str, flag: &str, previous: Option<&str>) -> Option<String> {
    let prefix = format!("{} ", flag_to_emoji(flag));
    if display_name.starts_with(&prefix) {
        return None;
    }

    let bare = previous
        .map(|old| format!("{} ", flag_to_emoji(old)))
        .and_then(|old_prefix| display_name.strip_prefix(old_prefix.as_str()))
        .unwrap_or(display_name);

    Some(format!("{}{}", prefix, bare).chars().take(NICKNAME_MAX_CHARS).collect())
}

/// Put the flag emoji in front of a member's nickname
pub async fn apply_flag_prefix(
    http: &Http,
    guild_id: GuildId,
    user_id: UserId,
    flag: &str,
    previous: Option<&str>,
) -> Result<()> {
    let mut member = guild_id.member(http, user_id).await?;
    let Some(nickname) = prefixed_nickname(member.display_name(), flag, previous) else {
        return Ok(());
    };
    member
        .edit(http, serenity::EditMember::new().nickname(nickname))
        .await?;
    Ok(())
}

/// Next occurrence of `hour`:00 UTC strictly after `now`
pub fn next_refresh(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let Some(today) = now.date_naive().and_hms_opt(hour, 0, 0).map(|t| t.and_utc()) else {
        return now + ChronoDuration::days(1);
    };
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Refresh flags every day at `hour` UTC and fix nicknames of players whose flag changed
pub fn spawn_daily_flag_refresh(
    manager: SharedRegistrationManager,
    http: Arc<Http>,
    guild_id: GuildId,
    hour: u32,
) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_refresh(now, hour);
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next flag refresh at {}", next.format("%Y-%m-%d %H:%M UTC"));
            tokio::time::sleep(wait).await;

            let changes = match manager.refresh_flags().await {
                Ok(changes) => changes,
                Err(e) => {
                    error!("Flag refresh failed: {}", e);
                    continue;
                }
            };
            for change in changes {
                if let Err(e) = apply_flag_prefix(
                    &http,
                    guild_id,
                    UserId::new(change.discord_id),
                    &change.current,
                    Some(&change.previous),
                )
                .await
                {
                    warn!("Could not update nickname of {}: {}", change.discord_id, e);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::external::geoguessr::Profile;
    use crate::external::DuelOutcome;
    use crate::matchmaking::gateway::mock::RecordingGateway;
    use crate::matchmaking::{spawn, Matchmaker};
    use crate::state::{MatchmakingState, Registry};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubResults {
        profiles: Mutex<HashMap<String, Profile>>,
    }

    impl StubResults {
        fn with(self, id: &str, flag: &str, is_pro: bool) -> Self {
            self.profiles.lock().unwrap().insert(
                id.to_string(),
                Profile {
                    geoguessr_id: id.to_string(),
                    nick: id.to_string(),
                    flag: flag.to_string(),
                    is_pro,
                },
            );
            self
        }
    }

    #[async_trait]
    impl ResultSource for StubResults {
        async fn fetch_duel(&self, duel_id: &str) -> Result<DuelOutcome> {
            Err(BotError::ExternalApi {
                message: format!("no duel {}", duel_id),
            })
        }

        async fn fetch_profile(&self, geoguessr_id: &str) -> Result<Profile> {
            self.profiles
                .lock()
                .unwrap()
                .get(geoguessr_id)
                .cloned()
                .ok_or_else(|| BotError::InvalidProfile {
                    geoguessr_id: geoguessr_id.to_string(),
                })
        }
    }

    fn manager(results: Arc<StubResults>) -> RegistrationManager {
        let matchmaker = Matchmaker::new(
            Registry::new(),
            MatchmakingState::new(),
            &MatchmakingSettings::default(),
            Arc::new(RecordingGateway::default()),
            None,
        );
        RegistrationManager::new(
            spawn(matchmaker),
            results,
            Arc::new(crate::external::sheets::NoopSheetSink),
        )
    }

    #[tokio::test]
    async fn test_register_copies_profile() {
        let results = Arc::new(StubResults::default().with("abc", "fr", true));
        let manager = manager(results);

        let player = manager
            .register(1, " Alice ", "https://www.geoguessr.com/user/abc")
            .await
            .unwrap();
        assert_eq!(player.surname, "Alice");
        assert_eq!(player.geoguessr_id, "abc");
        assert_eq!(player.flag, "fr");
        assert!(player.is_pro);

        assert!(matches!(
            manager.register(1, "Alice", "abc").await,
            Err(BotError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_unknown_profile_fails_closed() {
        let manager = manager(Arc::new(StubResults::default()));
        assert!(matches!(
            manager.register(1, "Bob", "missing").await,
            Err(BotError::InvalidProfile { .. })
        ));
        assert!(manager.matchmaking.player(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_team_rules() {
        let results = Arc::new(
            StubResults::default()
                .with("a", "fr", false)
                .with("b", "de", false),
        );
        let manager = manager(results);
        manager.register(1, "A", "a").await.unwrap();

        assert!(matches!(manager.create_team(1, 1).await, Err(BotError::SelfPairing)));
        assert!(matches!(
            manager.create_team(1, 2).await,
            Err(BotError::NotRegistered { .. })
        ));

        manager.register(2, "B", "b").await.unwrap();
        let team = manager.create_team(1, 2).await.unwrap();
        assert_eq!(team.name, "1_2");
        assert!(matches!(
            manager.create_team(2, 1).await,
            Err(BotError::TeamExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_refresh_flags_reports_changes() {
        let results = Arc::new(
            StubResults::default()
                .with("a", "fr", false)
                .with("b", "de", false),
        );
        let manager = manager(results.clone());
        manager.register(1, "A", "a").await.unwrap();
        manager.register(2, "B", "b").await.unwrap();
        manager.create_team(1, 2).await.unwrap();

        results.profiles.lock().unwrap().get_mut("a").unwrap().flag = "be".into();
        results.profiles.lock().unwrap().get_mut("b").unwrap().is_pro = true;

        let changes = manager.refresh_flags().await.unwrap();
        assert_eq!(
            changes,
            vec![FlagChange {
                discord_id: 1,
                previous: "fr".into(),
                current: "be".into(),
            }]
        );
        let b = manager.matchmaking.player(2).await.unwrap().unwrap();
        assert!(b.is_pro);
    }

    #[test]
    fn test_prefixed_nickname() {
        assert_eq!(prefixed_nickname("Alice", "fr", None).as_deref(), Some("🇫🇷 Alice"));
        assert_eq!(prefixed_nickname("🇫🇷 Alice", "fr", None), None);
        assert_eq!(
            prefixed_nickname("🇫🇷 Alice", "be", Some("fr")).as_deref(),
            Some("🇧🇪 Alice")
        );
        let long = "x".repeat(40);
        assert_eq!(
            prefixed_nickname(&long, "fr", None).unwrap().chars().count(),
            NICKNAME_MAX_CHARS
        );
    }

    #[test]
    fn test_next_refresh() {
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        assert_eq!(
            next_refresh(before, 17),
            Utc.with_ymd_and_hms(2024, 3, 10, 17, 0, 0).unwrap()
        );

        let after = Utc.with_ymd_and_hms(2024, 3, 10, 17, 0, 0).unwrap();
        assert_eq!(
            next_refresh(after, 17),
            Utc.with_ymd_and_hms(2024, 3, 11, 17, 0, 0).unwrap()
        );
    }
}
