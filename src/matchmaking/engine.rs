use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::gateway::ChatGateway;
use super::selector::{all_candidates, Candidate, CountdownPolicy, Selector, SelectorAction, SelectorState};
use crate::config::MatchmakingSettings;
use crate::error::{BotError, Result};
use crate::external::DuelOutcome;
use crate::messages;
use crate::state::{Match, MatchStatus, MatchmakingState, PendingTeams, Player, Registry, Ruleset, Team};

/// Files the matchmaker snapshots to after every mutation
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub registry: PathBuf,
    pub matchmaking: PathBuf,
}

impl StatePaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            registry: dir.join("inscriptions.json"),
            matchmaking: dir.join("matchmaking.json"),
        }
    }
}

/// Result of a team becoming ready in a matchmaking vocal
#[derive(Debug, Clone, PartialEq)]
pub enum ReadyOutcome {
    Queued(Ruleset),
    AlreadyQueued(Ruleset),
    /// The two players share no ruleset role
    NotEligible,
    InMatch,
    UnknownTeam,
}

/// Why a match left the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    Result { duel_id: String },
    Abandoned { user_id: u64 },
    Staff,
    ChannelDeleted,
    Draw { duel_id: String },
}

impl CloseReason {
    fn describe(&self) -> String {
        match self {
            CloseReason::Result { duel_id } => format!("result of duel {}", duel_id),
            CloseReason::Abandoned { user_id } => format!("<@{}> left voice and did not come back", user_id),
            CloseReason::Staff => "closed by staff".to_string(),
            CloseReason::ChannelDeleted => "match channel deleted".to_string(),
            CloseReason::Draw { duel_id } => format!("duel {} ended in a draw", duel_id),
        }
    }
}

/// A duel result attributed to an open match
#[derive(Debug, Clone, PartialEq)]
pub struct DuelAttribution {
    /// On a draw, simply the first team of the match
    pub winner: String,
    pub loser: String,
    pub ruleset: Ruleset,
    /// False when the duel id had already been applied, and for draws
    pub recorded: bool,
    pub draw: bool,
    pub participants: Vec<u64>,
}

/// Queues, open matches and the running countdown, for display
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub pending: PendingTeams,
    pub matches: Vec<Match>,
    pub countdown: Option<(Candidate, Duration)>,
}

/// Owns every piece of matchmaking state. Only the scheduler task holds one,
/// so each method runs to completion before the next event is looked at.
pub struct Matchmaker {
    registry: Registry,
    state: MatchmakingState,
    selector: Selector,
    /// Voice channel of each queued team
    team_vocals: HashMap<String, u64>,
    /// Every ruleset each queued team may be paired under
    accepted_rulesets: HashMap<String, Vec<Ruleset>>,
    /// Participant of an open match -> when the match is cancelled unless they return
    grace_deadlines: HashMap<u64, Instant>,
    grace_period: Duration,
    gateway: Arc<dyn ChatGateway>,
    paths: Option<StatePaths>,
}

impl Matchmaker {
    pub fn new(
        registry: Registry,
        state: MatchmakingState,
        settings: &MatchmakingSettings,
        gateway: Arc<dyn ChatGateway>,
        paths: Option<StatePaths>,
    ) -> Self {
        Self {
            registry,
            state,
            selector: Selector::new(CountdownPolicy::from_settings(settings)),
            team_vocals: HashMap::new(),
            accepted_rulesets: HashMap::new(),
            grace_deadlines: HashMap::new(),
            grace_period: settings.grace_period,
            gateway,
            paths,
        }
    }

    /// Load both documents from `dir`, starting empty when they are missing
    pub async fn load(
        dir: &Path,
        settings: &MatchmakingSettings,
        gateway: Arc<dyn ChatGateway>,
    ) -> Result<Self> {
        let paths = StatePaths::in_dir(dir);
        let registry = Registry::load(&paths.registry).await?;
        let mut state = MatchmakingState::load(&paths.matchmaking).await?;

        // Voice presence does not survive a restart
        if !state.pending_teams.is_empty() {
            warn!(
                "Dropping {} queued team(s) left over from the previous run",
                state.pending_teams.len()
            );
            state.pending_teams = PendingTeams::default();
        }

        info!(
            "Matchmaking state loaded: {} players, {} teams, {} open matches",
            registry.players.len(),
            registry.teams.len(),
            state.current_matches.len()
        );
        Ok(Self::new(registry, state, settings, gateway, Some(paths)))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> &MatchmakingState {
        &self.state
    }

    /// Earliest instant at which `on_timer` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let grace = self.grace_deadlines.values().min().copied();
        match (self.selector.deadline(), grace) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn snapshot(&self, now: Instant) -> QueueSnapshot {
        let countdown = match self.selector.state() {
            SelectorState::Committed {
                candidate,
                deadline,
            } => Some((candidate.clone(), deadline.saturating_duration_since(now))),
            _ => None,
        };
        QueueSnapshot {
            pending: self.state.pending_teams.clone(),
            matches: self.state.current_matches.clone(),
            countdown,
        }
    }

    // Registry

    pub fn player(&self, discord_id: u64) -> Option<Player> {
        self.registry.player(discord_id).cloned()
    }

    pub fn players(&self) -> Vec<Player> {
        self.registry.players.values().cloned().collect()
    }

    pub async fn register_player(&mut self, player: Player) -> Result<()> {
        self.registry.register_player(player)?;
        self.persist().await;
        Ok(())
    }

    pub async fn create_team(&mut self, initiator: u64, partner: u64) -> Result<Team> {
        let team = self.registry.create_team(initiator, partner)?;
        self.persist().await;
        info!("Team {} created", team.name);
        Ok(team)
    }

    /// Returns the previous flag if the profile changed
    pub async fn update_profile(&mut self, discord_id: u64, flag: &str, is_pro: bool) -> Option<String> {
        let previous = self.registry.update_profile(discord_id, flag, is_pro);
        if previous.is_some() {
            self.persist().await;
        }
        previous
    }

    /// The registered team made of exactly these members, if any
    pub fn team_of_members(&self, members: &[u64]) -> Option<String> {
        match members {
            [a, b] => self.registry.team_of_pair(*a, *b).map(|t| t.name.clone()),
            _ => None,
        }
    }

    // Queue

    /// A team is together in a matchmaking vocal. `eligible` lists the
    /// rulesets both players opted into.
    pub async fn team_ready(
        &mut self,
        team_name: &str,
        voice_channel_id: u64,
        eligible: &[Ruleset],
        now: Instant,
    ) -> ReadyOutcome {
        let Some(team) = self.registry.team(team_name).cloned() else {
            warn!("Ready event for unknown team {}", team_name);
            return ReadyOutcome::UnknownTeam;
        };

        if let Some(user_id) = team
            .member_ids()
            .into_iter()
            .find(|id| self.state.open_match_of_user(*id).is_some())
        {
            info!(
                "**{}** not queued, <@{}> is still in an open match",
                team_name, user_id
            );
            return ReadyOutcome::InMatch;
        }

        if let Some(ruleset) = self.state.pending_teams.ruleset_of(team_name) {
            self.team_vocals.insert(team_name.to_string(), voice_channel_id);
            return ReadyOutcome::AlreadyQueued(ruleset);
        }

        let accepts: Vec<Ruleset> = Ruleset::ALL
            .into_iter()
            .filter(|r| eligible.contains(r))
            .collect();
        let Some(ruleset) = accepts.first().copied() else {
            info!(
                "**{}** not added to queue because neither both players are NM nor NMPZ",
                team_name
            );
            let content = messages::not_eligible_message();
            for user_id in team.member_ids() {
                if let Err(e) = self.gateway.send_dm(user_id, &content).await {
                    debug!("Could not DM {}: {}", user_id, e);
                }
            }
            return ReadyOutcome::NotEligible;
        };

        self.state.pending_teams.enqueue(team_name, ruleset);
        self.team_vocals.insert(team_name.to_string(), voice_channel_id);
        info!(
            "**{}** added to {} queue (plays {})",
            team_name,
            ruleset,
            accepts.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
        );
        self.accepted_rulesets.insert(team_name.to_string(), accepts);

        self.run_selection(now).await;
        self.persist().await;
        ReadyOutcome::Queued(ruleset)
    }

    /// A member left a matchmaking vocal or an open match's voice channel
    pub async fn member_left_voice(&mut self, user_id: u64, now: Instant) {
        if let Some(team) = self.state.pending_teams.team_with_member(user_id).cloned() {
            self.state.pending_teams.remove(&team);
            self.team_vocals.remove(&team);
            self.accepted_rulesets.remove(&team);
            info!("**{}** removed from queue", team);

            if self.selector.cancel_if_involves(&team) {
                info!("Countdown involving **{}** cancelled", team);
                self.run_selection(now).await;
            }
            self.persist().await;
        }

        if let Some(open) = self.state.open_match_of_user(user_id) {
            let deadline = now + self.grace_period;
            info!(
                "<@{}> left during match {} vs {}, cancelling in {}s unless they come back",
                user_id,
                open.team1,
                open.team2,
                self.grace_period.as_secs()
            );
            self.grace_deadlines.insert(user_id, deadline);
        }
    }

    /// A member joined `channel_id`. Coming back cancels a pending grace
    /// deadline, unless the channel is another matchmaking vocal than the
    /// ones of their match.
    pub fn member_joined_voice(&mut self, user_id: u64, channel_id: u64, matchmaking_vocal: bool) {
        if !self.grace_deadlines.contains_key(&user_id) {
            return;
        }
        let own_vocal = self
            .state
            .open_match_of_user(user_id)
            .is_some_and(|m| m.voice_channel_ids.contains(&channel_id));
        if matchmaking_vocal && !own_vocal {
            debug!("<@{}> joined matchmaking vocal {} during a match", user_id, channel_id);
            return;
        }
        self.grace_deadlines.remove(&user_id);
        info!("<@{}> is back in voice", user_id);
    }

    /// Fire whatever timer has elapsed
    pub async fn on_timer(&mut self, now: Instant) {
        if let Some(candidate) = self.selector.poll(now) {
            info!(
                "No better match found, launching a match between {} and {}",
                candidate.team_a, candidate.team_b
            );
            if let Err(e) = self.commit(candidate).await {
                error!("Failed to open match: {}", e);
            }
            self.run_selection(now).await;
        }

        let expired: Vec<u64> = self
            .grace_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(user, _)| *user)
            .collect();
        for user_id in expired {
            self.grace_deadlines.remove(&user_id);
            let Some(team) = self.state.open_match_of_user(user_id).map(|m| m.team1.clone()) else {
                continue;
            };
            if let Err(e) = self
                .close_match(&team, CloseReason::Abandoned { user_id })
                .await
            {
                error!("Failed to close abandoned match of {}: {}", team, e);
            }
        }

        self.persist().await;
    }

    /// Recompute candidates and commit every immediately-committable pair.
    /// Stops at the first candidate that has to wait, or when none is left.
    async fn run_selection(&mut self, now: Instant) {
        loop {
            let candidates = all_candidates(
                &self.state.pending_teams,
                &self.accepted_rulesets,
                &self.registry,
            );
            match self.selector.evaluate(candidates, now) {
                SelectorAction::Commit(candidate) => {
                    info!(
                        "Match seeking done, best score: {:.2}, launching {} vs {} now",
                        candidate.score, candidate.team_a, candidate.team_b
                    );
                    if let Err(e) = self.commit(candidate).await {
                        error!("Failed to open match: {}", e);
                        break;
                    }
                }
                SelectorAction::Wait(deadline) => {
                    if let SelectorState::Committed { candidate, .. } = self.selector.state() {
                        info!(
                            "Match seeking done, best score: {:.2}, waiting for {} seconds to see if another match is available",
                            candidate.score,
                            deadline.saturating_duration_since(now).as_secs()
                        );
                    }
                    break;
                }
                SelectorAction::Idle => {
                    if !self.state.pending_teams.is_empty() {
                        info!("No match available");
                    }
                    break;
                }
            }
        }
    }

    /// Pull both teams out of every queue and open their match
    async fn commit(&mut self, candidate: Candidate) -> Result<()> {
        for team in [&candidate.team_a, &candidate.team_b] {
            self.state.pending_teams.remove(team);
            self.accepted_rulesets.remove(team);
        }

        let team_a = self.team_cloned(&candidate.team_a)?;
        let team_b = self.team_cloned(&candidate.team_b)?;

        let users_ids: Vec<u64> = team_a
            .member_ids()
            .into_iter()
            .chain(team_b.member_ids())
            .collect();

        let text_channel_id = match self
            .gateway
            .create_match_channel(&messages::match_channel_name(&team_a, &team_b), &users_ids)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Could not create match channel for {} vs {}: {}", team_a.name, team_b.name, e);
                None
            }
        };

        let mut voice_channel_ids = Vec::new();
        for team in [&team_a, &team_b] {
            let Some(channel_id) = self.team_vocals.remove(&team.name) else {
                continue;
            };
            if let Err(e) = self
                .gateway
                .rename_channel(channel_id, &messages::match_pending_channel_name(&team.name))
                .await
            {
                debug!("Could not rename vocal {}: {}", channel_id, e);
            }
            voice_channel_ids.push(channel_id);
        }

        if let Some(channel_id) = text_channel_id {
            let announcement =
                messages::match_announcement(&team_a, &team_b, candidate.ruleset, &users_ids);
            if let Err(e) = self.gateway.send_message(channel_id, &announcement).await {
                debug!("Could not announce match in {}: {}", channel_id, e);
            }
        }

        self.state.open(Match {
            team1: team_a.name.clone(),
            team2: team_b.name.clone(),
            users_ids,
            match_type: candidate.ruleset,
            text_channel_id,
            voice_channel_ids,
            status: MatchStatus::Open,
            opened_at: chrono::Utc::now().timestamp(),
        });
        info!(
            "Match opened: **{}** vs **{}** ({}, score {:.2})",
            team_a.name, team_b.name, candidate.ruleset, candidate.score
        );

        self.persist().await;
        Ok(())
    }

    // Ledger

    pub async fn close_match(&mut self, team: &str, reason: CloseReason) -> Result<Match> {
        let closed = self.state.close(team).ok_or_else(|| BotError::MatchNotFound {
            what: team.to_string(),
        })?;
        for user_id in &closed.users_ids {
            self.grace_deadlines.remove(user_id);
        }

        if let Some(channel_id) = closed.text_channel_id {
            if reason != CloseReason::ChannelDeleted {
                if let Err(e) = self.gateway.delete_channel(channel_id).await {
                    warn!("Could not delete match channel {}: {}", channel_id, e);
                }
            }
        }

        if matches!(reason, CloseReason::Abandoned { .. } | CloseReason::Staff) {
            let content = messages::match_cancelled_message(&reason.describe());
            for user_id in &closed.users_ids {
                if let Err(e) = self.gateway.send_dm(*user_id, &content).await {
                    debug!("Could not DM {}: {}", user_id, e);
                }
            }
        }

        info!(
            "Match {} vs {} closed: {}",
            closed.team1,
            closed.team2,
            reason.describe()
        );
        self.persist().await;
        Ok(closed)
    }

    pub async fn close_match_of_channel(&mut self, channel_id: u64) -> Option<Match> {
        let team = self.state.open_match_of_channel(channel_id)?.team1.clone();
        self.close_match(&team, CloseReason::ChannelDeleted).await.ok()
    }

    /// Attribute a duel to the open match of `author_id` and record it once.
    ///
    /// `Ok(None)` when the author is in no open match: nothing is touched.
    pub async fn apply_result(
        &mut self,
        duel_id: &str,
        author_id: u64,
        outcome: &DuelOutcome,
    ) -> Result<Option<DuelAttribution>> {
        let Some(record) = self.state.open_match_of_user(author_id).cloned() else {
            info!("Can't find a match with the user id: `{}`", author_id);
            return Ok(None);
        };

        let team1 = self.team_cloned(&record.team1)?;
        let team2 = self.team_cloned(&record.team2)?;

        if outcome.is_draw {
            return self.close_drawn(duel_id, record, team1, team2, outcome).await;
        }

        let winners: HashSet<&str> = outcome.winner_ids().collect();
        let has_winner = |team: &Team| {
            team.members()
                .iter()
                .any(|p| winners.contains(p.geoguessr_id.as_str()))
        };
        let (winner, loser) = match (has_winner(&team1), has_winner(&team2)) {
            (true, false) => (team1, team2),
            (false, true) => (team2, team1),
            _ => {
                return Err(BotError::UnattributableResult {
                    duel_id: duel_id.to_string(),
                })
            }
        };

        let recorded = self
            .registry
            .record_duel(&winner.name, &loser.name, duel_id, record.match_type)?;
        if recorded {
            info!("Duel {}: **{}** beat **{}**", duel_id, winner.name, loser.name);
        } else {
            info!("Duel {} was already recorded", duel_id);
        }

        self.close_match(
            &record.team1,
            CloseReason::Result {
                duel_id: duel_id.to_string(),
            },
        )
        .await?;

        Ok(Some(DuelAttribution {
            winner: winner.name,
            loser: loser.name,
            ruleset: record.match_type,
            recorded,
            draw: false,
            participants: record.users_ids,
        }))
    }

    /// A drawn duel closes the match without touching either history, as
    /// long as both teams actually played it
    async fn close_drawn(
        &mut self,
        duel_id: &str,
        record: Match,
        team1: Team,
        team2: Team,
        outcome: &DuelOutcome,
    ) -> Result<Option<DuelAttribution>> {
        let players: HashSet<&str> = outcome.player_ids().collect();
        let played = |team: &Team| {
            team.members()
                .iter()
                .any(|p| players.contains(p.geoguessr_id.as_str()))
        };
        if !played(&team1) || !played(&team2) {
            return Err(BotError::UnattributableResult {
                duel_id: duel_id.to_string(),
            });
        }

        info!("Duel {}: **{}** and **{}** drew", duel_id, team1.name, team2.name);
        self.close_match(
            &record.team1,
            CloseReason::Draw {
                duel_id: duel_id.to_string(),
            },
        )
        .await?;

        Ok(Some(DuelAttribution {
            winner: team1.name,
            loser: team2.name,
            ruleset: record.match_type,
            recorded: false,
            draw: true,
            participants: record.users_ids,
        }))
    }

    fn team_cloned(&self, name: &str) -> Result<Team> {
        self.registry
            .team(name)
            .cloned()
            .ok_or_else(|| BotError::TeamNotFound {
                team: name.to_string(),
            })
    }

    async fn persist(&self) {
        let Some(paths) = &self.paths else {
            return;
        };
        if let Err(e) = self.registry.save(&paths.registry).await {
            error!("Failed to save registry: {}", e);
        }
        if let Err(e) = self.state.save(&paths.matchmaking).await {
            error!("Failed to save matchmaking state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::geoguessr::DuelPlayer;
    use crate::matchmaking::gateway::mock::{GatewayCall, RecordingGateway};
    use crate::matchmaking::scorer::tests::player;

    const ALL: &[Ruleset] = &[Ruleset::Nm, Ruleset::Nmpz];

    fn matchmaker_with(gateway: Arc<RecordingGateway>) -> Matchmaker {
        let mut registry = Registry::new();
        for (id, flag, pro) in [
            (100, "fr", true),
            (200, "fr", false),
            (300, "de", false),
            (400, "be", false),
            (500, "fr", false),
            (600, "fr", false),
        ] {
            registry.register_player(player(id, flag, pro)).unwrap();
        }
        registry.create_team(100, 200).unwrap();
        registry.create_team(300, 400).unwrap();
        registry.create_team(500, 600).unwrap();
        Matchmaker::new(
            registry,
            MatchmakingState::new(),
            &MatchmakingSettings::default(),
            gateway,
            None,
        )
    }

    fn outcome(duel_id: &str, winners: &[&str], losers: &[&str]) -> DuelOutcome {
        let players = |ids: &[&str]| {
            ids.iter()
                .map(|id| DuelPlayer {
                    geoguessr_id: id.to_string(),
                })
                .collect()
        };
        DuelOutcome {
            duel_id: duel_id.to_string(),
            winning_players: players(winners),
            losing_players: players(losers),
            ..Default::default()
        }
    }

    async fn opened_match(mm: &mut Matchmaker, now: Instant) {
        mm.team_ready("100_200", 10, ALL, now).await;
        mm.team_ready("300_400", 11, ALL, now).await;
        assert_eq!(mm.state().current_matches.len(), 1);
    }

    #[tokio::test]
    async fn test_perfect_pair_opens_immediately() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        let now = Instant::now();

        assert_eq!(
            mm.team_ready("100_200", 10, ALL, now).await,
            ReadyOutcome::Queued(Ruleset::Nm)
        );
        assert!(mm.state().current_matches.is_empty());

        mm.team_ready("300_400", 11, ALL, now).await;
        assert!(mm.state().pending_teams.is_empty());

        let opened = &mm.state().current_matches[0];
        assert_eq!(opened.team1, "100_200");
        assert_eq!(opened.team2, "300_400");
        assert_eq!(opened.users_ids, vec![100, 200, 300, 400]);
        assert_eq!(opened.text_channel_id, Some(1000));
        assert_eq!(opened.voice_channel_ids, vec![10, 11]);
        assert_eq!(gateway.created_channels(), 1);
        assert!(gateway.calls().contains(&GatewayCall::Rename {
            channel_id: 10,
            name: "Match pending - 100_200".into()
        }));
        assert_eq!(mm.next_deadline(), None);
    }

    #[tokio::test]
    async fn test_not_eligible_team_is_notified_and_not_queued() {
        let gateway = Arc::new(RecordingGateway::failing_dms());
        let mut mm = matchmaker_with(gateway.clone());

        let outcome = mm.team_ready("100_200", 10, &[], Instant::now()).await;
        assert_eq!(outcome, ReadyOutcome::NotEligible);
        assert!(mm.state().pending_teams.is_empty());
        let dms: Vec<_> = gateway
            .calls()
            .into_iter()
            .filter(|c| matches!(c, GatewayCall::Dm { .. }))
            .collect();
        assert_eq!(dms.len(), 2);
    }

    #[tokio::test]
    async fn test_team_in_open_match_is_not_requeued() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;

        assert_eq!(
            mm.team_ready("100_200", 12, ALL, now).await,
            ReadyOutcome::InMatch
        );
        assert!(mm.state().pending_teams.is_empty());
    }

    #[tokio::test]
    async fn test_marginal_pair_waits_for_countdown() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        mm.registry.teams.get_mut("300_400").unwrap().previous_opponents =
            vec!["100_200".into()];
        mm.registry.teams.get_mut("100_200").unwrap().previous_opponents =
            vec!["300_400".into()];
        let now = Instant::now();

        mm.team_ready("100_200", 10, ALL, now).await;
        mm.team_ready("300_400", 11, ALL, now).await;

        // score 0.2 -> capped 60s countdown
        assert_eq!(mm.next_deadline(), Some(now + Duration::from_secs(60)));
        assert!(mm.state().current_matches.is_empty());

        mm.on_timer(now + Duration::from_secs(30)).await;
        assert!(mm.state().current_matches.is_empty());

        mm.on_timer(now + Duration::from_secs(60)).await;
        assert_eq!(mm.state().current_matches.len(), 1);
        assert!(mm.state().pending_teams.is_empty());
        assert_eq!(gateway.created_channels(), 1);
    }

    #[tokio::test]
    async fn test_leaving_cancels_countdown() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        mm.registry.teams.get_mut("300_400").unwrap().previous_opponents =
            vec!["100_200".into()];
        let now = Instant::now();

        mm.team_ready("100_200", 10, ALL, now).await;
        mm.team_ready("300_400", 11, ALL, now).await;
        assert!(mm.next_deadline().is_some());

        mm.member_left_voice(400, now).await;
        assert_eq!(mm.next_deadline(), None);
        assert_eq!(mm.state().pending_teams.nm, vec!["100_200"]);

        mm.on_timer(now + Duration::from_secs(120)).await;
        assert!(mm.state().current_matches.is_empty());
        assert_eq!(gateway.created_channels(), 0);
    }

    #[tokio::test]
    async fn test_apply_result_records_once_and_closes() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        let now = Instant::now();
        opened_match(&mut mm, now).await;

        let duel = outcome("d-1", &["gg300", "gg400"], &["gg100", "gg200"]);
        let attribution = mm.apply_result("d-1", 200, &duel).await.unwrap().unwrap();
        assert_eq!(attribution.winner, "300_400");
        assert_eq!(attribution.loser, "100_200");
        assert!(attribution.recorded);
        assert!(mm.state().current_matches.is_empty());
        assert!(gateway
            .calls()
            .contains(&GatewayCall::Delete { channel_id: 1000 }));

        let winner = mm.registry().team("300_400").unwrap().clone();
        assert_eq!(winner.score, vec!["1"]);
        assert_eq!(winner.previous_opponents, vec!["100_200"]);
        assert_eq!(winner.last_gamemode, Some(Ruleset::Nm));

        // Same duel again: no match left and history untouched
        assert_eq!(mm.apply_result("d-1", 200, &duel).await.unwrap(), None);
        assert_eq!(mm.registry().team("300_400").unwrap(), &winner);
    }

    #[tokio::test]
    async fn test_duel_seen_twice_across_matches_recorded_once() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        let duel = outcome("d-1", &["gg100"], &["gg300"]);

        opened_match(&mut mm, now).await;
        mm.apply_result("d-1", 100, &duel).await.unwrap();

        // 0.1 + 0.1 rematch score waits, force it through
        mm.team_ready("100_200", 10, ALL, now).await;
        mm.team_ready("300_400", 11, ALL, now).await;
        mm.on_timer(now + Duration::from_secs(60)).await;
        assert_eq!(mm.state().current_matches.len(), 1);

        let attribution = mm.apply_result("d-1", 300, &duel).await.unwrap().unwrap();
        assert!(!attribution.recorded);
        assert_eq!(mm.registry().team("100_200").unwrap().score, vec!["1"]);
        assert!(mm.state().current_matches.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_match_leaves_registry_unchanged() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let before = mm.registry().teams.clone();

        let duel = outcome("d-9", &["gg100"], &["gg300"]);
        assert_eq!(mm.apply_result("d-9", 100, &duel).await.unwrap(), None);
        assert_eq!(mm.registry().teams, before);
    }

    #[tokio::test]
    async fn test_unattributable_result_keeps_match_open() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;
        let before = mm.registry().teams.clone();

        let duel = outcome("d-2", &["stranger"], &["gg100"]);
        assert!(matches!(
            mm.apply_result("d-2", 100, &duel).await,
            Err(BotError::UnattributableResult { .. })
        ));
        assert_eq!(mm.registry().teams, before);
        assert_eq!(mm.state().current_matches.len(), 1);
    }

    #[tokio::test]
    async fn test_grace_period_closes_abandoned_match() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        let now = Instant::now();
        opened_match(&mut mm, now).await;

        mm.member_left_voice(300, now).await;
        assert_eq!(mm.next_deadline(), Some(now + Duration::from_secs(120)));

        mm.on_timer(now + Duration::from_secs(119)).await;
        assert_eq!(mm.state().current_matches.len(), 1);

        mm.on_timer(now + Duration::from_secs(120)).await;
        assert!(mm.state().current_matches.is_empty());
        assert_eq!(mm.next_deadline(), None);
    }

    #[tokio::test]
    async fn test_returning_member_keeps_match_open() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;

        mm.member_left_voice(300, now).await;
        mm.member_joined_voice(300, 11, true);
        mm.on_timer(now + Duration::from_secs(600)).await;
        assert_eq!(mm.state().current_matches.len(), 1);
    }

    #[tokio::test]
    async fn test_joining_other_channel_cancels_grace() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;

        mm.member_left_voice(300, now).await;
        mm.member_joined_voice(300, 77, false);
        assert_eq!(mm.next_deadline(), None);
    }

    #[tokio::test]
    async fn test_member_in_open_match_cannot_queue_with_new_mate() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;
        mm.registry.create_team(100, 500).unwrap();

        // Walks out of the match into a waiting vocal with someone else
        mm.member_left_voice(100, now).await;
        mm.member_joined_voice(100, 50, true);
        assert_eq!(mm.next_deadline(), Some(now + Duration::from_secs(120)));

        assert_eq!(
            mm.team_ready("100_500", 50, ALL, now).await,
            ReadyOutcome::InMatch
        );
        assert!(mm.state().pending_teams.is_empty());
        assert_eq!(mm.state().current_matches.len(), 1);
    }

    #[tokio::test]
    async fn test_dual_role_team_meets_single_role_team() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();

        assert_eq!(
            mm.team_ready("100_200", 10, ALL, now).await,
            ReadyOutcome::Queued(Ruleset::Nm)
        );
        assert_eq!(
            mm.team_ready("300_400", 11, &[Ruleset::Nmpz], now).await,
            ReadyOutcome::Queued(Ruleset::Nmpz)
        );

        assert!(mm.state().pending_teams.is_empty());
        let opened = &mm.state().current_matches[0];
        assert_eq!(opened.match_type, Ruleset::Nmpz);
        assert_eq!(opened.team1, "100_200");
        assert_eq!(opened.team2, "300_400");
    }

    #[tokio::test]
    async fn test_draw_closes_match_without_recording() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway);
        let now = Instant::now();
        opened_match(&mut mm, now).await;
        let before = mm.registry().teams.clone();

        let mut elsewhere = outcome("d-4", &[], &["gg100", "stranger"]);
        elsewhere.is_draw = true;
        assert!(matches!(
            mm.apply_result("d-4", 100, &elsewhere).await,
            Err(BotError::UnattributableResult { .. })
        ));
        assert_eq!(mm.state().current_matches.len(), 1);

        let mut draw = outcome("d-3", &[], &["gg100", "gg200", "gg300", "gg400"]);
        draw.is_draw = true;
        let attribution = mm.apply_result("d-3", 100, &draw).await.unwrap().unwrap();
        assert!(attribution.draw);
        assert!(!attribution.recorded);
        assert!(mm.state().current_matches.is_empty());
        assert_eq!(mm.registry().teams, before);
    }

    #[tokio::test]
    async fn test_channel_deletion_closes_without_deleting_again() {
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        opened_match(&mut mm, Instant::now()).await;

        let closed = mm.close_match_of_channel(1000).await.unwrap();
        assert_eq!(closed.status, MatchStatus::Closed);
        assert!(!gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::Delete { .. })));
        assert!(mm.close_match_of_channel(1000).await.is_none());
    }

    #[tokio::test]
    async fn test_team_of_members_either_order() {
        let gateway = Arc::new(RecordingGateway::default());
        let mm = matchmaker_with(gateway);
        assert_eq!(mm.team_of_members(&[400, 300]).as_deref(), Some("300_400"));
        assert_eq!(mm.team_of_members(&[100, 300]), None);
        assert_eq!(mm.team_of_members(&[100]), None);
    }

    #[tokio::test]
    async fn test_state_is_persisted_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(RecordingGateway::default());
        let mut mm = matchmaker_with(gateway.clone());
        mm.paths = Some(StatePaths::in_dir(dir.path()));
        opened_match(&mut mm, Instant::now()).await;

        let reloaded = Matchmaker::load(dir.path(), &MatchmakingSettings::default(), gateway)
            .await
            .unwrap();
        assert_eq!(reloaded.state().current_matches.len(), 1);
        assert_eq!(reloaded.registry().teams.len(), 3);
    }
}
