//! Actor task that owns the [`Matchmaker`].
//!
//! Discord events and commands reach it through a [`MatchmakingHandle`];
//! countdowns and grace periods are timers in the same `select!` loop, so
//! every state change happens on one task, in arrival order.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::engine::{CloseReason, DuelAttribution, Matchmaker, QueueSnapshot, ReadyOutcome};
use crate::error::{BotError, Result};
use crate::external::DuelOutcome;
use crate::state::{Match, Player, Ruleset, Team};

/// Sleep target when nothing is scheduled
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

pub enum MatchmakingCommand {
    TeamReady {
        team: String,
        voice_channel_id: u64,
        eligible: Vec<Ruleset>,
        reply: oneshot::Sender<ReadyOutcome>,
    },
    MemberLeft {
        user_id: u64,
    },
    MemberJoined {
        user_id: u64,
        channel_id: u64,
        matchmaking_vocal: bool,
    },
    TeamOfMembers {
        members: Vec<u64>,
        reply: oneshot::Sender<Option<String>>,
    },
    ApplyResult {
        duel_id: String,
        author_id: u64,
        outcome: Box<DuelOutcome>,
        reply: oneshot::Sender<Result<Option<DuelAttribution>>>,
    },
    CloseMatch {
        team: String,
        reply: oneshot::Sender<Result<Match>>,
    },
    ChannelDeleted {
        channel_id: u64,
    },
    RegisterPlayer {
        player: Player,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateTeam {
        initiator: u64,
        partner: u64,
        reply: oneshot::Sender<Result<Team>>,
    },
    UpdateProfile {
        discord_id: u64,
        flag: String,
        is_pro: bool,
        reply: oneshot::Sender<Option<String>>,
    },
    GetPlayer {
        discord_id: u64,
        reply: oneshot::Sender<Option<Player>>,
    },
    ListPlayers {
        reply: oneshot::Sender<Vec<Player>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
}

/// Cloneable front door to the matchmaking task
#[derive(Clone)]
pub struct MatchmakingHandle {
    tx: mpsc::UnboundedSender<MatchmakingCommand>,
}

impl MatchmakingHandle {
    fn send(&self, command: MatchmakingCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| BotError::SchedulerUnavailable)
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> MatchmakingCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| BotError::SchedulerUnavailable)
    }

    pub async fn team_ready(
        &self,
        team: String,
        voice_channel_id: u64,
        eligible: Vec<Ruleset>,
    ) -> Result<ReadyOutcome> {
        self.ask(|reply| MatchmakingCommand::TeamReady {
            team,
            voice_channel_id,
            eligible,
            reply,
        })
        .await
    }

    pub fn member_left(&self, user_id: u64) -> Result<()> {
        self.send(MatchmakingCommand::MemberLeft { user_id })
    }

    pub fn member_joined(&self, user_id: u64, channel_id: u64, matchmaking_vocal: bool) -> Result<()> {
        self.send(MatchmakingCommand::MemberJoined {
            user_id,
            channel_id,
            matchmaking_vocal,
        })
    }

    pub async fn team_of_members(&self, members: Vec<u64>) -> Result<Option<String>> {
        self.ask(|reply| MatchmakingCommand::TeamOfMembers { members, reply })
            .await
    }

    pub async fn apply_result(
        &self,
        duel_id: String,
        author_id: u64,
        outcome: DuelOutcome,
    ) -> Result<Option<DuelAttribution>> {
        self.ask(|reply| MatchmakingCommand::ApplyResult {
            duel_id,
            author_id,
            outcome: Box::new(outcome),
            reply,
        })
        .await?
    }

    pub async fn close_match(&self, team: String) -> Result<Match> {
        self.ask(|reply| MatchmakingCommand::CloseMatch { team, reply })
            .await?
    }

    pub fn channel_deleted(&self, channel_id: u64) -> Result<()> {
        self.send(MatchmakingCommand::ChannelDeleted { channel_id })
    }

    pub async fn register_player(&self, player: Player) -> Result<()> {
        self.ask(|reply| MatchmakingCommand::RegisterPlayer { player, reply })
            .await?
    }

    pub async fn create_team(&self, initiator: u64, partner: u64) -> Result<Team> {
        self.ask(|reply| MatchmakingCommand::CreateTeam {
            initiator,
            partner,
            reply,
        })
        .await?
    }

    pub async fn update_profile(
        &self,
        discord_id: u64,
        flag: String,
        is_pro: bool,
    ) -> Result<Option<String>> {
        self.ask(|reply| MatchmakingCommand::UpdateProfile {
            discord_id,
            flag,
            is_pro,
            reply,
        })
        .await
    }

    pub async fn player(&self, discord_id: u64) -> Result<Option<Player>> {
        self.ask(|reply| MatchmakingCommand::GetPlayer { discord_id, reply })
            .await
    }

    pub async fn players(&self) -> Result<Vec<Player>> {
        self.ask(|reply| MatchmakingCommand::ListPlayers { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.ask(|reply| MatchmakingCommand::Snapshot { reply })
            .await
    }
}

/// Start the matchmaking task
pub fn spawn(matchmaker: Matchmaker) -> MatchmakingHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(matchmaker, rx));
    MatchmakingHandle { tx }
}

async fn run(mut matchmaker: Matchmaker, mut rx: mpsc::UnboundedReceiver<MatchmakingCommand>) {
    info!("Matchmaking scheduler started");
    loop {
        let wakeup = matchmaker
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                handle(&mut matchmaker, command).await;
            }
            _ = sleep_until(wakeup) => {
                matchmaker.on_timer(Instant::now()).await;
            }
        }
    }
    info!("Matchmaking scheduler stopped");
}

async fn handle(matchmaker: &mut Matchmaker, command: MatchmakingCommand) {
    // A dropped receiver only means the caller gave up waiting
    match command {
        MatchmakingCommand::TeamReady {
            team,
            voice_channel_id,
            eligible,
            reply,
        } => {
            let outcome = matchmaker
                .team_ready(&team, voice_channel_id, &eligible, Instant::now())
                .await;
            let _ = reply.send(outcome);
        }
        MatchmakingCommand::MemberLeft { user_id } => {
            matchmaker.member_left_voice(user_id, Instant::now()).await;
        }
        MatchmakingCommand::MemberJoined {
            user_id,
            channel_id,
            matchmaking_vocal,
        } => {
            matchmaker.member_joined_voice(user_id, channel_id, matchmaking_vocal);
        }
        MatchmakingCommand::TeamOfMembers { members, reply } => {
            let _ = reply.send(matchmaker.team_of_members(&members));
        }
        MatchmakingCommand::ApplyResult {
            duel_id,
            author_id,
            outcome,
            reply,
        } => {
            let result = matchmaker.apply_result(&duel_id, author_id, &outcome).await;
            let _ = reply.send(result);
        }
        MatchmakingCommand::CloseMatch { team, reply } => {
            let result = matchmaker.close_match(&team, CloseReason::Staff).await;
            let _ = reply.send(result);
        }
        MatchmakingCommand::ChannelDeleted { channel_id } => {
            if let Some(closed) = matchmaker.close_match_of_channel(channel_id).await {
                debug!("Channel {} belonged to {} vs {}", channel_id, closed.team1, closed.team2);
            }
        }
        MatchmakingCommand::RegisterPlayer { player, reply } => {
            let _ = reply.send(matchmaker.register_player(player).await);
        }
        MatchmakingCommand::CreateTeam {
            initiator,
            partner,
            reply,
        } => {
            let _ = reply.send(matchmaker.create_team(initiator, partner).await);
        }
        MatchmakingCommand::UpdateProfile {
            discord_id,
            flag,
            is_pro,
            reply,
        } => {
            let _ = reply.send(matchmaker.update_profile(discord_id, &flag, is_pro).await);
        }
        MatchmakingCommand::GetPlayer { discord_id, reply } => {
            let _ = reply.send(matchmaker.player(discord_id));
        }
        MatchmakingCommand::ListPlayers { reply } => {
            let _ = reply.send(matchmaker.players());
        }
        MatchmakingCommand::Snapshot { reply } => {
            let _ = reply.send(matchmaker.snapshot(Instant::now()));
        }
    }
}
