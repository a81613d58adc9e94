use poise::serenity_prelude as serenity;
use tracing::info;

use crate::error::BotError;
use crate::matchmaking::QueueSnapshot;
use crate::state::Ruleset;
use crate::{Context, Error};

const EMPTY: &str = "*empty*";
const MESSAGE_LIMIT: usize = 1900;

fn queue_embed(snapshot: &QueueSnapshot) -> serenity::CreateEmbed {
    let mut embed = serenity::CreateEmbed::new()
        .title("Matchmaking")
        .color(0x9b59b6);

    for ruleset in Ruleset::ALL {
        let queue = snapshot.pending.queue(ruleset);
        let value = if queue.is_empty() {
            EMPTY.to_string()
        } else {
            queue.join("\n")
        };
        embed = embed.field(format!("{} queue", ruleset), value, true);
    }

    if let Some((candidate, left)) = &snapshot.countdown {
        embed = embed.field(
            "Countdown",
            format!(
                "{} vs {} ({}, score {:.2}) in {}s",
                candidate.team_a,
                candidate.team_b,
                candidate.ruleset,
                candidate.score,
                left.as_secs()
            ),
            false,
        );
    }

    let matches = if snapshot.matches.is_empty() {
        EMPTY.to_string()
    } else {
        snapshot
            .matches
            .iter()
            .map(|m| {
                let channel = m
                    .text_channel_id
                    .map(|id| format!("<#{}>", id))
                    .unwrap_or_else(|| "no channel".to_string());
                format!("{} vs {} ({}) {} since <t:{}:R>", m.team1, m.team2, m.match_type, channel, m.opened_at)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    embed.field("Open matches", matches, false)
}

/// Show waiting teams and open matches
#[poise::command(slash_command, guild_only)]
pub async fn queue(ctx: Context<'_>) -> Result<(), Error> {
    let snapshot = ctx.data().matchmaking.snapshot().await?;
    ctx.send(poise::CreateReply::default()
        .embed(queue_embed(&snapshot))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Close an open match without recording a result
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "MANAGE_CHANNELS"
)]
pub async fn close_match(
    ctx: Context<'_>,
    #[description = "Name of one of the two teams (e.g. 123_456)"] team: String,
) -> Result<(), Error> {
    info!("close_match called by {} for {}", ctx.author().name, team);
    let content = match ctx.data().matchmaking.close_match(team.clone()).await {
        Ok(closed) => format!("Match **{}** vs **{}** closed.", closed.team1, closed.team2),
        Err(BotError::MatchNotFound { .. }) => format!("No open match for `{}`.", team),
        Err(e) => return Err(e.into()),
    };
    ctx.send(poise::CreateReply::default()
        .content(content)
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show the latest matchmaking log lines
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "MANAGE_CHANNELS"
)]
pub async fn matchmaking_logs(
    ctx: Context<'_>,
    #[description = "Number of lines (default 20)"]
    #[min = 1]
    #[max = 50]
    count: Option<u32>,
) -> Result<(), Error> {
    let entries = ctx.data().log_buffer.get_recent(count.unwrap_or(20) as usize);

    // Newest lines win when the message limit is reached
    let mut lines = Vec::new();
    let mut length = 0;
    for entry in entries.iter().rev() {
        let line = entry.to_discord();
        length += line.len() + 1;
        if length > MESSAGE_LIMIT {
            break;
        }
        lines.push(line);
    }
    lines.reverse();

    let content = if lines.is_empty() {
        "No matchmaking activity yet.".to_string()
    } else {
        lines.join("\n")
    };

    ctx.send(poise::CreateReply::default()
        .content(content)
        .ephemeral(true))
        .await?;
    Ok(())
}
