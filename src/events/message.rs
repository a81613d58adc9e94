use chrono::Utc;
use poise::serenity_prelude as serenity;
use tracing::{debug, error, info, warn};

use crate::config::keys;
use crate::events::audit::{field_value, post_to_logs, COLOR_ALERT, COLOR_INFO};
use crate::external::{append_detached, extract_duel_id, Worksheet};
use crate::logging::MATCHMAKING_LOG;
use crate::matchmaking::DuelAttribution;
use crate::messages;
use crate::{Data, Error};

/// Handle incoming messages
pub async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    if msg.author.bot || msg.guild_id.is_none() {
        return Ok(());
    }

    let summary_channel: Option<u64> = data.kv.read().await.get(keys::SUMMARY_LINKS_CHANNEL_ID);
    if summary_channel == Some(msg.channel_id.get()) {
        return handle_summary_link(ctx, msg, data).await;
    }

    Ok(())
}

/// Log an edited message to the logs channel
pub async fn handle_message_update(
    ctx: &serenity::Context,
    old: Option<&serenity::Message>,
    event: &serenity::MessageUpdateEvent,
    data: &Data,
) -> Result<(), Error> {
    if event.author.as_ref().is_some_and(|author| author.bot) {
        return Ok(());
    }
    let Some(after) = event.content.as_deref() else {
        return Ok(());
    };
    let before = old.map(|m| m.content.as_str());
    if before == Some(after) {
        return Ok(());
    }
    let Some(guild_id) = event.guild_id else {
        return Ok(());
    };

    let author = event
        .author
        .as_ref()
        .map(|a| format!("<@{}>", a.id))
        .unwrap_or_else(|| "Unknown".to_string());
    let embed = serenity::CreateEmbed::new()
        .title("Message edited")
        .description(format!("{} edited a message in <#{}>", author, event.channel_id))
        .field("Before", field_value(before.unwrap_or_default()), false)
        .field("After", field_value(after), false)
        .field("Message", event.id.link(event.channel_id, Some(guild_id)), false)
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_INFO);
    post_to_logs(&ctx.http, &data.kv, embed).await?;
    Ok(())
}

/// Log a deleted message to the logs channel. Only cached messages can be shown.
pub async fn handle_message_delete(
    ctx: &serenity::Context,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
    data: &Data,
) -> Result<(), Error> {
    let cached = ctx
        .cache
        .message(channel_id, message_id)
        .map(|m| (m.author.id, m.author.bot, m.content.clone()));
    let Some((author_id, bot, content)) = cached else {
        debug!("Deleted message {} was not cached", message_id);
        return Ok(());
    };
    if bot {
        return Ok(());
    }

    let embed = serenity::CreateEmbed::new()
        .title("Message deleted")
        .description(format!("Message from <@{}> deleted in <#{}>", author_id, channel_id))
        .field("Content", field_value(&content), false)
        .footer(serenity::CreateEmbedFooter::new(format!("ID: {}", author_id)))
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_ALERT);
    post_to_logs(&ctx.http, &data.kv, embed).await?;
    Ok(())
}

/// A player posted a duel summary link
async fn handle_summary_link(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    data: &Data,
) -> Result<(), Error> {
    info!(
        target: MATCHMAKING_LOG,
        "**{}** sent a summary link: `{}`", msg.author.name, msg.content
    );

    let Some(duel_id) = extract_duel_id(&msg.content) else {
        info!(
            target: MATCHMAKING_LOG,
            "Can't find a duelId in the summary link: `{}`", msg.content
        );
        if let Err(e) = msg.delete(&ctx.http).await {
            warn!("Could not delete message {}: {}", msg.id, e);
        }
        return Ok(());
    };

    // Fetch before touching any state
    let outcome = match data.results.fetch_duel(&duel_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(target: MATCHMAKING_LOG, "Could not fetch duel `{}`: {}", duel_id, e);
            return Ok(());
        }
    };

    let attribution = match data
        .matchmaking
        .apply_result(duel_id.clone(), msg.author.id.get(), outcome.clone())
        .await
    {
        Ok(attribution) => attribution,
        Err(e) => {
            error!(target: MATCHMAKING_LOG, "Could not apply duel `{}`: {}", duel_id, e);
            return Ok(());
        }
    };

    if let Some(DuelAttribution {
        winner,
        loser,
        draw: true,
        ..
    }) = &attribution
    {
        info!(
            target: MATCHMAKING_LOG,
            "Duel `{}` between **{}** and **{}** ended in a draw, match closed", duel_id, winner, loser
        );
    }

    if let Some(DuelAttribution {
        winner,
        loser,
        ruleset,
        recorded: true,
        participants,
        ..
    }) = &attribution
    {
        if outcome.ruleset.is_some_and(|played| played != *ruleset) {
            warn!(
                target: MATCHMAKING_LOG,
                "Duel `{}` was not played with the {} settings of the match", duel_id, ruleset
            );
        }
        info!(
            target: MATCHMAKING_LOG,
            "Duel `{}` ({}): **{}** won against **{}**", duel_id, ruleset, winner, loser
        );

        let thanks = serenity::CreateMessage::new().content(messages::thanks_message());
        for user_id in participants {
            let user = serenity::UserId::new(*user_id);
            match user.create_dm_channel(&ctx.http).await {
                Ok(dm) => {
                    if let Err(e) = dm.send_message(&ctx.http, thanks.clone()).await {
                        debug!("Could not DM {}: {}", user_id, e);
                    }
                }
                Err(e) => debug!("Could not open DM with {}: {}", user_id, e),
            }
        }

        append_detached(
            &data.sheets,
            Worksheet::Duels,
            vec![
                duel_id.clone(),
                winner.clone(),
                loser.clone(),
                ruleset.to_string(),
                outcome.ruleset.map(|r| r.to_string()).unwrap_or_default(),
                outcome.map_name.clone().unwrap_or_default(),
                outcome.rounds.to_string(),
                Utc::now().to_rfc3339(),
            ],
        );
    }

    if let Err(e) = msg
        .react(&ctx.http, serenity::ReactionType::Unicode("✅".to_string()))
        .await
    {
        debug!("Could not react to {}: {}", msg.id, e);
    }
    Ok(())
}
