use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, RoleId, UserId};
use tracing::{debug, info, warn};

use crate::config::keys;
use crate::logging::MATCHMAKING_LOG;
use crate::managers::{drop_temp_vocal, spawn_temp_vocal};
use crate::matchmaking::ReadyOutcome;
use crate::messages;
use crate::state::Ruleset;
use crate::{Data, Error};

/// What the cache knows about a voice channel, copied out so no cache
/// reference is held across an await
#[derive(Debug, Clone)]
struct ChannelView {
    id: ChannelId,
    name: String,
    parent_id: Option<ChannelId>,
    members: Vec<UserId>,
}

fn channel_view(ctx: &serenity::Context, guild_id: GuildId, channel_id: ChannelId) -> Option<ChannelView> {
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild.channels.get(&channel_id)?;
    let members = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel_id))
        .map(|state| state.user_id)
        .collect();
    Some(ChannelView {
        id: channel_id,
        name: channel.name.clone(),
        parent_id: channel.parent_id,
        members,
    })
}

/// Vocals spawned for matchmaking carry one of these prefixes
fn is_matchmaking_vocal_name(name: &str) -> bool {
    ["Waiting for mate", "Team Ready - ", "Match pending - "]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}

/// Rulesets every member holds the role for
fn shared_rulesets(
    ctx: &serenity::Context,
    guild_id: GuildId,
    members: &[UserId],
    role_ids: &[(Ruleset, Option<u64>)],
) -> Vec<Ruleset> {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Vec::new();
    };
    role_ids
        .iter()
        .filter_map(|(ruleset, role_id)| role_id.map(|id| (*ruleset, RoleId::new(id))))
        .filter(|(_, role_id)| {
            members.iter().all(|user_id| {
                guild
                    .members
                    .get(user_id)
                    .is_some_and(|member| member.roles.contains(role_id))
            })
        })
        .map(|(ruleset, _)| ruleset)
        .collect()
}

/// Temporary vocals, matchmaking queue entry and departures
pub async fn handle_voice_state_update(
    ctx: &serenity::Context,
    old: Option<&serenity::VoiceState>,
    new: &serenity::VoiceState,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = new.guild_id else {
        return Ok(());
    };
    let user_id = new.user_id;
    let before = old.and_then(|state| state.channel_id);
    let after = new.channel_id;
    if before == after {
        // Mute, deafen or stream toggles
        return Ok(());
    }

    let member_name = new
        .member
        .as_ref()
        .map(|m| m.display_name().to_string())
        .unwrap_or_else(|| user_id.to_string());

    let (voc_create, matchmaking_voc_create) = {
        let kv = data.kv.read().await;
        (
            kv.get::<u64>(keys::VOC_CREATE_CHANNEL_ID),
            kv.get::<u64>(keys::MATCHMAKING_VOC_CREATE_CHANNEL_ID),
        )
    };

    if let Some(before_id) = before {
        handle_departure(ctx, guild_id, user_id, &member_name, before_id, data).await?;
    }

    let Some(after_id) = after else {
        return Ok(());
    };
    let view = channel_view(ctx, guild_id, after_id);
    let into_matchmaking = matchmaking_voc_create == Some(after_id.get())
        || data
            .kv
            .read()
            .await
            .list_contains(keys::TEMP_MATCHMAKING_VOCALS_CHANNEL_ID, after_id.get())
        || view.as_ref().is_some_and(|v| is_matchmaking_vocal_name(&v.name));
    data.matchmaking
        .member_joined(user_id.get(), after_id.get(), into_matchmaking)?;

    let Some(view) = view else {
        debug!("Channel {} not in cache", after_id);
        return Ok(());
    };

    if voc_create == Some(after_id.get()) {
        spawn_temp_vocal(
            &ctx.http,
            guild_id,
            &data.kv,
            keys::TEMP_VOCALS_CHANNEL_ID,
            view.parent_id,
            &member_name,
            user_id,
        )
        .await?;
        return Ok(());
    }

    if matchmaking_voc_create == Some(after_id.get()) {
        info!(
            target: MATCHMAKING_LOG,
            "**{}** joined the voice channel : `{}` - Creating waiting vocal", member_name, view.name
        );
        spawn_temp_vocal(
            &ctx.http,
            guild_id,
            &data.kv,
            keys::TEMP_MATCHMAKING_VOCALS_CHANNEL_ID,
            view.parent_id,
            &messages::waiting_channel_name(&member_name),
            user_id,
        )
        .await?;
        return Ok(());
    }

    if view.name.starts_with("Waiting for mate") {
        info!(
            target: MATCHMAKING_LOG,
            "**{}** joined the voice channel : `{}`", member_name, view.name
        );
        handle_waiting_join(ctx, guild_id, user_id, &member_name, view, data).await?;
    }

    Ok(())
}

async fn handle_departure(
    ctx: &serenity::Context,
    guild_id: GuildId,
    user_id: UserId,
    member_name: &str,
    before_id: ChannelId,
    data: &Data,
) -> Result<(), Error> {
    let (is_temp, is_matchmaking) = {
        let kv = data.kv.read().await;
        (
            kv.list_contains(keys::TEMP_VOCALS_CHANNEL_ID, before_id.get()),
            kv.list_contains(keys::TEMP_MATCHMAKING_VOCALS_CHANNEL_ID, before_id.get()),
        )
    };
    let view = channel_view(ctx, guild_id, before_id);
    let is_empty = view.as_ref().map_or(true, |v| v.members.is_empty());

    if is_temp && is_empty {
        drop_temp_vocal(&ctx.http, &data.kv, keys::TEMP_VOCALS_CHANNEL_ID, before_id).await?;
    }

    // Dequeues a waiting team or starts the grace timer of an open match
    data.matchmaking.member_left(user_id.get())?;

    if is_matchmaking {
        let name = view.as_ref().map(|v| v.name.clone()).unwrap_or_default();
        info!(
            target: MATCHMAKING_LOG,
            "**{}** left the voice channel : `{}`", member_name, name
        );
        if name.starts_with("Team Ready - ") || is_empty {
            info!(
                target: MATCHMAKING_LOG,
                "Deleting voice channel : `{}` because at least one member left or the voice channel was empty",
                name
            );
            if let Err(e) = drop_temp_vocal(
                &ctx.http,
                &data.kv,
                keys::TEMP_MATCHMAKING_VOCALS_CHANNEL_ID,
                before_id,
            )
            .await
            {
                warn!("Could not delete vocal {}: {}", before_id, e);
            }
        }
    }

    Ok(())
}

/// Someone entered a `Waiting for mate` vocal
async fn handle_waiting_join(
    ctx: &serenity::Context,
    guild_id: GuildId,
    user_id: UserId,
    member_name: &str,
    view: ChannelView,
    data: &Data,
) -> Result<(), Error> {
    let member_ids: Vec<u64> = view.members.iter().map(|id| id.get()).collect();
    let team = data.matchmaking.team_of_members(member_ids).await?;

    let Some(team) = team else {
        if view.members.len() >= 2 {
            info!(
                target: MATCHMAKING_LOG,
                "Both players are not in a team : **{}** has been disconnected", member_name
            );
            if let Ok(dm) = user_id.create_dm_channel(&ctx.http).await {
                let _ = dm
                    .send_message(
                        &ctx.http,
                        serenity::CreateMessage::new().content(messages::not_a_team_message()),
                    )
                    .await;
            }
            guild_id.disconnect_member(&ctx.http, user_id).await?;
        }
        return Ok(());
    };

    info!(target: MATCHMAKING_LOG, "Team **{}** is ready", team);
    view.id
        .edit(
            &ctx.http,
            serenity::EditChannel::new().name(messages::team_ready_channel_name(&team)),
        )
        .await?;

    let role_ids: Vec<(Ruleset, Option<u64>)> = {
        let kv = data.kv.read().await;
        Ruleset::ALL
            .into_iter()
            .map(|ruleset| (ruleset, kv.get::<u64>(ruleset.role_key())))
            .collect()
    };
    let eligible = shared_rulesets(ctx, guild_id, &view.members, &role_ids);

    match data
        .matchmaking
        .team_ready(team.clone(), view.id.get(), eligible)
        .await?
    {
        ReadyOutcome::Queued(ruleset) => debug!("{} queued for {}", team, ruleset),
        ReadyOutcome::AlreadyQueued(ruleset) => debug!("{} already queued for {}", team, ruleset),
        other => debug!("{} not queued: {:?}", team, other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matchmaking_vocal_names() {
        assert!(is_matchmaking_vocal_name(&messages::waiting_channel_name("Alice")));
        assert!(is_matchmaking_vocal_name(&messages::team_ready_channel_name("1_2")));
        assert!(is_matchmaking_vocal_name(&messages::match_pending_channel_name("1_2")));
        assert!(!is_matchmaking_vocal_name("General"));
    }
}
