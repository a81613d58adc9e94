use poise::serenity_prelude as serenity;
use tracing::{info, warn};

use crate::config::keys;
use crate::events::audit::{post_to_logs, COLOR_ALERT, COLOR_INFO, COLOR_JOIN};
use crate::managers::InviteUse;
use crate::{Data, Error};

/// "uses/max", with ∞ for unlimited invites
pub fn invite_uses(invite: &InviteUse) -> String {
    match invite.max_uses {
        0 => format!("{}/∞", invite.uses),
        max => format!("{}/{}", invite.uses, max),
    }
}

fn member_activity(count: u64) -> serenity::ActivityData {
    serenity::ActivityData::watching(format!("{} members", count))
}

/// Show the member count as the bot's activity
fn update_presence(ctx: &serenity::Context, guild_id: serenity::GuildId) {
    let count = ctx.cache.guild(guild_id).map(|guild| guild.member_count);
    if let Some(count) = count {
        ctx.set_activity(Some(member_activity(count)));
    }
}

pub async fn handle_member_join(
    ctx: &serenity::Context,
    new_member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    let user = &new_member.user;
    let guild_id = new_member.guild_id;
    info!("New member joined: {} in guild {}", user.name, guild_id);

    let newbie_role: Option<u64> = data.kv.read().await.get(keys::NEWBIE_ROLE_ID);
    if let Some(role_id) = newbie_role {
        if let Err(e) = ctx
            .http
            .add_member_role(guild_id, user.id, serenity::RoleId::new(role_id), None)
            .await
        {
            warn!(
                "Failed to give the newbie role to {}: {}. Bot requires 'Manage Roles' permission and a role above it.",
                user.id, e
            );
        }
    }

    update_presence(ctx, guild_id);

    let used = match data.invites.attribute_join(&ctx.http, guild_id).await {
        Ok(used) => used,
        Err(e) => {
            warn!(
                "Could not read the invites of guild {}: {}. Bot requires 'Manage Server' permission.",
                guild_id, e
            );
            None
        }
    };

    let mut embed = serenity::CreateEmbed::new()
        .title("New member")
        .description(format!("<@{}> joined the server", user.id))
        .thumbnail(user.face())
        .field(
            "Account created",
            format!("<t:{}:f>", user.id.created_at().unix_timestamp()),
            false,
        );
    embed = match used {
        Some(invite) => {
            let inviter = invite
                .inviter_id
                .map(|id| format!("<@{}>", id))
                .unwrap_or_else(|| "Unknown".to_string());
            embed
                .field("Invited by", inviter, true)
                .field("Invite code", format!("`{}`", invite.code), true)
                .field("Uses", invite_uses(&invite), true)
        }
        None => embed.field("Invite", "Not found", false),
    };
    let embed = embed
        .footer(serenity::CreateEmbedFooter::new(format!("ID: {}", user.id)))
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_JOIN);

    post_to_logs(&ctx.http, &data.kv, embed).await?;
    Ok(())
}

pub async fn handle_member_remove(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    user: &serenity::User,
    member: Option<&serenity::Member>,
    data: &Data,
) -> Result<(), Error> {
    info!("Member left: {} from guild {}", user.name, guild_id);
    update_presence(ctx, guild_id);

    let joined = member
        .and_then(|m| m.joined_at)
        .map(|at| format!("<t:{}:R>", at.unix_timestamp()))
        .unwrap_or_else(|| "Unknown".to_string());
    let embed = serenity::CreateEmbed::new()
        .title("Member left")
        .description(format!("<@{}> ({}) left the server", user.id, user.name))
        .thumbnail(user.face())
        .field("Had joined", joined, false)
        .footer(serenity::CreateEmbedFooter::new(format!("ID: {}", user.id)))
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_ALERT);

    post_to_logs(&ctx.http, &data.kv, embed).await?;
    Ok(())
}

pub async fn handle_invite_create(
    ctx: &serenity::Context,
    invite: &serenity::InviteCreateEvent,
    data: &Data,
) -> Result<(), Error> {
    let creator = invite
        .inviter
        .as_ref()
        .map(|user| format!("<@{}>", user.id))
        .unwrap_or_else(|| "Unknown".to_string());
    let max_uses = match invite.max_uses {
        0 => "∞".to_string(),
        max => max.to_string(),
    };
    let expires = match invite.max_age {
        0 => "Never".to_string(),
        age => format!("<t:{}:f>", invite.created_at.unix_timestamp() + i64::from(age)),
    };
    info!("Invite {} created in #{}", invite.code, invite.channel_id);

    let embed = serenity::CreateEmbed::new()
        .title("Invite created")
        .field("Created by", creator, true)
        .field("Code", format!("`{}`", invite.code), true)
        .field("Channel", format!("<#{}>", invite.channel_id), true)
        .field("Max uses", max_uses, true)
        .field("Expires", expires, true)
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_INFO);
    post_to_logs(&ctx.http, &data.kv, embed).await?;

    if let Some(guild_id) = invite.guild_id {
        data.invites.refresh(&ctx.http, guild_id).await?;
    }
    Ok(())
}

pub async fn handle_invite_delete(
    ctx: &serenity::Context,
    invite: &serenity::InviteDeleteEvent,
    data: &Data,
) -> Result<(), Error> {
    info!("Invite {} deleted", invite.code);
    if let Some(guild_id) = invite.guild_id {
        data.invites.refresh(&ctx.http, guild_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_uses() {
        let mut invite = InviteUse {
            code: "abc".to_string(),
            uses: 4,
            max_uses: 0,
            inviter_id: None,
        };
        assert_eq!(invite_uses(&invite), "4/∞");

        invite.max_uses = 10;
        assert_eq!(invite_uses(&invite), "4/10");
    }
}
