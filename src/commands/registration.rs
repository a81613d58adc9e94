use poise::serenity_prelude::{self as serenity, Mentionable, RoleId};
use tracing::{info, warn};

use crate::config::keys;
use crate::error::BotError;
use crate::managers::apply_flag_prefix;
use crate::messages;
use crate::state::Ruleset;
use crate::{Context, Error};

async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(poise::CreateReply::default()
        .content(content)
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Post an embed to the registration channel, if one is configured
async fn announce(ctx: Context<'_>, embed: serenity::CreateEmbed) {
    let channel: Option<u64> = ctx.data().kv.read().await.get(keys::REGISTRATION_CHANNEL_ID);
    let Some(channel_id) = channel else {
        return;
    };
    if let Err(e) = serenity::ChannelId::new(channel_id)
        .send_message(ctx.http(), serenity::CreateMessage::new().embed(embed))
        .await
    {
        warn!("Could not post to registration channel: {}", e);
    }
}

/// Register as a player
#[poise::command(slash_command, guild_only)]
pub async fn register(
    ctx: Context<'_>,
    #[description = "Name shown to the other players"] surname: String,
    #[description = "GeoGuessr profile link or id"] geoguessr: String,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let author_id = ctx.author().id;

    let player = match ctx
        .data()
        .registration
        .register(author_id.get(), &surname, &geoguessr)
        .await
    {
        Ok(player) => player,
        Err(BotError::AlreadyRegistered { .. }) => {
            return reply(
                ctx,
                format!(
                    ":warning: {} :warning:\n\nYou are already registered, if you want to modify your registration, please contact an admin.",
                    ctx.author().mention()
                ),
            )
            .await;
        }
        Err(BotError::InvalidProfile { geoguessr_id }) => {
            return reply(
                ctx,
                format!(":x: No GeoGuessr profile found for `{}`", geoguessr_id),
            )
            .await;
        }
        Err(e) => return Err(e.into()),
    };

    let role: Option<u64> = ctx.data().kv.read().await.get(keys::REGISTERED_ROLE_ID);
    if let Some(role_id) = role {
        if let Err(e) = ctx
            .http()
            .add_member_role(guild_id, author_id, RoleId::new(role_id), Some("Player registration"))
            .await
        {
            warn!("Could not grant registered role to {}: {}", author_id, e);
        }
    }
    if let Err(e) = apply_flag_prefix(ctx.http(), guild_id, author_id, &player.flag, None).await {
        warn!("Could not set flag nickname for {}: {}", author_id, e);
    }

    announce(
        ctx,
        serenity::CreateEmbed::new()
            .title("New player")
            .description(format!(
                "{} {} ({}) registered",
                messages::flag_to_emoji(&player.flag),
                player.surname,
                ctx.author().mention()
            ))
            .field(
                "GeoGuessr",
                format!("https://www.geoguessr.com/user/{}", player.geoguessr_id),
                false,
            )
            .timestamp(serenity::Timestamp::now())
            .color(0x2ecc71),
    )
    .await;

    reply(ctx, messages::registration_success_message(&player.surname, &player.flag)).await
}

/// Create your team
#[poise::command(slash_command, guild_only)]
pub async fn team(
    ctx: Context<'_>,
    #[description = "Who will be your team mate?"] partner: serenity::User,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let author = ctx.author();

    let team = match ctx
        .data()
        .registration
        .create_team(author.id.get(), partner.id.get())
        .await
    {
        Ok(team) => team,
        Err(BotError::SelfPairing) => {
            return reply(
                ctx,
                format!(
                    ":warning: {} :warning:\n\nYou can't make a team with yourself!",
                    author.mention()
                ),
            )
            .await;
        }
        Err(BotError::NotRegistered { discord_id }) if discord_id == author.id.to_string() => {
            return reply(
                ctx,
                format!(
                    ":warning: {} :warning:\n\nYou aren't registered as a player, use `/register` first!",
                    author.mention()
                ),
            )
            .await;
        }
        Err(BotError::NotRegistered { .. }) => {
            return reply(
                ctx,
                format!(
                    ":warning: {} :warning:\n\nThe selected player is not yet registered, tell them to use `/register`!",
                    author.mention()
                ),
            )
            .await;
        }
        Err(BotError::TeamExists { .. }) => {
            return reply(
                ctx,
                format!(":x: You are already in a team with {}!", partner.mention()),
            )
            .await;
        }
        Err(e) => return Err(e.into()),
    };

    info!("{} and {} formed team {}", author.name, partner.name, team.name);

    for (user, mate) in [(author, &partner), (&partner, author)] {
        let content = messages::team_created_message(&mate.mention().to_string());
        if let Err(e) = user
            .direct_message(ctx.http(), serenity::CreateMessage::new().content(content))
            .await
        {
            warn!("Could not DM {}: {}", user.id, e);
        }
    }

    announce(
        ctx,
        serenity::CreateEmbed::new()
            .title("New team")
            .description(format!(
                "A new team has appeared : {} ({}) & {} ({})",
                team.member1.surname,
                author.mention(),
                team.member2.surname,
                partner.mention()
            ))
            .timestamp(serenity::Timestamp::now())
            .color(0x2ecc71),
    )
    .await;

    reply(
        ctx,
        format!(
            ":tada: {} :tada:\n\nYou are now in a team with {}!",
            author.mention(),
            partner.mention()
        ),
    )
    .await
}

/// Toggle the duels you want to play
#[poise::command(slash_command, guild_only)]
pub async fn ruleset(
    ctx: Context<'_>,
    #[description = "Ruleset to join or leave"] ruleset: Ruleset,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(());
    };
    let role: Option<u64> = ctx.data().kv.read().await.get(ruleset.role_key());
    let Some(role_id) = role.map(RoleId::new) else {
        return reply(ctx, format!("The {} role is not configured yet.", ruleset)).await;
    };

    let author_id = ctx.author().id;
    let member = guild_id.member(ctx.http(), author_id).await?;
    let mention = ctx.author().mention();

    if member.roles.contains(&role_id) {
        ctx.http()
            .remove_member_role(guild_id, author_id, role_id, Some("Ruleset toggle"))
            .await?;
        reply(
            ctx,
            format!(":warning: {} :warning:\n\nYou are no longer in {} duels", mention, ruleset),
        )
        .await
    } else {
        ctx.http()
            .add_member_role(guild_id, author_id, role_id, Some("Ruleset toggle"))
            .await?;
        reply(
            ctx,
            format!(
                ":tada: {} :tada:\n\nYou can now play {} duels! Don't forget to tell your mate to do so if not done yet!",
                mention, ruleset
            ),
        )
        .await
    }
}
