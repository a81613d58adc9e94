use poise::serenity_prelude as serenity;
use tracing::{debug, info, warn};

use crate::config::keys;
use crate::events::audit::{post_to_logs, COLOR_INFO};
use crate::managers::registration_manager::prefixed_nickname;
use crate::{Data, Error};

/// Keep the flag emoji in front of registered players' nicknames
pub async fn handle_member_update(
    ctx: &serenity::Context,
    old_display_name: Option<String>,
    member: &serenity::Member,
    data: &Data,
) -> Result<(), Error> {
    let display_name = member.display_name().to_string();
    if old_display_name.as_deref() == Some(display_name.as_str()) {
        return Ok(());
    }

    let Some(player) = data.matchmaking.player(member.user.id.get()).await? else {
        return Ok(());
    };

    let mut forced = None;
    if let Some(nickname) = prefixed_nickname(&display_name, &player.flag, None) {
        match member
            .clone()
            .edit(&ctx.http, serenity::EditMember::new().nickname(&nickname))
            .await
        {
            Ok(_) => forced = Some(nickname),
            Err(e) => warn!(
                "Failed to set nickname for {}: {}. Bot requires 'Manage Nicknames' permission and a higher role than the member.",
                member.user.id, e
            ),
        }
    }

    let new_name = match &forced {
        Some(nickname) => format!("{} ({})", nickname, display_name),
        None => display_name.clone(),
    };
    let embed = serenity::CreateEmbed::new()
        .title("Nickname change")
        .description(format!("<@{}> changed their nickname", member.user.id))
        .field("Old nickname", old_display_name.unwrap_or_default(), true)
        .field("New nickname", new_name, true)
        .footer(serenity::CreateEmbedFooter::new(format!("ID: {}", member.user.id)))
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_INFO);
    post_to_logs(&ctx.http, &data.kv, embed).await?;
    Ok(())
}

/// A deleted match channel closes its match
pub async fn handle_channel_delete(
    channel: &serenity::GuildChannel,
    data: &Data,
) -> Result<(), Error> {
    debug!("Channel #{} ({}) deleted", channel.name, channel.id);

    {
        let mut kv = data.kv.write().await;
        for key in [keys::TEMP_VOCALS_CHANNEL_ID, keys::TEMP_MATCHMAKING_VOCALS_CHANNEL_ID] {
            if kv.remove_id(key, channel.id.get()).await? {
                info!("Forgot temporary vocal {} from {}", channel.id, key);
            }
        }
    }

    data.matchmaking.channel_deleted(channel.id.get())?;
    Ok(())
}
