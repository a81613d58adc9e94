use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, Http, Permissions, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{keys, SharedKvStore};
use crate::error::{BotError, Result};
use crate::matchmaking::ChatGateway;

/// Serenity-backed [`ChatGateway`] bound to one guild
pub struct DiscordGateway {
    http: Arc<Http>,
    guild_id: GuildId,
    kv: SharedKvStore,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, guild_id: GuildId, kv: SharedKvStore) -> Self {
        Self { http, guild_id, kv }
    }

    /// Overwrites hiding the channel from everyone except the participants,
    /// staff and the bot itself
    async fn match_overwrites(&self, participants: &[u64]) -> Result<Vec<serenity::PermissionOverwrite>> {
        let member_access =
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::READ_MESSAGE_HISTORY;

        let mut overwrites = vec![serenity::PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: serenity::PermissionOverwriteType::Role(self.guild_id.everyone_role()),
        }];

        let bot_user_id = self.http.get_current_user().await?.id;
        overwrites.push(serenity::PermissionOverwrite {
            allow: member_access | Permissions::MANAGE_CHANNELS,
            deny: Permissions::empty(),
            kind: serenity::PermissionOverwriteType::Member(bot_user_id),
        });

        for user_id in participants {
            overwrites.push(serenity::PermissionOverwrite {
                allow: member_access,
                deny: Permissions::empty(),
                kind: serenity::PermissionOverwriteType::Member(UserId::new(*user_id)),
            });
        }

        let staff_role: Option<u64> = self.kv.read().await.get(keys::STAFF_ROLE_ID);
        if let Some(role_id) = staff_role {
            overwrites.push(serenity::PermissionOverwrite {
                allow: member_access,
                deny: Permissions::empty(),
                kind: serenity::PermissionOverwriteType::Role(RoleId::new(role_id)),
            });
        }

        Ok(overwrites)
    }
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    async fn create_match_channel(&self, name: &str, participants: &[u64]) -> Result<u64> {
        let overwrites = self.match_overwrites(participants).await?;
        let category: Option<u64> = self.kv.read().await.get(keys::MATCH_CATEGORY_ID);

        let mut builder = serenity::CreateChannel::new(name)
            .kind(serenity::ChannelType::Text)
            .topic("Duel in progress. Post the summary link in the summary channel when it is over.")
            .permissions(overwrites);
        if let Some(category_id) = category {
            builder = builder.category(ChannelId::new(category_id));
        }

        let channel = self
            .guild_id
            .create_channel(self.http.as_ref(), builder)
            .await?;
        info!("Created match channel #{} ({})", channel.name, channel.id);
        Ok(channel.id.get())
    }

    async fn rename_channel(&self, channel_id: u64, name: &str) -> Result<()> {
        ChannelId::new(channel_id)
            .edit(self.http.as_ref(), serenity::EditChannel::new().name(name))
            .await?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        ChannelId::new(channel_id).delete(self.http.as_ref()).await?;
        debug!("Deleted channel {}", channel_id);
        Ok(())
    }

    async fn send_dm(&self, user_id: u64, content: &str) -> Result<()> {
        let dm_channel = UserId::new(user_id)
            .create_dm_channel(self.http.as_ref())
            .await?;
        dm_channel
            .send_message(self.http.as_ref(), serenity::CreateMessage::new().content(content))
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
        ChannelId::new(channel_id)
            .send_message(self.http.as_ref(), serenity::CreateMessage::new().content(content))
            .await?;
        Ok(())
    }
}

/// Create a voice channel next to `origin` and move `user_id` into it.
/// The new id is appended to the `list_key` list in the store.
pub async fn spawn_temp_vocal(
    http: &Http,
    guild_id: GuildId,
    kv: &SharedKvStore,
    list_key: &str,
    parent_id: Option<ChannelId>,
    name: &str,
    user_id: UserId,
) -> Result<ChannelId> {
    let mut builder = serenity::CreateChannel::new(name).kind(serenity::ChannelType::Voice);
    if let Some(parent) = parent_id {
        builder = builder.category(parent);
    }
    let channel = guild_id.create_channel(http, builder).await?;

    kv.write().await.push_id(list_key, channel.id.get()).await?;

    guild_id
        .move_member(http, user_id, channel.id)
        .await
        .map_err(|e| BotError::Discord {
            message: format!("Could not move {} to {}: {}", user_id, channel.id, e),
        })?;

    debug!("Temporary vocal {} created for {}", channel.id, user_id);
    Ok(channel.id)
}

/// Delete a tracked temporary vocal and forget its id
pub async fn drop_temp_vocal(
    http: &Http,
    kv: &SharedKvStore,
    list_key: &str,
    channel_id: ChannelId,
) -> Result<()> {
    kv.write().await.remove_id(list_key, channel_id.get()).await?;
    channel_id.delete(http).await?;
    debug!("Temporary vocal {} deleted", channel_id);
    Ok(())
}
