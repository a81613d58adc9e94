use poise::serenity_prelude as serenity;
use tracing::info;

use crate::config::keys;
use crate::error::BotError;
use crate::{Context, Error};

/// Interpret a command argument: snowflakes and other integers stay numbers,
/// valid JSON is kept as is, anything else is a string
pub fn parse_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    let unwrapped = trimmed
        .strip_prefix("<#")
        .or_else(|| trimmed.strip_prefix("<@&"))
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(trimmed);
    if let Ok(id) = unwrapped.parse::<u64>() {
        return serde_json::Value::from(id);
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()))
}

/// Show every configured key and download the whole store
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn get_config(ctx: Context<'_>) -> Result<(), Error> {
    info!("get_config called by {}", ctx.author().name);
    let kv = ctx.data().kv.read().await;

    let mut lines: Vec<String> = keys::KNOWN
        .iter()
        .map(|key| match kv.get_raw(key) {
            Some(value) => format!("`{}` = `{}`", key, value),
            None => format!("`{}` *unset*", key),
        })
        .collect();
    let mut extra: Vec<&String> = kv.keys().filter(|k| !keys::KNOWN.contains(&k.as_str())).collect();
    extra.sort();
    for key in extra {
        if let Some(value) = kv.get_raw(key) {
            lines.push(format!("`{}` = `{}`", key, value));
        }
    }

    let export = kv.export()?;
    drop(kv);

    let embed = serenity::CreateEmbed::new()
        .title("Configuration")
        .description(lines.join("\n"))
        .color(0x3498db);
    let attachment = serenity::CreateAttachment::bytes(export.into_bytes(), "hellbot.json");

    ctx.send(poise::CreateReply::default()
        .embed(embed)
        .attachment(attachment)
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Set a configuration key (channel, role or any JSON value)
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn set_config(
    ctx: Context<'_>,
    #[description = "Key, e.g. summary_links_channel_id"] key: String,
    #[description = "Id, mention or JSON value"] value: String,
) -> Result<(), Error> {
    info!("set_config called by {}: {} = {}", ctx.author().name, key, value);
    let parsed = parse_value(&value);
    ctx.data().kv.write().await.modify(&key, parsed.clone()).await?;

    let warning = if keys::KNOWN.contains(&key.as_str()) {
        ""
    } else {
        "\n:warning: This key is not used by the bot."
    };
    ctx.send(poise::CreateReply::default()
        .content(format!("`{}` set to `{}`{}", key, parsed, warning))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Remove a configuration key
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn remove_config(
    ctx: Context<'_>,
    #[description = "Key to remove"] key: String,
) -> Result<(), Error> {
    info!("remove_config called by {}: {}", ctx.author().name, key);
    let content = match ctx.data().kv.write().await.remove(&key).await {
        Ok(()) => format!("`{}` removed", key),
        Err(BotError::ConfigNotFound { .. }) => format!("`{}` is not set", key),
        Err(e) => return Err(e.into()),
    };
    ctx.send(poise::CreateReply::default()
        .content(content)
        .ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1392420336506503248"), json!(1392420336506503248u64));
        assert_eq!(parse_value("<#42>"), json!(42));
        assert_eq!(parse_value("<@&7>"), json!(7));
        assert_eq!(parse_value("[1, 2]"), json!([1, 2]));
        assert_eq!(parse_value(" hello "), json!("hello"));
    }
}
