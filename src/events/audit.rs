//! Audit embeds posted to the logs channel

use poise::serenity_prelude::{self as serenity, Http};
use tracing::{debug, warn};

use crate::config::{keys, SharedKvStore};
use crate::error::Result;

/// Discord rejects embed field values above 1024 characters
const FIELD_LIMIT: usize = 1024;

pub const COLOR_INFO: u32 = 0x3498db;
pub const COLOR_JOIN: u32 = 0x2ecc71;
pub const COLOR_ALERT: u32 = 0xe74c3c;

/// Fit `text` in an embed field, keeping its end
pub fn field_value(text: &str) -> String {
    fit(text, FIELD_LIMIT)
}

fn fit(text: &str, limit: usize) -> String {
    if text.trim().is_empty() {
        return "Content unavailable".to_string();
    }
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (limit - 3)).collect();
    format!("...{}", tail)
}

/// Post `embed` to the logs channel. Silently skipped when none is configured.
pub async fn post_to_logs(http: &Http, kv: &SharedKvStore, embed: serenity::CreateEmbed) -> Result<()> {
    let channel: Option<u64> = kv.read().await.get(keys::LOGS_CHANNEL_ID);
    let Some(channel_id) = channel else {
        debug!("No logs channel configured, audit embed dropped");
        return Ok(());
    };
    serenity::ChannelId::new(channel_id)
        .send_message(http, serenity::CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

/// Report a failed handler or command to the logs channel
pub async fn report_error(http: &Http, kv: &SharedKvStore, context: &str, error: &str) {
    // Room for the code fence around the error
    let details = fit(&error.replace("```", "'''"), FIELD_LIMIT - 8);
    let embed = serenity::CreateEmbed::new()
        .title("⚠️ Error detected")
        .description("An error occurred while the bot was running")
        .field("Context", field_value(context), false)
        .field("Error", format!("```\n{}```", details), false)
        .timestamp(serenity::Timestamp::now())
        .color(COLOR_ALERT);
    if let Err(e) = post_to_logs(http, kv, embed).await {
        warn!("Could not report error to the logs channel: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value() {
        assert_eq!(field_value("hello"), "hello");
        assert_eq!(field_value("  "), "Content unavailable");

        let long = format!("{}end", "x".repeat(2000));
        let fitted = field_value(&long);
        assert_eq!(fitted.chars().count(), FIELD_LIMIT);
        assert!(fitted.starts_with("..."));
        assert!(fitted.ends_with("end"));
    }

    #[test]
    fn test_error_block_fits_a_field() {
        let details = fit(&"e".repeat(5000), FIELD_LIMIT - 8);
        assert!(format!("```\n{}```", details).chars().count() <= FIELD_LIMIT);
    }
}
