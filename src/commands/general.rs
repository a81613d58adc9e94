use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("HellBot Commands")
        .description("Register, build a team, then join the matchmaking vocal with your mate.")
        .field("/register", "Register as a player with your GeoGuessr profile", false)
        .field("/team", "Create your team with another registered player", false)
        .field("/ruleset", "Toggle NM 30s or NMPZ 15s duels", false)
        .field("/queue", "Show waiting teams and open matches", false)
        .field("/close_match", "Close an open match (Staff)", false)
        .field("/matchmaking_logs", "Show the latest matchmaking events (Staff)", false)
        .field("/get_config", "Show the bot configuration (Admin)", false)
        .field("/set_config", "Set a configuration key (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
