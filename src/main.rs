use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Discord bot pairing GeoGuessr duel teams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Force re-sync of slash commands to all guilds (use when commands aren't showing up)
    #[arg(long, short = 's')]
    sync_commands: bool,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Guild the bot serves (defaults to DISCORD_GUILD_ID, then the first guild joined)
    #[arg(long)]
    guild_id: Option<u64>,

    /// Directory holding hellbot.json, inscriptions.json and matchmaking.json
    #[arg(long, env = "STATE_PATH", default_value = "state")]
    state_path: PathBuf,
}

mod commands;
mod config;
mod error;
mod events;
mod external;
mod logging;
mod managers;
mod matchmaking;
mod messages;
mod state;

use commands::{
    close_match, get_config, help, matchmaking_logs, ping, queue, register, remove_config,
    ruleset, set_config, team,
};
use config::{create_shared_kv_store, KvStore, MatchmakingSettings, SharedKvStore};
use events::audit::report_error;
use events::{
    handle_channel_delete, handle_invite_create, handle_invite_delete, handle_member_join,
    handle_member_remove, handle_member_update, handle_message, handle_message_delete,
    handle_message_update, handle_voice_state_update,
};
use external::{sheet_sink_from_env, GeoGuessrClient, ResultSource, SharedSheetSink};
use logging::SharedLogBuffer;
use managers::{
    spawn_daily_flag_refresh, DiscordGateway, InviteTracker, RegistrationManager,
    SharedInviteTracker, SharedRegistrationManager,
};
use matchmaking::{Matchmaker, MatchmakingHandle};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub kv: SharedKvStore,
    pub matchmaking: MatchmakingHandle,
    pub registration: SharedRegistrationManager,
    pub results: Arc<dyn ResultSource>,
    pub sheets: SharedSheetSink,
    pub log_buffer: SharedLogBuffer,
    pub invites: SharedInviteTracker,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    let (context, result) = match event {
        serenity::FullEvent::VoiceStateUpdate { old, new } => (
            "voice state update",
            handle_voice_state_update(ctx, old.as_ref(), new, data).await,
        ),
        serenity::FullEvent::Message { new_message } => {
            ("message", handle_message(ctx, new_message, data).await)
        }
        serenity::FullEvent::MessageUpdate {
            old_if_available,
            event,
            ..
        } => (
            "message edit",
            handle_message_update(ctx, old_if_available.as_ref(), event, data).await,
        ),
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            ..
        } => (
            "message deletion",
            handle_message_delete(ctx, *channel_id, *deleted_message_id, data).await,
        ),
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            ("member join", handle_member_join(ctx, new_member, data).await)
        }
        serenity::FullEvent::GuildMemberRemoval {
            guild_id,
            user,
            member_data_if_available,
        } => (
            "member leave",
            handle_member_remove(ctx, *guild_id, user, member_data_if_available.as_ref(), data)
                .await,
        ),
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            new: Some(member),
            ..
        } => {
            let old_name = old_if_available
                .as_ref()
                .map(|m| m.display_name().to_string());
            (
                "member update",
                handle_member_update(ctx, old_name, member, data).await,
            )
        }
        serenity::FullEvent::InviteCreate { data: invite } => {
            ("invite creation", handle_invite_create(ctx, invite, data).await)
        }
        serenity::FullEvent::InviteDelete { data: invite } => {
            ("invite deletion", handle_invite_delete(ctx, invite, data).await)
        }
        serenity::FullEvent::ChannelDelete { channel, .. } => {
            ("channel deletion", handle_channel_delete(channel, data).await)
        }
        _ => return Ok(()),
    };
    if let Err(e) = result {
        error!("Failed to handle {}: {}", context, e);
        report_error(&ctx.http, &data.kv, context, &e.to_string()).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    // Matchmaking events are mirrored to the log channel
    let log_buffer = logging::create_log_buffer(1000);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let token = std::env::var("DISCORD_TOKEN")
        .map_err(|_| anyhow::anyhow!("Missing DISCORD_TOKEN environment variable"))?;

    // Extract bot/application ID from token (first part before the dot, base64 encoded)
    if let Some(bot_id_b64) = token.split('.').next() {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(bot_id_b64)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bot_id_b64));
        if let Some(id_str) = decoded.ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
            info!("Bot ID: {} (configure intents at https://discord.com/developers/applications/{}/bot)", id_str, id_str);
        }
    }

    let state_path = args.state_path.clone();
    tokio::fs::create_dir_all(&state_path).await.ok();

    info!("Loading configuration store...");
    let kv = create_shared_kv_store(KvStore::load(state_path.join("hellbot.json")).await?);
    let settings = MatchmakingSettings::from_env();
    info!("Matchmaking settings: {:?}", settings);

    let results: Arc<dyn ResultSource> = Arc::new(GeoGuessrClient::from_env());
    let sheets = sheet_sink_from_env();

    let sync_commands = args.sync_commands;
    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id.or_else(|| {
        std::env::var("DISCORD_GUILD_ID")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
    });

    if sync_commands {
        info!("--sync-commands: Will force re-register slash commands");
    }
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                ping(),
                help(),
                register(),
                team(),
                ruleset(),
                queue(),
                close_match(),
                matchmaking_logs(),
                get_config(),
                set_config(),
                remove_config(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let context = format!(
                                "command /{} by {}",
                                ctx.command().qualified_name,
                                ctx.author().name
                            );
                            report_error(ctx.http(), &ctx.data().kv, &context, &error.to_string()).await;
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let kv = kv.clone();
            let results = results.clone();
            let sheets = sheets.clone();
            let log_buffer = log_buffer.clone();
            let settings = settings.clone();
            let state_path = state_path.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                let guild_id = match target_guild_id {
                    Some(gid) => serenity::GuildId::new(gid),
                    None => ready
                        .guilds
                        .first()
                        .map(|g| g.id)
                        .ok_or("Bot is not in any guild, set DISCORD_GUILD_ID")?,
                };
                info!("Serving guild {}", guild_id);

                if guild_commands || sync_commands {
                    info!("Registering commands to guild: {}", guild_id);
                    if let Err(e) = poise::builtins::register_in_guild(
                        ctx,
                        &framework.options().commands,
                        guild_id,
                    ).await {
                        error!("Failed to register commands for guild {}: {}", guild_id, e);
                    } else {
                        info!("Successfully registered {} commands for guild {}",
                              framework.options().commands.len(), guild_id);
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                let gateway = Arc::new(DiscordGateway::new(ctx.http.clone(), guild_id, kv.clone()));
                let matchmaker = Matchmaker::load(&state_path, &settings, gateway).await?;
                let matchmaking = matchmaking::spawn(matchmaker);

                let registration: SharedRegistrationManager = Arc::new(RegistrationManager::new(
                    matchmaking.clone(),
                    results.clone(),
                    sheets.clone(),
                ));

                let invites: SharedInviteTracker = Arc::new(InviteTracker::new());
                if let Err(e) = invites.refresh(&ctx.http, guild_id).await {
                    warn!("Could not read invites of guild {}: {}. Invite sources will not be tracked.", guild_id, e);
                }

                logging::spawn_log_forwarder(&log_buffer, ctx.http.clone(), kv.clone());
                spawn_daily_flag_refresh(
                    registration.clone(),
                    ctx.http.clone(),
                    guild_id,
                    settings.flag_refresh_hour,
                );

                Ok(Data {
                    kv,
                    matchmaking,
                    registration,
                    results,
                    sheets,
                    log_buffer,
                    invites,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let privileged_intents = ["MESSAGE_CONTENT", "GUILD_MEMBERS"];
    info!("Requesting privileged intents: {:?}", privileged_intents);

    // Deleted messages are only shown when cached
    let mut cache_settings = ::serenity::cache::Settings::default();
    cache_settings.max_messages = 500;

    let mut client = serenity::ClientBuilder::new(token, intents)
        .cache_settings(cache_settings)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("The following privileged intents need to be enabled in the Discord Developer Portal:");
            for intent in &privileged_intents {
                error!("  - {}", intent);
            }
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable these in Discord Developer Portal: {:?}",
                privileged_intents
            ));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
