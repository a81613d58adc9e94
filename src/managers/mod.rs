pub mod channel_manager;
pub mod invite_tracker;
pub mod registration_manager;

pub use channel_manager::{drop_temp_vocal, spawn_temp_vocal, DiscordGateway};
pub use invite_tracker::{InviteTracker, InviteUse, SharedInviteTracker};
pub use registration_manager::{
    apply_flag_prefix, spawn_daily_flag_refresh, RegistrationManager, SharedRegistrationManager,
};
