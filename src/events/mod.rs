pub mod audit;
pub mod guild;
pub mod member;
pub mod message;
pub mod voice;

pub use guild::{handle_channel_delete, handle_member_update};
pub use member::{handle_invite_create, handle_invite_delete, handle_member_join, handle_member_remove};
pub use message::{handle_message, handle_message_delete, handle_message_update};
pub use voice::handle_voice_state_update;
