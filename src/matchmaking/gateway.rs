use async_trait::async_trait;

use crate::error::Result;

/// Chat-platform side effects the matchmaker needs
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Create a text channel visible to the participants and staff only
    async fn create_match_channel(&self, name: &str, participants: &[u64]) -> Result<u64>;

    async fn rename_channel(&self, channel_id: u64, name: &str) -> Result<()>;

    async fn delete_channel(&self, channel_id: u64) -> Result<()>;

    async fn send_dm(&self, user_id: u64, content: &str) -> Result<()>;

    async fn send_message(&self, channel_id: u64, content: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::BotError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum GatewayCall {
        CreateMatchChannel { name: String, participants: Vec<u64> },
        Rename { channel_id: u64, name: String },
        Delete { channel_id: u64 },
        Dm { user_id: u64, content: String },
        Message { channel_id: u64, content: String },
    }

    /// Records every call; channel creation hands out ids from 1000
    #[derive(Default)]
    pub struct RecordingGateway {
        pub calls: Mutex<Vec<GatewayCall>>,
        next_id: AtomicU64,
        pub fail_dms: bool,
    }

    impl RecordingGateway {
        /// Every DM fails, as for members who closed their DMs
        pub fn failing_dms() -> Self {
            Self {
                fail_dms: true,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<GatewayCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn created_channels(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, GatewayCall::CreateMatchChannel { .. }))
                .count()
        }

        fn record(&self, call: GatewayCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ChatGateway for RecordingGateway {
        async fn create_match_channel(&self, name: &str, participants: &[u64]) -> Result<u64> {
            self.record(GatewayCall::CreateMatchChannel {
                name: name.to_string(),
                participants: participants.to_vec(),
            });
            Ok(1000 + self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn rename_channel(&self, channel_id: u64, name: &str) -> Result<()> {
            self.record(GatewayCall::Rename {
                channel_id,
                name: name.to_string(),
            });
            Ok(())
        }

        async fn delete_channel(&self, channel_id: u64) -> Result<()> {
            self.record(GatewayCall::Delete { channel_id });
            Ok(())
        }

        async fn send_dm(&self, user_id: u64, content: &str) -> Result<()> {
            self.record(GatewayCall::Dm {
                user_id,
                content: content.to_string(),
            });
            if self.fail_dms {
                return Err(BotError::Discord {
                    message: "Cannot send messages to this user".into(),
                });
            }
            Ok(())
        }

        async fn send_message(&self, channel_id: u64, content: &str) -> Result<()> {
            self.record(GatewayCall::Message {
                channel_id,
                content: content.to_string(),
            });
            Ok(())
        }
    }
}
