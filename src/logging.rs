//! Log capture for the matchmaking log channel.
//!
//! A custom tracing layer keeps events emitted under the matchmaking target
//! in a ring buffer and broadcasts them; a forwarder task posts each one to
//! the configured Discord channel.

use futures::StreamExt;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::{keys, SharedKvStore};

/// Target prefix of the events mirrored to Discord
pub const MATCHMAKING_LOG: &str = "hellbot::matchmaking";

/// A single log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    pub fn format(&self) -> String {
        format!(
            "{} {} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level,
            self.target,
            self.message
        )
    }

    /// Discord line with a localized `<t:…:T>` timestamp
    pub fn to_discord(&self) -> String {
        format!("[<t:{}:T>] {}", self.timestamp.timestamp(), self.message)
    }
}

/// Buffer that stores recent log entries and broadcasts new ones
pub struct LogBuffer {
    tx: broadcast::Sender<LogEntry>,
    /// Recent log entries (ring buffer)
    recent: parking_lot::RwLock<Vec<LogEntry>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            tx,
            recent: parking_lot::RwLock::new(Vec::with_capacity(max_entries)),
            max_entries,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.max_entries {
                recent.remove(0);
            }
            recent.push(entry.clone());
        }

        // No receiver until the forwarder starts
        let _ = self.tx.send(entry);
    }

    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let recent = self.recent.read();
        let start = recent.len().saturating_sub(count);
        recent[start..].to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

pub type SharedLogBuffer = Arc<LogBuffer>;

pub fn create_log_buffer(max_entries: usize) -> SharedLogBuffer {
    Arc::new(LogBuffer::new(max_entries))
}

/// Tracing layer that captures matchmaking events to the buffer
pub struct LogCaptureLayer {
    buffer: SharedLogBuffer,
    target_prefix: &'static str,
}

impl LogCaptureLayer {
    pub fn new(buffer: SharedLogBuffer) -> Self {
        Self {
            buffer,
            target_prefix: MATCHMAKING_LOG,
        }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let target = event.metadata().target();
        if !target.starts_with(self.target_prefix) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level: event.metadata().level().to_string(),
            target: target.to_string(),
            message: visitor.message,
        });
    }
}

/// Visitor to extract message from tracing events
#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else if self.message.is_empty() {
            self.message = format!("{}={}", field.name(), value);
        }
    }
}

/// Post every captured entry to `matchmaking_logs_channel_id`.
/// Entries are dropped while the key is unset.
pub fn spawn_log_forwarder(buffer: &SharedLogBuffer, http: Arc<serenity::Http>, kv: SharedKvStore) {
    let mut stream = BroadcastStream::new(buffer.subscribe());
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    // Logged outside the captured target to avoid a feedback loop
                    warn!(target: "hellbot::logging", "Log forwarder skipped {} entries", skipped);
                    continue;
                }
            };

            let channel_id: Option<u64> = kv.read().await.get(keys::MATCHMAKING_LOGS_CHANNEL_ID);
            let Some(channel_id) = channel_id else {
                continue;
            };

            let message = serenity::CreateMessage::new().content(entry.to_discord());
            if let Err(e) = serenity::ChannelId::new(channel_id)
                .send_message(&http, message)
                .await
            {
                warn!(target: "hellbot::logging", "Failed to forward log entry: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            level: "INFO".to_string(),
            target: MATCHMAKING_LOG.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_log_buffer() {
        let buffer = create_log_buffer(3);
        buffer.push(entry("Message 1"));
        buffer.push(entry("Message 2"));

        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "Message 1");
        assert_eq!(recent[1].message, "Message 2");
    }

    #[test]
    fn test_log_buffer_overflow() {
        let buffer = create_log_buffer(2);
        for i in 1..=5 {
            buffer.push(entry(&format!("Message {}", i)));
        }

        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "Message 4");
        assert_eq!(recent[1].message, "Message 5");
    }

    #[test]
    fn test_only_matchmaking_targets_are_captured() {
        let buffer = create_log_buffer(10);
        let subscriber =
            tracing_subscriber::registry().with(LogCaptureLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "hellbot::matchmaking::engine", "**1_2** added to NM queue");
            tracing::info!(target: "serenity::gateway", "heartbeat");
        });

        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "**1_2** added to NM queue");
    }

    #[test]
    fn test_discord_format() {
        let mut e = entry("No match available");
        e.timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(e.to_discord(), "[<t:1700000000:T>] No match available");
    }
}
