//! Append-only spreadsheet audit log.
//!
//! Rows are posted as JSON to a webhook (typically a spreadsheet script
//! endpoint). Appends are fire-and-forget: failures are logged and never
//! reach the caller.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BotError, Result};

/// Worksheet a row is appended to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Worksheet {
    #[serde(rename = "Inscrits")]
    Registrations,
    #[serde(rename = "Teams")]
    Teams,
    #[serde(rename = "Duels")]
    Duels,
}

#[async_trait]
pub trait SheetSink: Send + Sync {
    async fn append_row(&self, worksheet: Worksheet, row: Vec<String>) -> Result<()>;
}

/// Sink used when no webhook is configured
pub struct NoopSheetSink;

#[async_trait]
impl SheetSink for NoopSheetSink {
    async fn append_row(&self, worksheet: Worksheet, row: Vec<String>) -> Result<()> {
        debug!("Sheet disabled, dropping {:?} row with {} cells", worksheet, row.len());
        Ok(())
    }
}

#[derive(Serialize)]
struct AppendRequest<'a> {
    sheet: Worksheet,
    row: &'a [String],
}

pub struct WebhookSheetSink {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookSheetSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SheetSink for WebhookSheetSink {
    async fn append_row(&self, worksheet: Worksheet, row: Vec<String>) -> Result<()> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&AppendRequest {
                sheet: worksheet,
                row: &row,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BotError::ExternalApi {
                message: format!("sheet webhook returned {}", response.status()),
            });
        }
        Ok(())
    }
}

pub type SharedSheetSink = Arc<dyn SheetSink>;

/// Webhook sink if `SHEET_WEBHOOK_URL` is set, no-op otherwise
pub fn sheet_sink_from_env() -> SharedSheetSink {
    match std::env::var("SHEET_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => Arc::new(WebhookSheetSink::new(url)),
        _ => {
            warn!("SHEET_WEBHOOK_URL not set, spreadsheet audit log disabled");
            Arc::new(NoopSheetSink)
        }
    }
}

/// Append in the background; errors are only logged
pub fn append_detached(sink: &SharedSheetSink, worksheet: Worksheet, row: Vec<String>) {
    let sink = sink.clone();
    tokio::spawn(async move {
        if let Err(e) = sink.append_row(worksheet, row).await {
            warn!("Failed to append {:?} row to sheet: {}", worksheet, e);
        }
    });
}
