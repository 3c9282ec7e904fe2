//! Chat webhook notifications
//!
//! Posts a text summary of each completed dispatch run to a Feishu/Lark-style bot.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{DispatchSummary, OutcomeClass};
use crate::gateway::DispatchObserver;

/// Webhook notification client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage {
    msg_type: String,
    content: WebhookContent,
}

#[derive(Serialize)]
struct WebhookContent {
    text: String,
}

impl WebhookNotifier {
    /// Notifier for `webhook_url`, or `None` when no URL is configured
    pub fn from_config(webhook_url: Option<&str>) -> Option<Arc<Self>> {
        webhook_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                info!("Webhook notifications enabled");
                Self::new(url.to_string())
            })
    }

    pub fn new(webhook_url: String) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            webhook_url,
        })
    }

    /// Send a text message
    pub async fn send_message(&self, text: &str) -> Result<(), String> {
        let message = WebhookMessage {
            msg_type: "text".to_string(),
            content: WebhookContent {
                text: text.to_string(),
            },
        };

        match self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await
        {
            Ok(resp) => {
                if resp.status().is_success() {
                    debug!("Webhook notification sent");
                    Ok(())
                } else {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    error!("Webhook notification failed: {} - {}", status, body);
                    Err(format!("HTTP {}: {}", status, body))
                }
            }
            Err(e) => {
                error!("Webhook request failed: {}", e);
                Err(e.to_string())
            }
        }
    }
}

/// Human-readable run summary
pub fn format_summary(summary: &DispatchSummary) -> String {
    let headline = match summary.outcome_class() {
        OutcomeClass::HardFailure => "❌ Dispatch failed",
        OutcomeClass::PartialSuccess => "⚠️ Dispatch partially succeeded",
        OutcomeClass::SuccessWithWarning => "⚠️ Dispatch completed with warnings",
        OutcomeClass::Success => "🚢 Dispatch completed",
    };

    let mut text = format!("{} ({})", headline, summary.operator_id);
    if let Some(reason) = summary.reason {
        text.push_str(&format!("\nReason: {}", reason));
    }

    let totals = &summary.totals;
    if totals.processed() > 0 {
        text.push_str(&format!(
            "\nDeparted: {} | Failed: {} | Warnings: {} | Ignored: {}\n\
             Income: ${} | Fees: ${} | Net: ${}\n\
             Fuel used: {:.1}t | CO2 used: {:.1}t",
            totals.departed,
            totals.failed,
            totals.warnings,
            totals.ignored,
            totals.income.round_dp(2),
            totals.fees.round_dp(2),
            totals.net_income.round_dp(2),
            totals.fuel_used_t,
            totals.co2_used_t,
        ));
        if totals.high_fee > 0 {
            text.push_str(&format!("\n💸 High fee departures: {}", totals.high_fee));
        }
    }

    for failed in summary.failed.iter().take(10) {
        text.push_str(&format!(
            "\n• {} ({}): {}",
            failed.vessel_name, failed.vessel_id, failed.reason
        ));
    }
    if summary.failed.len() > 10 {
        text.push_str(&format!("\n… and {} more", summary.failed.len() - 10));
    }

    text
}

impl DispatchObserver for WebhookNotifier {
    fn on_dispatch_complete(&self, summary: &DispatchSummary) {
        // Lock conflicts and empty runs are not worth a chat message
        if summary.totals.processed() == 0 && summary.success {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, dropping webhook notification");
            return;
        };

        let notifier = self.clone();
        let text = format_summary(summary);
        runtime.spawn(async move {
            if let Err(e) = notifier.send_message(&text).await {
                error!("Failed to send dispatch summary: {}", e);
            }
        });
    }
}
