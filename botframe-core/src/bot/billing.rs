//! Cost authorization and capture
//!
//! Bots meter variable-price work by authorizing an expected cost up
//! front and capturing the actual cost afterwards. The sink is a trait
//! so servers without billing run against [`NullBilling`] and tests can
//! record what was reported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::{CostItem, Identifier};

/// One authorize or capture report, scoped to a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostUsage {
    pub user_id: Identifier,
    pub conversation_id: Identifier,
    pub message_id: Identifier,
    pub items: Vec<CostItem>,
}

/// Destination for cost reports.
///
/// Implementations must not block response streaming; reports are fired
/// from a spawned task and failures are logged, never propagated.
#[async_trait]
pub trait BillingSink: Send + Sync + 'static {
    async fn authorize(&self, usage: CostUsage);
    async fn capture(&self, usage: CostUsage);
}

/// Discards all cost reports
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBilling;

#[async_trait]
impl BillingSink for NullBilling {
    async fn authorize(&self, _usage: CostUsage) {}
    async fn capture(&self, _usage: CostUsage) {}
}

/// Posts cost reports as JSON to a billing endpoint
#[derive(Debug, Clone)]
pub struct HttpBilling {
    client: reqwest::Client,
    authorize_url: String,
    capture_url: String,
}

impl HttpBilling {
    pub fn new(
        client: reqwest::Client,
        authorize_url: impl Into<String>,
        capture_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            authorize_url: authorize_url.into(),
            capture_url: capture_url.into(),
        }
    }

    async fn post(&self, url: &str, usage: &CostUsage) {
        let result = self.client.post(url).json(usage).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    status = %response.status(),
                    message_id = %usage.message_id,
                    "billing endpoint rejected cost report"
                );
            }
            Err(error) => {
                warn!(message_id = %usage.message_id, %error, "cost report failed");
            }
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl BillingSink for HttpBilling {
    async fn authorize(&self, usage: CostUsage) {
        self.post(&self.authorize_url, &usage).await;
    }

    async fn capture(&self, usage: CostUsage) {
        self.post(&self.capture_url, &usage).await;
    }
}
