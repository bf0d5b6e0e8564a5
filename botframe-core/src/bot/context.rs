//! Per-request context handed to bot handlers
//!
//! A [`RequestContext`] is valid for exactly one in-flight request. The
//! dispatcher closes it when the response stream ends, after which the
//! side-channel operations (attachment upload, cost reporting) fail with
//! [`DispatchError::RequestClosed`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::bot::attachments::{self, UploadSpec};
use crate::bot::billing::{BillingSink, CostUsage, NullBilling};
use crate::bot::error::DispatchError;
use crate::config::BotConfig;
use crate::protocol::{Attachment, CostItem, Identifier, QueryRequest};

pub(crate) struct RequestScope {
    pub(crate) message_id: Identifier,
    pub(crate) user_id: Identifier,
    pub(crate) conversation_id: Identifier,
    access_key: String,
    closed: AtomicBool,
    handles: Mutex<Vec<Attachment>>,
    ledger: Mutex<Vec<CostItem>>,
    config: Arc<BotConfig>,
    http: reqwest::Client,
    billing: Arc<dyn BillingSink>,
}

/// Handle to the in-flight request, cloneable into spawned work.
///
/// Operations validate against the originating request: an id that does
/// not match fails with `StaleRequest`, and everything fails with
/// `RequestClosed` once the response stream has ended.
#[derive(Clone)]
pub struct RequestContext {
    scope: Arc<RequestScope>,
}

impl RequestContext {
    pub(crate) fn for_request(
        request: &QueryRequest,
        config: Arc<BotConfig>,
        http: reqwest::Client,
        billing: Arc<dyn BillingSink>,
    ) -> Self {
        Self {
            scope: Arc::new(RequestScope {
                message_id: request.message_id.clone(),
                user_id: request.user_id.clone(),
                conversation_id: request.conversation_id.clone(),
                access_key: request.access_key.clone(),
                closed: AtomicBool::new(false),
                handles: Mutex::new(Vec::new()),
                ledger: Mutex::new(Vec::new()),
                config,
                http,
                billing,
            }),
        }
    }

    /// Context for calls that carry no query, such as settings fetches.
    /// Already closed, so side-channel operations are rejected.
    pub(crate) fn detached(config: Arc<BotConfig>) -> Self {
        Self {
            scope: Arc::new(RequestScope {
                message_id: Identifier::new(),
                user_id: Identifier::new(),
                conversation_id: Identifier::new(),
                access_key: String::new(),
                closed: AtomicBool::new(true),
                handles: Mutex::new(Vec::new()),
                ledger: Mutex::new(Vec::new()),
                config,
                http: reqwest::Client::new(),
                billing: Arc::new(NullBilling),
            }),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.scope.message_id
    }

    pub fn user_id(&self) -> &str {
        &self.scope.user_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.scope.conversation_id
    }

    pub(crate) fn close(&self) {
        self.scope.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.scope.closed.load(Ordering::SeqCst)
    }

    fn check_in_flight(&self, message_id: &str) -> Result<(), DispatchError> {
        if message_id != self.scope.message_id {
            return Err(DispatchError::StaleRequest(message_id.to_string()));
        }
        if self.is_closed() {
            return Err(DispatchError::RequestClosed);
        }
        Ok(())
    }

    /// Upload an attachment on behalf of the in-flight request and
    /// return a handle the handler can reference in its output.
    pub async fn post_attachment(
        &self,
        message_id: &str,
        spec: UploadSpec,
    ) -> Result<Attachment, DispatchError> {
        self.check_in_flight(message_id)?;
        let response = attachments::upload(
            &self.scope.http,
            &self.scope.config.attachment_endpoint,
            &self.scope.access_key,
            &spec,
        )
        .await?;

        let name = spec
            .filename
            .clone()
            .or_else(|| {
                spec.download_url
                    .as_deref()
                    .and_then(|u| u.rsplit('/').next().map(str::to_string))
            })
            .unwrap_or_default();
        let attachment = Attachment {
            url: response.attachment_url.unwrap_or_default(),
            content_type: spec.content_type.clone().unwrap_or_default(),
            name,
            parsed_content: None,
            inline_ref: response.inline_ref,
        };

        let mut handles = self.scope.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(attachment.clone());
        debug!(message_id, url = %attachment.url, "attachment registered");
        Ok(attachment)
    }

    /// Attachments uploaded so far during this request
    pub fn attachments(&self) -> Vec<Attachment> {
        self.scope
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Report an expected cost before doing metered work.
    ///
    /// Appends to the request ledger and fires the report to the billing
    /// sink without blocking the response stream.
    pub fn authorize_cost(&self, items: Vec<CostItem>) -> Result<(), DispatchError> {
        self.report_cost(items, true)
    }

    /// Report the actual cost of metered work after it completes.
    pub fn capture_cost(&self, items: Vec<CostItem>) -> Result<(), DispatchError> {
        self.report_cost(items, false)
    }

    fn report_cost(&self, items: Vec<CostItem>, authorize: bool) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::RequestClosed);
        }
        {
            let mut ledger = self.scope.ledger.lock().unwrap_or_else(|e| e.into_inner());
            ledger.extend(items.iter().cloned());
        }
        let usage = CostUsage {
            user_id: self.scope.user_id.clone(),
            conversation_id: self.scope.conversation_id.clone(),
            message_id: self.scope.message_id.clone(),
            items,
        };
        let billing = Arc::clone(&self.scope.billing);
        tokio::spawn(async move {
            if authorize {
                billing.authorize(usage).await;
            } else {
                billing.capture(usage).await;
            }
        });
        Ok(())
    }

    /// Everything authorized or captured so far during this request
    pub fn cost_ledger(&self) -> Vec<CostItem> {
        self.scope
            .ledger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolMessage;

    fn context() -> RequestContext {
        let mut request = QueryRequest::new(vec![ProtocolMessage::user("hi")]);
        request.message_id = "m1".to_string();
        request.user_id = "u1".to_string();
        request.conversation_id = "c1".to_string();
        RequestContext::for_request(
            &request,
            Arc::new(BotConfig::default()),
            reqwest::Client::new(),
            Arc::new(NullBilling),
        )
    }

    #[tokio::test]
    async fn stale_message_id_is_rejected_before_any_upload() {
        let ctx = context();
        let result = ctx
            .post_attachment("other", UploadSpec::from_url("https://example.com/f"))
            .await;
        assert!(matches!(result, Err(DispatchError::StaleRequest(id)) if id == "other"));
    }

    #[tokio::test]
    async fn closed_context_rejects_side_channels() {
        let ctx = context();
        ctx.close();
        let upload = ctx
            .post_attachment("m1", UploadSpec::from_url("https://example.com/f"))
            .await;
        assert!(matches!(upload, Err(DispatchError::RequestClosed)));
        assert!(matches!(
            ctx.authorize_cost(vec![CostItem::new("gen", 10)]),
            Err(DispatchError::RequestClosed)
        ));
    }

    #[tokio::test]
    async fn cost_reports_append_to_the_ledger() {
        let ctx = context();
        ctx.authorize_cost(vec![CostItem::new("gen", 10)]).unwrap();
        ctx.capture_cost(vec![CostItem::new("gen", 7)]).unwrap();
        let ledger = ctx.cost_ledger();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].amount_usd_milli_cents, 10);
        assert_eq!(ledger[1].amount_usd_milli_cents, 7);
    }
}
