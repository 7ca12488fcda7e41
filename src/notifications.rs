use crate::errors::AppError;
use crate::models::Proposal;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Outbound delivery of customer-facing documents.
///
/// Template rendering happens on the receiving side; implementations only hand over
/// the document data.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Delivers a proposal to `proposal.customer.email`.
    async fn send_proposal(&self, proposal: &Proposal) -> Result<(), AppError>;
}

pub type SharedDispatcher = Arc<dyn NotificationDispatcher>;

/// Posts proposal notifications to an HTTP endpoint (mail relay, automation hook).
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookDispatcher {
    /// Creates a new `WebhookDispatcher`.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint receiving the JSON payload.
    /// * `token` - Optional bearer token sent in the `Authorization` header.
    pub fn new(url: String, token: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::Notification(format!("Failed to create notification client: {}", e))
            })?;

        Ok(Self { client, url, token })
    }
}

fn proposal_payload(proposal: &Proposal) -> serde_json::Value {
    json!({
        "type": "proposal.sent",
        "data": {
            "proposal_id": proposal.id,
            "number": proposal.number,
            "recipient": {
                "name": proposal.customer.name,
                "email": proposal.customer.email,
            },
            "project_title": proposal.project_title,
            "items": proposal.items,
            "subtotal": proposal.subtotal.to_string(),
            "tax_rate": proposal.tax_rate.to_string(),
            "tax": proposal.tax.to_string(),
            "total": proposal.total.to_string(),
            "valid_until": proposal.valid_until,
            "notes": proposal.notes,
        }
    })
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send_proposal(&self, proposal: &Proposal) -> Result<(), AppError> {
        tracing::info!(
            "Dispatching proposal {} to {}",
            proposal.number,
            self.url
        );

        let mut request = self.client.post(&self.url).json(&proposal_payload(proposal));
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Notification request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Notification(format!(
                "Notification endpoint returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!("Proposal {} dispatched", proposal.number);
        Ok(())
    }
}

/// Dispatcher used when no webhook is configured: records the send in the log only.
#[derive(Debug, Clone, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_proposal(&self, proposal: &Proposal) -> Result<(), AppError> {
        tracing::info!(
            "Proposal {} ready for {} (no webhook configured, total {})",
            proposal.number,
            proposal.customer.email.as_deref().unwrap_or("<no email>"),
            proposal.total
        );
        Ok(())
    }
}

/// Picks the webhook dispatcher when a URL is configured.
pub fn dispatcher_from_config(url: Option<&str>, token: Option<&str>) -> Result<SharedDispatcher, AppError> {
    match url {
        Some(url) => {
            let dispatcher = WebhookDispatcher::new(url.to_string(), token.map(str::to_string))?;
            Ok(Arc::new(dispatcher))
        }
        None => Ok(Arc::new(LogDispatcher)),
    }
}
