//! Automation executor interface
//!
//! The daemon does not drive a browser itself. It issues a submit command to
//! an external automation layer and interprets the structured result. The
//! polling strategy's open-signal probe lives here too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::barrier::ExecutionSignal;
use crate::domain::RegistrationPlan;

/// Errors from the automation layer
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation timed out after {0} ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("automation executor rejected the command: {0}")]
    Rejected(String),
}

impl AutomationError {
    /// Timeouts and network faults may be retried; rejections may not
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }
}

/// Structured result of one submission command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Signal for barrier classification (URL, markers, status, page text)
    pub signal: ExecutionSignal,

    /// Whether the provider showed a success marker
    #[serde(rename = "success-indicator")]
    pub success_indicator: bool,

    /// Provider confirmation id, present on success
    #[serde(rename = "confirmation-id")]
    pub confirmation_id: Option<String>,

    /// Queue position, when the provider reported one
    #[serde(rename = "queue-position")]
    pub queue_position: Option<u32>,
}

/// External automation executor: fills and submits the registration form
#[async_trait]
pub trait AutomationExecutor: Send + Sync {
    /// Submit the registration for `plan`. The nonce is an idempotency
    /// token: submitting twice with the same nonce must not register twice.
    async fn submit(&self, plan: &RegistrationPlan, nonce: &str) -> Result<SubmitOutcome, AutomationError>;

    /// Warm the connection to the provider ahead of T0. Default no-op for
    /// executors without preconnect support.
    async fn preconnect(&self, _plan: &RegistrationPlan) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// HTTP bridge to an external automation runner. The runner drives the
/// browser; we post it one submit command per attempt and read back a
/// structured outcome.
pub struct HttpAutomation {
    client: reqwest::Client,
    endpoint: String,
    timeout_ms: u64,
}

impl HttpAutomation {
    pub fn new(endpoint: impl Into<String>, timeout: std::time::Duration) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutomationError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> AutomationError {
        if e.is_timeout() {
            AutomationError::Timeout(self.timeout_ms)
        } else {
            AutomationError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl AutomationExecutor for HttpAutomation {
    async fn submit(&self, plan: &RegistrationPlan, nonce: &str) -> Result<SubmitOutcome, AutomationError> {
        let response = self
            .client
            .post(format!("{}/submit", self.endpoint))
            .header("x-idempotency-key", nonce)
            .json(plan)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(AutomationError::Rejected(format!(
                "runner answered {}",
                response.status()
            )));
        }

        response.json().await.map_err(|e| self.map_error(e))
    }

    async fn preconnect(&self, plan: &RegistrationPlan) -> Result<(), AutomationError> {
        self.client
            .post(format!("{}/preconnect", self.endpoint))
            .json(plan)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(())
    }
}

/// Open-signal probe used by the polling strategy during the lead window
#[async_trait]
pub trait OpenProbe: Send + Sync {
    /// Check whether the registration window looks open
    async fn is_open(&self, detection_url: &str) -> Result<bool, AutomationError>;
}

/// HTTP probe: the window counts as open when the detection URL answers 2xx
/// without a "closed" marker in the body
pub struct HttpOpenProbe {
    client: reqwest::Client,
}

impl HttpOpenProbe {
    pub fn new(timeout: std::time::Duration) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutomationError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OpenProbe for HttpOpenProbe {
    async fn is_open(&self, detection_url: &str) -> Result<bool, AutomationError> {
        let response = self
            .client
            .get(detection_url)
            .send()
            .await
            .map_err(|e| AutomationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AutomationError::Network(e.to_string()))?;
        let lower = body.to_lowercase();
        Ok(!lower.contains("registration closed") && !lower.contains("not yet open"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automation_error_transience() {
        assert!(AutomationError::Timeout(5_000).is_transient());
        assert!(AutomationError::Network("reset".to_string()).is_transient());
        assert!(!AutomationError::Rejected("bad plan".to_string()).is_transient());
    }

    #[test]
    fn test_submit_outcome_serde() {
        let outcome = SubmitOutcome {
            signal: ExecutionSignal {
                url: "https://camps.example.com/confirm".to_string(),
                detected_markers: vec![],
                http_status: 200,
                page_text: String::new(),
            },
            success_indicator: true,
            confirmation_id: Some("CONF-9".to_string()),
            queue_position: None,
        };

        let json = serde_json::to_string(&outcome).unwrap();
        let back: SubmitOutcome = serde_json::from_str(&json).unwrap();
        assert!(back.success_indicator);
        assert_eq!(back.confirmation_id.as_deref(), Some("CONF-9"));
    }
}
