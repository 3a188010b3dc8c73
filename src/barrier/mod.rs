//! Barrier classification
//!
//! Maps a structured signal from an automation step to exactly one barrier
//! type. Classification is a pure function: same signal, same barrier, so
//! retries stay idempotent under test.

use serde::{Deserialize, Serialize};

/// A condition that blocks automated progress during submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Barrier {
    /// Nothing blocking
    #[default]
    None,
    /// CAPTCHA challenge detected
    Captcha,
    /// Provider requires login before the form
    LoginRequired,
    /// Payment step reached
    PaymentRequired,
    /// Provider placed us in a virtual waiting room
    Queue,
    /// Something went wrong that has no marker
    UnknownError,
}

impl std::fmt::Display for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Captcha => write!(f, "captcha"),
            Self::LoginRequired => write!(f, "login_required"),
            Self::PaymentRequired => write!(f, "payment_required"),
            Self::Queue => write!(f, "queue"),
            Self::UnknownError => write!(f, "unknown_error"),
        }
    }
}

impl Barrier {
    /// Whether this barrier blocks progress at all
    pub fn is_blocking(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether a human must act for this barrier, as opposed to a failure
    /// the daemon may retry through on its own
    pub fn needs_human(&self) -> bool {
        matches!(
            self,
            Self::Captcha | Self::LoginRequired | Self::PaymentRequired
        )
    }
}

/// Structured signal observed after one automation step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSignal {
    /// URL the automation step landed on
    pub url: String,

    /// UI markers the automation layer detected on the page
    #[serde(rename = "detected-markers")]
    pub detected_markers: Vec<String>,

    /// HTTP status of the final response
    #[serde(rename = "http-status")]
    pub http_status: u16,

    /// Raw page text excerpt for heuristics
    #[serde(rename = "page-text", default)]
    pub page_text: String,
}

impl ExecutionSignal {
    fn has_marker(&self, marker: &str) -> bool {
        self.detected_markers.iter().any(|m| m == marker)
    }

    fn text_contains(&self, needle: &str) -> bool {
        self.page_text.to_lowercase().contains(needle)
    }
}

/// Classify a signal into exactly one barrier.
///
/// Tie-break when multiple markers match: captcha > login > payment > queue
/// > unknown-error. A CAPTCHA gates everything behind it, so it wins.
pub fn classify(signal: &ExecutionSignal) -> Barrier {
    if signal.has_marker("captcha")
        || signal.text_contains("recaptcha")
        || signal.text_contains("verify you are human")
    {
        return Barrier::Captcha;
    }

    if signal.has_marker("login")
        || signal.http_status == 401
        || signal.url.contains("/login")
        || signal.text_contains("sign in to continue")
    {
        return Barrier::LoginRequired;
    }

    if signal.has_marker("payment")
        || signal.http_status == 402
        || signal.url.contains("/checkout")
        || signal.text_contains("payment required")
    {
        return Barrier::PaymentRequired;
    }

    if signal.has_marker("queue")
        || signal.http_status == 429
        || signal.text_contains("waiting room")
        || signal.text_contains("you are in line")
    {
        return Barrier::Queue;
    }

    if signal.http_status >= 400 || signal.has_marker("error") {
        return Barrier::UnknownError;
    }

    Barrier::None
}
