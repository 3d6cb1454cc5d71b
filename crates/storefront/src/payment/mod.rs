//! Payment provider seam.
//!
//! Checkout talks to a [`PaymentGateway`]; production wires in
//! [`paypal::PayPalGateway`], tests use the generated `MockPaymentGateway`.

pub mod paypal;

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a payment gateway.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The provider could not be reached or returned an unreadable body.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// The provider processed the request but did not complete the payment.
    #[error("payment declined: {0}")]
    Declined(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Transport(e.to_string())
    }
}

/// What to charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Our order id, echoed back by the provider as the reference.
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
}

/// Provider-side order awaiting buyer approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    pub provider_order_id: String,
    pub status: String,
    /// Where the buyer approves the payment, if the provider returned one.
    pub approve_url: Option<String>,
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPayment {
    pub provider_order_id: String,
    pub capture_id: String,
    pub status: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a provider order for `request`.
    async fn create_order(&self, request: &PaymentRequest) -> Result<CreatedPayment, PaymentError>;

    /// Capture an approved provider order. Returns [`PaymentError::Declined`]
    /// when the provider does not report the capture as completed.
    async fn capture_order(&self, provider_order_id: &str) -> Result<CapturedPayment, PaymentError>;
}

/// `1234` cents → `"12.34"`, the decimal string form providers expect.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(0), "0.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(4_500), "45.00");
        assert_eq!(format_amount(123_456), "1234.56");
        assert_eq!(format_amount(-250), "-2.50");
    }
}
