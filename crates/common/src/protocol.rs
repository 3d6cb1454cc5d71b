//! Request and response types exchanged between the storefront API and its
//! clients.
//!
//! These types are serialised as JSON over the public HTTP API and over the
//! notification hub WebSocket.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FieldErrors;

/// Declares a fieldless enum stored as text in the database and sent as its
/// variant name over the wire.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Canonical text form, identical to the serde representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

/// Returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error envelope returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. `"NOT_FOUND"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
    /// Field-level validation messages, present only for validation errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
    /// Per-request identifier, also sent as the `x-trace-id` header.
    #[serde(default)]
    pub trace_id: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            errors: None,
            trace_id: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

text_enum! {
    /// Access role of an account.
    Role { Admin, Customer, Partner }
}

/// `POST /api/auth/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// `POST /api/auth/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /api/auth/refresh` and `POST /api/auth/logout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Public view of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Token pair issued by login, register and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: UserProfile,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occasion {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Create / update body for occasions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccasionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub bouquet_id: i64,
    pub url: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bouquet {
    pub id: i64,
    pub occasion_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub is_available: bool,
    /// Primary image first.
    pub images: Vec<Image>,
}

/// Create / update body for bouquets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BouquetRequest {
    pub occasion_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    /// New bouquets default to available; an update without it keeps the
    /// stored value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
}

/// `POST /api/admin/bouquets/{id}/images`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub url: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// Query string of `GET /api/bouquets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BouquetQuery {
    pub occasion_id: Option<i64>,
    pub search: Option<String>,
    pub available_only: Option<bool>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One page of a paginated listing. `page` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

text_enum! {
    /// Lifecycle of an order.
    OrderStatus { Pending, Paid, Processing, Shipped, Delivered, Cancelled }
}

/// One cart line as submitted at checkout. Prices are never taken from the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub bouquet_id: i64,
    pub quantity: u32,
}

/// `POST /api/orders/checkout`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartLine>,
    pub recipient_name: String,
    pub delivery_address: String,
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub card_message: Option<String>,
}

/// Result of checkout: the pending order and where to approve the payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub provider_order_id: String,
    pub approve_url: Option<String>,
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub bouquet_id: i64,
    pub bouquet_name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub line_total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: String,
    pub recipient_name: String,
    pub delivery_address: String,
    pub delivery_date: Option<NaiveDate>,
    pub card_message: Option<String>,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `PUT /api/orders/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Query string of `GET /api/admin/orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
}

// ---------------------------------------------------------------------------
// Partner onboarding
// ---------------------------------------------------------------------------

text_enum! {
    /// Review state of a partner application.
    ApplicationStatus { Pending, Approved, Rejected }
}

/// `POST /api/partners/applications`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerApplicationRequest {
    pub business_name: String,
    pub contact_phone: String,
    pub address: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerApplication {
    pub id: i64,
    pub user_id: Uuid,
    pub business_name: String,
    pub contact_phone: String,
    pub address: String,
    pub description: Option<String>,
    pub status: ApplicationStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// `POST /api/admin/partner-applications/{id}/reject`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectApplicationRequest {
    pub reason: String,
}

/// Query string of `GET /api/admin/partner-applications`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationListQuery {
    pub status: Option<ApplicationStatus>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewOrder,
    OrderStatusChanged,
    ApplicationSubmitted,
    ApplicationReviewed,
}

/// A message delivered to every member of a hub group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Frames a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HubCommand {
    Join { group: String },
    Leave { group: String },
}

/// Frames the hub sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    Notification {
        group: String,
        notification: Notification,
    },
    Joined {
        group: String,
    },
    Left {
        group: String,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the database answered a ping.
    pub database: bool,
}
