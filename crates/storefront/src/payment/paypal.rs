//! PayPal Orders v2 client.
//!
//! Authenticates with OAuth2 client credentials and caches the access token
//! until shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{format_amount, CapturedPayment, CreatedPayment, PaymentError, PaymentGateway, PaymentRequest};

/// Refresh the provider token this long before its stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Default, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PayPalGateway {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for PayPalGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalGateway")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl PayPalGateway {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, client_id: &str, client_secret: &str) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, PaymentError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = read_json(resp).await?;
        debug!(expires_in = token.expires_in, "paypal access token obtained");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *guard = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    #[instrument(skip_all, fields(reference = %request.reference))]
    async fn create_order(&self, request: &PaymentRequest) -> Result<CreatedPayment, PaymentError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference,
                "description": request.description,
                "amount": {
                    "currency_code": request.currency,
                    "value": format_amount(request.amount_cents),
                },
            }],
        });
        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", self.base_url))
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("create-{}", request.reference))
            .json(&body)
            .send()
            .await?;
        let order: OrderResponse = read_json(resp).await?;
        info!(provider_order_id = %order.id, status = %order.status, "paypal order created");

        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone());
        Ok(CreatedPayment {
            provider_order_id: order.id,
            status: order.status,
            approve_url,
        })
    }

    #[instrument(skip(self))]
    async fn capture_order(&self, provider_order_id: &str) -> Result<CapturedPayment, PaymentError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{provider_order_id}/capture",
                self.base_url
            ))
            .bearer_auth(token)
            .header("PayPal-Request-Id", format!("capture-{provider_order_id}"))
            .json(&json!({}))
            .send()
            .await?;
        let order: OrderResponse = read_json(resp).await?;

        let capture = order
            .purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next();

        match capture {
            Some(c) if order.status == "COMPLETED" && c.status == "COMPLETED" => {
                info!(capture_id = %c.id, "paypal capture completed");
                Ok(CapturedPayment {
                    provider_order_id: order.id.clone(),
                    capture_id: c.id.clone(),
                    status: order.status.clone(),
                })
            }
            Some(c) => {
                warn!(order_status = %order.status, capture_status = %c.status, "paypal capture not completed");
                Err(PaymentError::Declined(c.status.clone()))
            }
            None => Err(PaymentError::Declined(order.status)),
        }
    }
}

/// Decode a success body, or turn a failure status into [`PaymentError::Provider`].
async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, PaymentError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(PaymentError::Provider {
            status: status.as_u16(),
            body,
        });
    }
    resp.json::<T>()
        .await
        .map_err(|e| PaymentError::Transport(format!("unreadable provider response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Clone, Default)]
    struct Fake {
        token_calls: Arc<AtomicUsize>,
        decline: bool,
    }

    async fn token(State(fake): State<Fake>, headers: HeaderMap) -> Json<serde_json::Value> {
        assert!(headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic ")));
        fake.token_calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({"access_token": "A21-token", "token_type": "Bearer", "expires_in": 32400}))
    }

    async fn create(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> (StatusCode, Json<serde_json::Value>) {
        assert_eq!(headers["authorization"], "Bearer A21-token");
        assert_eq!(body["purchase_units"][0]["amount"]["value"], "90.00");
        (
            StatusCode::CREATED,
            Json(json!({
                "id": "5O190127TN364715T",
                "status": "CREATED",
                "links": [
                    {"href": "https://api.example/self", "rel": "self", "method": "GET"},
                    {"href": "https://www.sandbox.paypal.com/checkoutnow?token=5O190127TN364715T", "rel": "approve", "method": "GET"}
                ]
            })),
        )
    }

    async fn capture(State(fake): State<Fake>, Path(id): Path<String>) -> Json<serde_json::Value> {
        let status = if fake.decline { "DECLINED" } else { "COMPLETED" };
        let order_status = if fake.decline { "PAYER_ACTION_REQUIRED" } else { "COMPLETED" };
        Json(json!({
            "id": id,
            "status": order_status,
            "purchase_units": [{"payments": {"captures": [{"id": "3C679366HH908993F", "status": status}]}}]
        }))
    }

    async fn spawn(fake: Fake) -> String {
        let app = Router::new()
            .route("/v1/oauth2/token", post(token))
            .route("/v2/checkout/orders", post(create))
            .route("/v2/checkout/orders/:id/capture", post(capture))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            reference: "42".into(),
            amount_cents: 9_000,
            currency: "USD".into(),
            description: "Order 42".into(),
        }
    }

    #[tokio::test]
    async fn create_and_capture_reuse_cached_token() {
        let fake = Fake::default();
        let base = spawn(fake.clone()).await;
        let gw = PayPalGateway::new(&base, "id", "secret").unwrap();

        let created = gw.create_order(&request()).await.unwrap();
        assert_eq!(created.provider_order_id, "5O190127TN364715T");
        assert!(created.approve_url.unwrap().contains("checkoutnow"));

        let captured = gw.capture_order(&created.provider_order_id).await.unwrap();
        assert_eq!(captured.capture_id, "3C679366HH908993F");
        assert_eq!(fake.token_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn incomplete_capture_is_declined() {
        let fake = Fake {
            decline: true,
            ..Default::default()
        };
        let base = spawn(fake).await;
        let gw = PayPalGateway::new(&base, "id", "secret").unwrap();
        let err = gw.capture_order("5O190127TN364715T").await.unwrap_err();
        assert!(matches!(err, PaymentError::Declined(ref s) if s == "DECLINED"));
    }

    #[tokio::test]
    async fn provider_error_status_is_surfaced() {
        let app = Router::new().route(
            "/v1/oauth2/token",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid_client") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let gw = PayPalGateway::new(&format!("http://{addr}/"), "id", "bad").unwrap();
        let err = gw.create_order(&request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Provider { status: 401, .. }));
    }
}
