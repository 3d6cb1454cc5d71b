//! Typed client for the storefront HTTP API.
//!
//! Authenticated calls carry the stored access token. A `401` triggers one
//! refresh with the stored refresh token and one replay of the failed
//! request; if that does not succeed the session is dropped and the caller
//! gets [`ClientError::LoginRequired`].

use std::time::Duration;

use chrono::NaiveDate;
use common::protocol::{
    AuthResponse, Bouquet, BouquetQuery, CheckoutRequest, CheckoutResponse, ErrorResponse,
    LoginRequest, Occasion, Order, Page, PartnerApplication, PartnerApplicationRequest,
    RefreshRequest, RegisterRequest, UserProfile,
};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cart::{Cart, CartStore};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::session::{Session, SessionStore};
use crate::storage::FileStore;

/// Delivery details collected at checkout. The lines come from the cart.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub recipient_name: String,
    pub delivery_address: String,
    pub delivery_date: Option<NaiveDate>,
    pub card_message: Option<String>,
}

/// A request that can be built again for the replay after a refresh.
#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
    authenticated: bool,
}

impl Call {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticated: false,
        }
    }

    fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    fn authed(mut self) -> Self {
        self.authenticated = true;
        self
    }

    fn json<T: Serialize>(mut self, body: &T) -> ClientResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    fn param(mut self, key: &'static str, value: Option<impl ToString>) -> Self {
        if let Some(v) = value {
            self.query.push((key, v.to_string()));
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    sessions: SessionStore,
    carts: CartStore,
}

impl ApiClient {
    pub fn new(cfg: &ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let store = FileStore::open(&cfg.state_dir)?;
        Ok(Self::with_parts(http, &cfg.api_url, store))
    }

    fn with_parts(http: reqwest::Client, base: &str, store: FileStore) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_owned(),
            sessions: SessionStore::new(store.clone()),
            carts: CartStore::new(store),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn carts(&self) -> &CartStore {
        &self.carts
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, req: &RegisterRequest) -> ClientResult<UserProfile> {
        let auth: AuthResponse = self
            .send_json(Call::post("/api/auth/register").json(req)?)
            .await?;
        self.store_session(auth)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> ClientResult<UserProfile> {
        let req = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };
        let auth: AuthResponse = self
            .send_json(Call::post("/api/auth/login").json(&req)?)
            .await?;
        self.store_session(auth)
    }

    /// Revoke the refresh token on the server when possible, then forget the
    /// local session and cart regardless.
    pub async fn logout(&self) -> ClientResult<()> {
        if let Some(session) = self.sessions.load()? {
            let req = RefreshRequest {
                refresh_token: session.refresh_token,
            };
            let call = Call::post("/api/auth/logout").json(&req)?;
            if let Err(e) = self.send(call).await {
                warn!(error = %e, "server-side logout failed; clearing local session anyway");
            }
        }
        self.sessions.clear()?;
        self.carts.clear()?;
        info!("signed out");
        Ok(())
    }

    pub async fn me(&self) -> ClientResult<UserProfile> {
        self.send_json(Call::get("/api/auth/me").authed()).await
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    pub async fn occasions(&self) -> ClientResult<Vec<Occasion>> {
        self.send_json(Call::get("/api/occasions")).await
    }

    pub async fn bouquets(&self, query: &BouquetQuery) -> ClientResult<Page<Bouquet>> {
        let call = Call::get("/api/bouquets")
            .param("occasion_id", query.occasion_id)
            .param("search", query.search.as_deref())
            .param("available_only", query.available_only)
            .param("page", query.page)
            .param("page_size", query.page_size);
        self.send_json(call).await
    }

    pub async fn bouquet(&self, id: i64) -> ClientResult<Bouquet> {
        self.send_json(Call::get(format!("/api/bouquets/{id}"))).await
    }

    /// Fetch the bouquet and add it to the stored cart at its current price.
    pub async fn add_to_cart(&self, bouquet_id: i64, quantity: u32) -> ClientResult<Cart> {
        let bouquet = self.bouquet(bouquet_id).await?;
        if !bouquet.is_available {
            return Err(ClientError::Invalid(format!(
                "{} is currently unavailable",
                bouquet.name
            )));
        }
        self.carts
            .add(bouquet.id, &bouquet.name, bouquet.price_cents, quantity)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place an order for the stored cart. The cart is kept until the payment
    /// is captured.
    pub async fn checkout(&self, delivery: &Delivery) -> ClientResult<CheckoutResponse> {
        let cart = self.carts.load()?;
        if cart.is_empty() {
            return Err(ClientError::Invalid("the cart is empty".into()));
        }
        let req = CheckoutRequest {
            items: cart.to_lines(),
            recipient_name: delivery.recipient_name.clone(),
            delivery_address: delivery.delivery_address.clone(),
            delivery_date: delivery.delivery_date,
            card_message: delivery.card_message.clone(),
        };
        let resp: CheckoutResponse = self
            .send_json(Call::post("/api/orders/checkout").authed().json(&req)?)
            .await?;
        info!(order_id = resp.order_id, total_cents = resp.total_cents, "order placed");
        Ok(resp)
    }

    /// Capture the approved payment and empty the cart.
    pub async fn capture(&self, order_id: i64) -> ClientResult<Order> {
        let order: Order = self
            .send_json(Call::post(format!("/api/orders/{order_id}/capture")).authed())
            .await?;
        self.carts.clear()?;
        Ok(order)
    }

    pub async fn orders(&self) -> ClientResult<Vec<Order>> {
        self.send_json(Call::get("/api/orders").authed()).await
    }

    pub async fn order(&self, id: i64) -> ClientResult<Order> {
        self.send_json(Call::get(format!("/api/orders/{id}")).authed())
            .await
    }

    // -----------------------------------------------------------------------
    // Partners
    // -----------------------------------------------------------------------

    pub async fn apply_partner(
        &self,
        req: &PartnerApplicationRequest,
    ) -> ClientResult<PartnerApplication> {
        self.send_json(Call::post("/api/partners/applications").authed().json(req)?)
            .await
    }

    pub async fn my_applications(&self) -> ClientResult<Vec<PartnerApplication>> {
        self.send_json(Call::get("/api/partners/applications/me").authed())
            .await
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    fn store_session(&self, auth: AuthResponse) -> ClientResult<UserProfile> {
        let user = auth.user.clone();
        self.sessions.save(&Session::from(auth))?;
        Ok(user)
    }

    async fn send_json<T: DeserializeOwned>(&self, call: Call) -> ClientResult<T> {
        let resp = self.send(call).await?;
        Ok(resp.json().await?)
    }

    /// Send `call`, refreshing and replaying once on `401`. Returns only
    /// successful responses; failures are decoded from the error envelope.
    async fn send(&self, call: Call) -> ClientResult<reqwest::Response> {
        if !call.authenticated {
            return decode(self.dispatch(&call, None).await?).await;
        }

        let session = self.sessions.load()?.ok_or(ClientError::LoginRequired)?;
        let resp = self.dispatch(&call, Some(&session.access_token)).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return decode(resp).await;
        }

        debug!(path = %call.path, "access token rejected; refreshing");
        let session = self.refresh(&session.refresh_token).await?;
        let resp = self.dispatch(&call, Some(&session.access_token)).await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %call.path, "request rejected after refresh; signing out");
            self.sessions.clear()?;
            return Err(ClientError::LoginRequired);
        }
        decode(resp).await
    }

    async fn refresh(&self, refresh_token: &str) -> ClientResult<Session> {
        let req = RefreshRequest {
            refresh_token: refresh_token.to_owned(),
        };
        let call = Call::post("/api/auth/refresh").json(&req)?;
        match decode(self.dispatch(&call, None).await?).await {
            Ok(resp) => {
                let auth: AuthResponse = resp.json().await?;
                let session = Session::from(auth);
                self.sessions.save(&session)?;
                debug!("session refreshed");
                Ok(session)
            }
            Err(ClientError::Api { status, body }) => {
                warn!(status, code = %body.code, "refresh rejected; signing out");
                self.sessions.clear()?;
                Err(ClientError::LoginRequired)
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, call: &Call, token: Option<&str>) -> ClientResult<reqwest::Response> {
        let url = format!("{}{}", self.base, call.path);
        let mut req = self.http.request(call.method.clone(), url);
        if !call.query.is_empty() {
            req = req.query(&call.query);
        }
        if let Some(body) = &call.body {
            req = req.json(body);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }
}

/// Pass successful responses through; turn failures into [`ClientError::Api`].
async fn decode(resp: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await?;
    let body = serde_json::from_str::<ErrorResponse>(&text).unwrap_or_else(|_| {
        let reason = status.canonical_reason().unwrap_or("request failed");
        ErrorResponse::new("API_ERROR", reason.to_lowercase())
    });
    Err(ClientError::Api {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode as AxStatus},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};

    #[derive(Clone, Default)]
    struct Mock {
        refreshes: Arc<AtomicUsize>,
        logouts: Arc<AtomicUsize>,
        order_hits: Arc<AtomicUsize>,
    }

    fn profile() -> Value {
        json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "email": "ada@example.com",
            "full_name": "Ada",
            "phone": null,
            "role": "Customer",
            "created_at": "2026-01-01T00:00:00Z"
        })
    }

    fn envelope(status: AxStatus, code: &str, message: &str) -> (AxStatus, Json<Value>) {
        (
            status,
            Json(json!({ "code": code, "message": message, "trace_id": "t1" })),
        )
    }

    fn bearer(headers: &HeaderMap) -> Option<&str> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    async fn me(headers: HeaderMap) -> (AxStatus, Json<Value>) {
        match bearer(&headers) {
            Some("fresh") => (AxStatus::OK, Json(profile())),
            _ => envelope(AxStatus::UNAUTHORIZED, "UNAUTHORIZED", "token expired"),
        }
    }

    async fn refresh(State(mock): State<Mock>, Json(req): Json<Value>) -> (AxStatus, Json<Value>) {
        mock.refreshes.fetch_add(1, Ordering::SeqCst);
        if req["refresh_token"] == "good" {
            let body = json!({
                "access_token": "fresh",
                "refresh_token": "rotated",
                "token_type": "Bearer",
                "expires_in": 900,
                "user": profile()
            });
            (AxStatus::OK, Json(body))
        } else {
            envelope(AxStatus::UNAUTHORIZED, "UNAUTHORIZED", "invalid refresh token")
        }
    }

    async fn logout(State(mock): State<Mock>) -> AxStatus {
        mock.logouts.fetch_add(1, Ordering::SeqCst);
        AxStatus::NO_CONTENT
    }

    /// Rejects every token, including freshly refreshed ones.
    async fn orders(State(mock): State<Mock>) -> (AxStatus, Json<Value>) {
        mock.order_hits.fetch_add(1, Ordering::SeqCst);
        envelope(AxStatus::UNAUTHORIZED, "UNAUTHORIZED", "token rejected")
    }

    async fn bouquet(Path(id): Path<i64>) -> (AxStatus, Json<Value>) {
        if id != 7 {
            return envelope(AxStatus::NOT_FOUND, "NOT_FOUND", "bouquet not found");
        }
        let body = json!({
            "id": 7,
            "occasion_id": 1,
            "name": "Spring Tulips",
            "description": null,
            "price_cents": 2500,
            "is_available": true,
            "images": []
        });
        (AxStatus::OK, Json(body))
    }

    async fn spawn(mock: Mock) -> String {
        let app = Router::new()
            .route("/api/auth/me", get(me))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/logout", post(logout))
            .route("/api/bouquets/:id", get(bouquet))
            .route("/api/orders", get(orders))
            .with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str, dir: &std::path::Path) -> ApiClient {
        let store = FileStore::open(dir).unwrap();
        ApiClient::with_parts(reqwest::Client::new(), base, store)
    }

    fn session(access: &str, refresh: &str) -> Session {
        Session {
            access_token: access.into(),
            refresh_token: refresh.into(),
            user: None,
        }
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_once_and_replayed() {
        let mock = Mock::default();
        let base = spawn(mock.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());
        api.sessions().save(&session("stale", "good")).unwrap();

        let me = api.me().await.unwrap();
        assert_eq!(me.email, "ada@example.com");
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);

        let stored = api.sessions().load().unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh");
        assert_eq!(stored.refresh_token, "rotated");

        // The new token works without another refresh.
        api.me().await.unwrap();
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_session() {
        let mock = Mock::default();
        let base = spawn(mock.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());
        api.sessions().save(&session("stale", "revoked")).unwrap();

        let err = api.me().await.unwrap_err();
        assert!(matches!(err, ClientError::LoginRequired));
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);
        assert!(api.sessions().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn replay_rejected_after_refresh_signs_out() {
        let mock = Mock::default();
        let base = spawn(mock.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());
        api.sessions().save(&session("stale", "good")).unwrap();

        let err = api.orders().await.unwrap_err();
        assert!(matches!(err, ClientError::LoginRequired));
        assert_eq!(mock.order_hits.load(Ordering::SeqCst), 2);
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 1);
        assert!(api.sessions().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn authenticated_call_without_session_never_hits_server() {
        let mock = Mock::default();
        let base = spawn(mock.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());

        assert!(matches!(api.orders().await, Err(ClientError::LoginRequired)));
        assert_eq!(mock.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_envelope_is_decoded() {
        let base = spawn(Mock::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());

        let err = api.bouquet(99).await.unwrap_err();
        assert_eq!(err.code(), Some("NOT_FOUND"));
        match err {
            ClientError::Api { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body.message, "bouquet not found");
                assert_eq!(body.trace_id, "t1");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_to_cart_uses_server_price_and_logout_clears_everything() {
        let mock = Mock::default();
        let base = spawn(mock.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());
        api.sessions().save(&session("fresh", "good")).unwrap();

        let cart = api.add_to_cart(7, 2).await.unwrap();
        assert_eq!(cart.total_cents(), 5_000);
        assert_eq!(cart.items[0].name, "Spring Tulips");

        api.logout().await.unwrap();
        assert_eq!(mock.logouts.load(Ordering::SeqCst), 1);
        assert!(api.sessions().load().unwrap().is_none());
        assert!(api.carts().load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkout_refuses_empty_cart() {
        let base = spawn(Mock::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let api = client(&base, dir.path());
        api.sessions().save(&session("fresh", "good")).unwrap();

        let err = api.checkout(&Delivery::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));
    }
}
