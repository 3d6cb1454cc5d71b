//! Checkout, payment capture and order lifecycle.

pub mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use common::protocol::{
    CheckoutRequest, CheckoutResponse, Notification, NotificationKind, Order, OrderStatus, Role,
};
use common::Validator;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::notify::{groups::user_group, NotificationHub, ADMINS, PARTNERS};
use crate::payment::{PaymentError, PaymentGateway, PaymentRequest};
use store::{NewLine, NewOrder};

pub const MAX_LINES: usize = 50;
pub const MAX_QUANTITY: u32 = 99;

/// Transaction status strings as stored in `paypal_transactions`.
pub mod txn_status {
    pub const CREATED: &str = "CREATED";
    pub const COMPLETED: &str = "COMPLETED";
    pub const DECLINED: &str = "DECLINED";
}

#[derive(Clone)]
pub struct OrderService {
    db: Database,
    payments: Arc<dyn PaymentGateway>,
    hub: NotificationHub,
    currency: String,
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

impl OrderService {
    pub fn new(
        db: Database,
        payments: Arc<dyn PaymentGateway>,
        hub: NotificationHub,
        currency: String,
    ) -> Self {
        Self {
            db,
            payments,
            hub,
            currency,
        }
    }

    /// Price the cart from the catalog, persist a pending order and open a
    /// provider payment for its total.
    #[instrument(skip(self, req))]
    pub async fn checkout(&self, user_id: Uuid, req: &CheckoutRequest) -> AppResult<CheckoutResponse> {
        validate_checkout(req)?;
        let quantities = merge_lines(req)?;

        let ids: Vec<i64> = quantities.keys().copied().collect();
        let bouquets = catalog::bouquets_by_id(self.db.pool(), &ids).await?;

        let mut v = Validator::new();
        let mut lines = Vec::with_capacity(quantities.len());
        for (&bouquet_id, &quantity) in &quantities {
            match bouquets.get(&bouquet_id) {
                None => {
                    v.check(false, "items", &format!("bouquet {bouquet_id} does not exist"));
                }
                Some(b) if !b.is_available => {
                    v.check(false, "items", &format!("bouquet {bouquet_id} is not available"));
                }
                Some(b) => lines.push(NewLine {
                    bouquet_id,
                    bouquet_name: b.name.clone(),
                    unit_price_cents: b.price_cents,
                    quantity,
                }),
            }
        }
        v.finish()?;

        let total_cents = order_total(&lines)?;
        let order_id = store::insert_order(
            self.db.pool(),
            &NewOrder {
                user_id,
                total_cents,
                currency: &self.currency,
                recipient_name: req.recipient_name.trim(),
                delivery_address: req.delivery_address.trim(),
                delivery_date: req.delivery_date,
                card_message: req
                    .card_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty()),
                lines: &lines,
            },
        )
        .await?;

        let payment = PaymentRequest {
            reference: order_id.to_string(),
            amount_cents: total_cents,
            currency: self.currency.clone(),
            description: format!("Flower order #{order_id}"),
        };
        let created = match self.payments.create_order(&payment).await {
            Ok(created) => created,
            Err(e) => {
                warn!(order_id, error = %e, "payment creation failed; discarding order");
                store::delete_order(self.db.pool(), order_id).await?;
                return Err(e.into());
            }
        };

        // The order and its payment row live or die together.
        if let Err(e) = store::insert_transaction(
            self.db.pool(),
            order_id,
            &created.provider_order_id,
            txn_status::CREATED,
            total_cents,
            &self.currency,
        )
        .await
        {
            warn!(order_id, error = %e, "recording payment failed; discarding order");
            store::delete_order(self.db.pool(), order_id).await?;
            return Err(e);
        }
        info!(order_id, total_cents, provider_order_id = %created.provider_order_id, "checkout opened");

        Ok(CheckoutResponse {
            order_id,
            provider_order_id: created.provider_order_id,
            approve_url: created.approve_url,
            total_cents,
            currency: self.currency.clone(),
        })
    }

    /// Capture the approved payment of `order_id` and mark the order paid.
    #[instrument(skip(self))]
    pub async fn capture(&self, user_id: Uuid, order_id: i64) -> AppResult<Order> {
        let order = store::find_order(self.db.pool(), order_id)
            .await?
            .filter(|o| o.user_id == user_id.to_string())
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
        let status = order.status()?;
        if status != OrderStatus::Pending {
            return Err(AppError::conflict(format!("order {order_id} is already {status}")));
        }
        let txn = store::open_transaction(self.db.pool(), order_id)
            .await?
            .ok_or_else(|| AppError::conflict(format!("order {order_id} has no open payment")))?;

        let captured = match self.payments.capture_order(&txn.provider_order_id).await {
            Ok(c) => c,
            Err(e) => {
                if matches!(e, PaymentError::Declined(_)) {
                    store::set_transaction_status(self.db.pool(), txn.id, txn_status::DECLINED, None)
                        .await?;
                }
                warn!(order_id, error = %e, "payment capture failed");
                return Err(e.into());
            }
        };

        let mut tx = self.db.pool().begin().await?;
        store::set_transaction_status(&mut *tx, txn.id, txn_status::COMPLETED, Some(&captured.capture_id))
            .await?;
        let moved =
            store::transition(&mut *tx, order_id, OrderStatus::Pending, OrderStatus::Paid).await?;
        if !moved {
            // Money was taken but another request changed the order first.
            error!(order_id, capture_id = %captured.capture_id, "captured payment for an order that is no longer pending");
            return Err(AppError::conflict(format!("order {order_id} is no longer pending")));
        }
        tx.commit().await?;
        info!(order_id, capture_id = %captured.capture_id, "order paid");

        let note = Notification {
            kind: NotificationKind::NewOrder,
            title: format!("New order #{order_id}"),
            body: format!(
                "{} for {}",
                crate::payment::format_amount(order.total_cents),
                order.recipient_name
            ),
            order_id: Some(order_id),
            application_id: None,
            created_at: Utc::now(),
        };
        self.hub.publish(PARTNERS, note.clone()).await;
        self.hub.publish(ADMINS, note).await;

        self.get(order_id).await
    }

    pub async fn get(&self, order_id: i64) -> AppResult<Order> {
        let row = store::find_order(self.db.pool(), order_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("order {order_id} not found")))?;
        let mut lines = store::lines_for(self.db.pool(), &[order_id]).await?;
        row.into_order(lines.remove(&order_id).unwrap_or_default())
    }

    /// Fetch an order visible to the caller: its owner, or staff.
    pub async fn get_for(&self, user_id: Uuid, role: Role, order_id: i64) -> AppResult<Order> {
        let order = self.get(order_id).await?;
        if order.user_id != user_id && role == Role::Customer {
            return Err(AppError::not_found(format!("order {order_id} not found")));
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let rows = store::list_orders(self.db.pool(), Some(user_id), &[]).await?;
        store::attach_lines(self.db.pool(), rows).await
    }

    pub async fn list_all(&self, status: Option<OrderStatus>) -> AppResult<Vec<Order>> {
        let statuses: Vec<OrderStatus> = status.into_iter().collect();
        let rows = store::list_orders(self.db.pool(), None, &statuses).await?;
        store::attach_lines(self.db.pool(), rows).await
    }

    /// Orders partners can work on.
    pub async fn list_for_partners(&self) -> AppResult<Vec<Order>> {
        let rows = store::list_orders(
            self.db.pool(),
            None,
            &[OrderStatus::Paid, OrderStatus::Processing, OrderStatus::Shipped],
        )
        .await?;
        store::attach_lines(self.db.pool(), rows).await
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, role: Role, order_id: i64, to: OrderStatus) -> AppResult<Order> {
        let current = self.get(order_id).await?;
        check_transition(current.status, to, role)?;

        if !store::transition(self.db.pool(), order_id, current.status, to).await? {
            return Err(AppError::conflict(format!("order {order_id} was modified concurrently")));
        }
        info!(order_id, from = %current.status, to = %to, "order status changed");

        self.hub
            .publish(
                &user_group(current.user_id),
                Notification {
                    kind: NotificationKind::OrderStatusChanged,
                    title: format!("Order #{order_id} is now {to}"),
                    body: format!("Your order moved from {} to {to}.", current.status),
                    order_id: Some(order_id),
                    application_id: None,
                    created_at: Utc::now(),
                },
            )
            .await;

        self.get(order_id).await
    }
}

/// Whether `role` may move an order from `from` to `to`.
///
/// Structurally impossible moves are conflicts; possible moves the role may
/// not make are forbidden.
pub fn check_transition(from: OrderStatus, to: OrderStatus, role: Role) -> AppResult<()> {
    use OrderStatus::*;
    let staff = matches!(role, Role::Admin | Role::Partner);
    let allowed = match (from, to) {
        (Paid, Processing) | (Processing, Shipped) | (Shipped, Delivered) => staff,
        (Pending | Paid, Cancelled) => role == Role::Admin,
        (Pending, Paid) => {
            return Err(AppError::conflict("orders become paid only through payment capture"))
        }
        _ => return Err(AppError::conflict(format!("cannot move an order from {from} to {to}"))),
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("{role} may not move an order from {from} to {to}")))
    }
}

fn validate_checkout(req: &CheckoutRequest) -> AppResult<()> {
    let today = Utc::now().date_naive();
    let mut v = Validator::new();
    v.check(!req.items.is_empty(), "items", "cart is empty")
        .check(req.items.len() <= MAX_LINES, "items", "too many cart lines")
        .required(&req.recipient_name, "recipient_name")
        .max_len(&req.recipient_name, 100, "recipient_name")
        .required(&req.delivery_address, "delivery_address")
        .max_len(&req.delivery_address, 500, "delivery_address")
        .max_len(req.card_message.as_deref().unwrap_or(""), 500, "card_message")
        .check(
            req.delivery_date.map_or(true, |d| d >= today),
            "delivery_date",
            "must not be in the past",
        );
    for line in &req.items {
        v.check(
            (1..=MAX_QUANTITY).contains(&line.quantity),
            "items",
            &format!("quantity for bouquet {} must be between 1 and {MAX_QUANTITY}", line.bouquet_id),
        );
    }
    v.finish()?;
    Ok(())
}

/// Merge duplicate bouquet lines.
fn merge_lines(req: &CheckoutRequest) -> AppResult<BTreeMap<i64, u32>> {
    let mut merged: BTreeMap<i64, u32> = BTreeMap::new();
    for line in &req.items {
        *merged.entry(line.bouquet_id).or_default() += line.quantity;
    }
    if let Some((id, _)) = merged.iter().find(|(_, q)| **q > MAX_QUANTITY) {
        return Err(AppError::invalid_field(
            "items",
            format!("quantity for bouquet {id} must be between 1 and {MAX_QUANTITY}"),
        ));
    }
    Ok(merged)
}

fn order_total(lines: &[NewLine]) -> AppResult<i64> {
    lines
        .iter()
        .try_fold(0i64, |acc, l| {
            l.unit_price_cents
                .checked_mul(i64::from(l.quantity))
                .and_then(|line| acc.checked_add(line))
        })
        .ok_or_else(|| AppError::invalid_field("items", "order total is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::users::{self, NewUser};
    use crate::catalog::tests::seeded;
    use crate::payment::{CapturedPayment, CreatedPayment, MockPaymentGateway};
    use common::protocol::{BouquetRequest, CartLine};

    struct Fixture {
        svc: OrderService,
        hub: NotificationHub,
        customer: Uuid,
        bouquet_id: i64,
        second_id: i64,
    }

    fn happy_gateway() -> MockPaymentGateway {
        let mut gw = MockPaymentGateway::new();
        gw.expect_create_order().returning(|req| {
            Ok(CreatedPayment {
                provider_order_id: format!("PP-{}", req.reference),
                status: "CREATED".into(),
                approve_url: Some("https://paypal.example/approve".into()),
            })
        });
        gw.expect_capture_order().returning(|id| {
            Ok(CapturedPayment {
                provider_order_id: id.to_owned(),
                capture_id: "CAP-1".into(),
                status: "COMPLETED".into(),
            })
        });
        gw
    }

    async fn fixture(gateway: MockPaymentGateway) -> Fixture {
        let (catalog, occ, b) = seeded().await;
        let second = catalog
            .create_bouquet(&BouquetRequest {
                occasion_id: occ.id,
                name: "Lavender Dream".into(),
                description: None,
                price_cents: 3_250,
                is_available: Some(true),
            })
            .await
            .unwrap();
        let db = catalog_db(&catalog);
        let customer = users::insert(
            db.pool(),
            &NewUser {
                email: "buyer@example.com",
                password_hash: "h",
                full_name: "Buyer",
                phone: None,
                role: Role::Customer,
            },
        )
        .await
        .unwrap()
        .user_id()
        .unwrap();
        let hub = NotificationHub::new(8);
        Fixture {
            svc: OrderService::new(db, Arc::new(gateway), hub.clone(), "USD".into()),
            hub,
            customer,
            bouquet_id: b.id,
            second_id: second.id,
        }
    }

    fn catalog_db(catalog: &crate::catalog::CatalogService) -> Database {
        catalog.database().clone()
    }

    fn checkout_req(items: Vec<CartLine>) -> CheckoutRequest {
        CheckoutRequest {
            items,
            recipient_name: "Mom".into(),
            delivery_address: "1 Garden Lane".into(),
            delivery_date: None,
            card_message: Some("Happy birthday!".into()),
        }
    }

    #[tokio::test]
    async fn checkout_prices_from_catalog_and_merges_lines() {
        let f = fixture(happy_gateway()).await;
        let resp = f
            .svc
            .checkout(
                f.customer,
                &checkout_req(vec![
                    CartLine { bouquet_id: f.bouquet_id, quantity: 1 },
                    CartLine { bouquet_id: f.second_id, quantity: 2 },
                    CartLine { bouquet_id: f.bouquet_id, quantity: 1 },
                ]),
            )
            .await
            .unwrap();
        assert_eq!(resp.total_cents, 2 * 4_500 + 2 * 3_250);
        assert_eq!(resp.provider_order_id, format!("PP-{}", resp.order_id));

        let order = f.svc.get(resp.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.lines.len(), 2);
        assert_eq!(order.lines.iter().map(|l| l.line_total_cents).sum::<i64>(), resp.total_cents);
    }

    #[tokio::test]
    async fn checkout_rejects_unknown_and_empty() {
        let f = fixture(happy_gateway()).await;
        let err = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: 999, quantity: 1 }]))
            .await
            .unwrap_err();
        assert_eq!(err.kind().code(), "VALIDATION_ERROR");

        let err = f.svc.checkout(f.customer, &checkout_req(vec![])).await.unwrap_err();
        assert!(err.kind().field_errors().unwrap().contains_key("items"));
    }

    #[tokio::test]
    async fn merged_quantity_over_limit_is_rejected() {
        let f = fixture(happy_gateway()).await;
        let err = f
            .svc
            .checkout(
                f.customer,
                &checkout_req(vec![
                    CartLine { bouquet_id: f.bouquet_id, quantity: 60 },
                    CartLine { bouquet_id: f.bouquet_id, quantity: 60 },
                ]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind().http_status(), 400);
    }

    #[tokio::test]
    async fn failed_payment_creation_discards_order() {
        let mut gw = MockPaymentGateway::new();
        gw.expect_create_order().returning(|_| {
            Err(PaymentError::Provider {
                status: 500,
                body: "oops".into(),
            })
        });
        let f = fixture(gw).await;
        let err = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 1 }]))
            .await
            .unwrap_err();
        assert_eq!(err.kind().http_status(), 400);
        assert_eq!(err.kind().code(), "API_ERROR");
        assert!(f.svc.list_for_user(f.customer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrecorded_payment_discards_order() {
        // Every checkout gets the same provider id, so the second payment row
        // collides with the first.
        let mut gw = MockPaymentGateway::new();
        gw.expect_create_order().returning(|_| {
            Ok(CreatedPayment {
                provider_order_id: "PP-FIXED".into(),
                status: "CREATED".into(),
                approve_url: None,
            })
        });
        let f = fixture(gw).await;
        let req = checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 1 }]);
        let first = f.svc.checkout(f.customer, &req).await.unwrap();

        let err = f.svc.checkout(f.customer, &req).await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");

        let orders = f.svc.list_for_user(f.customer).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, first.order_id);
    }

    #[tokio::test]
    async fn capture_marks_paid_and_notifies_partners() {
        let f = fixture(happy_gateway()).await;
        let mut partners = f.hub.subscribe(PARTNERS).await;
        let resp = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 2 }]))
            .await
            .unwrap();

        let order = f.svc.capture(f.customer, resp.order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);

        let note = partners.recv().await.unwrap();
        assert_eq!(note.kind, NotificationKind::NewOrder);
        assert_eq!(note.order_id, Some(resp.order_id));

        let err = f.svc.capture(f.customer, resp.order_id).await.unwrap_err();
        assert_eq!(err.kind().code(), "CONFLICT");
    }

    #[tokio::test]
    async fn capture_of_someone_elses_order_is_not_found() {
        let f = fixture(happy_gateway()).await;
        let resp = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 1 }]))
            .await
            .unwrap();
        let err = f.svc.capture(Uuid::new_v4(), resp.order_id).await.unwrap_err();
        assert_eq!(err.kind().http_status(), 404);
    }

    #[tokio::test]
    async fn declined_capture_keeps_order_pending() {
        let mut gw = MockPaymentGateway::new();
        gw.expect_create_order().returning(|req| {
            Ok(CreatedPayment {
                provider_order_id: format!("PP-{}", req.reference),
                status: "CREATED".into(),
                approve_url: None,
            })
        });
        gw.expect_capture_order()
            .times(1)
            .returning(|_| Err(PaymentError::Declined("INSTRUMENT_DECLINED".into())));
        let f = fixture(gw).await;
        let resp = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 1 }]))
            .await
            .unwrap();
        let err = f.svc.capture(f.customer, resp.order_id).await.unwrap_err();
        assert_eq!(err.kind().code(), "API_ERROR");
        assert_eq!(f.svc.get(resp.order_id).await.unwrap().status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn fulfilment_walks_the_state_machine() {
        let f = fixture(happy_gateway()).await;
        let mut mine = f.hub.subscribe(&user_group(f.customer)).await;
        let resp = f
            .svc
            .checkout(f.customer, &checkout_req(vec![CartLine { bouquet_id: f.bouquet_id, quantity: 1 }]))
            .await
            .unwrap();
        f.svc.capture(f.customer, resp.order_id).await.unwrap();

        for to in [OrderStatus::Processing, OrderStatus::Shipped, OrderStatus::Delivered] {
            let order = f.svc.update_status(Role::Partner, resp.order_id, to).await.unwrap();
            assert_eq!(order.status, to);
            assert_eq!(mine.recv().await.unwrap().kind, NotificationKind::OrderStatusChanged);
        }
        assert!(f.svc.list_for_partners().await.unwrap().is_empty());
        assert_eq!(f.svc.list_all(Some(OrderStatus::Delivered)).await.unwrap().len(), 1);
    }

    #[test]
    fn transition_rules() {
        use OrderStatus::*;
        assert!(check_transition(Paid, Processing, Role::Partner).is_ok());
        assert!(check_transition(Pending, Cancelled, Role::Admin).is_ok());
        assert_eq!(
            check_transition(Paid, Cancelled, Role::Partner).unwrap_err().kind().code(),
            "FORBIDDEN"
        );
        assert_eq!(
            check_transition(Delivered, Processing, Role::Admin).unwrap_err().kind().code(),
            "CONFLICT"
        );
        assert_eq!(
            check_transition(Pending, Paid, Role::Admin).unwrap_err().kind().code(),
            "CONFLICT"
        );
        assert_eq!(
            check_transition(Paid, Processing, Role::Customer).unwrap_err().kind().code(),
            "FORBIDDEN"
        );
    }
}
