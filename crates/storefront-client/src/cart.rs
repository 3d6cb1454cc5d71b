//! Shopping cart kept on the client between commands.
//!
//! Prices here are display snapshots; the server re-prices every line at
//! checkout.

use common::protocol::CartLine;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::storage::FileStore;

const CART_KEY: &str = "cart";
pub const MAX_QUANTITY: u32 = 99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub bouquet_id: i64,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

impl CartItem {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    /// Add `quantity` of a bouquet, merging with an existing line.
    pub fn add(&mut self, bouquet_id: i64, name: &str, unit_price_cents: i64, quantity: u32) -> ClientResult<()> {
        if quantity == 0 {
            return Err(ClientError::Invalid("quantity must be at least 1".into()));
        }
        match self.items.iter_mut().find(|i| i.bouquet_id == bouquet_id) {
            Some(item) => {
                let merged = item.quantity.saturating_add(quantity);
                if merged > MAX_QUANTITY {
                    return Err(ClientError::Invalid(format!(
                        "at most {MAX_QUANTITY} of one bouquet per order"
                    )));
                }
                item.quantity = merged;
                item.name = name.to_owned();
                item.unit_price_cents = unit_price_cents;
            }
            None => {
                if quantity > MAX_QUANTITY {
                    return Err(ClientError::Invalid(format!(
                        "at most {MAX_QUANTITY} of one bouquet per order"
                    )));
                }
                self.items.push(CartItem {
                    bouquet_id,
                    name: name.to_owned(),
                    unit_price_cents,
                    quantity,
                });
            }
        }
        Ok(())
    }

    /// Set the quantity of a line. Zero removes it.
    pub fn set_quantity(&mut self, bouquet_id: i64, quantity: u32) -> ClientResult<()> {
        if quantity == 0 {
            self.remove(bouquet_id);
            return Ok(());
        }
        if quantity > MAX_QUANTITY {
            return Err(ClientError::Invalid(format!(
                "at most {MAX_QUANTITY} of one bouquet per order"
            )));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.bouquet_id == bouquet_id)
            .ok_or_else(|| ClientError::Invalid(format!("bouquet {bouquet_id} is not in the cart")))?;
        item.quantity = quantity;
        Ok(())
    }

    /// Returns whether a line was removed.
    pub fn remove(&mut self, bouquet_id: i64) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.bouquet_id != bouquet_id);
        self.items.len() != before
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total_cents(&self) -> i64 {
        self.items.iter().map(CartItem::line_total_cents).sum()
    }

    /// Number of bouquets across all lines.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lines as sent to checkout.
    pub fn to_lines(&self) -> Vec<CartLine> {
        self.items
            .iter()
            .map(|i| CartLine {
                bouquet_id: i.bouquet_id,
                quantity: i.quantity,
            })
            .collect()
    }
}

/// Persists the cart after every mutation.
#[derive(Debug, Clone)]
pub struct CartStore {
    store: FileStore,
}

impl CartStore {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> ClientResult<Cart> {
        Ok(self.store.get(CART_KEY)?.unwrap_or_default())
    }

    /// Load, apply `f`, and save if `f` succeeded.
    pub fn update<R>(&self, f: impl FnOnce(&mut Cart) -> ClientResult<R>) -> ClientResult<(Cart, R)> {
        let mut cart = self.load()?;
        let out = f(&mut cart)?;
        self.store.set(CART_KEY, &cart)?;
        Ok((cart, out))
    }

    pub fn add(&self, bouquet_id: i64, name: &str, unit_price_cents: i64, quantity: u32) -> ClientResult<Cart> {
        self.update(|c| c.add(bouquet_id, name, unit_price_cents, quantity))
            .map(|(cart, ())| cart)
    }

    pub fn set_quantity(&self, bouquet_id: i64, quantity: u32) -> ClientResult<Cart> {
        self.update(|c| c.set_quantity(bouquet_id, quantity))
            .map(|(cart, ())| cart)
    }

    pub fn remove(&self, bouquet_id: i64) -> ClientResult<Cart> {
        self.update(|c| Ok(c.remove(bouquet_id))).map(|(cart, _)| cart)
    }

    pub fn clear(&self) -> ClientResult<()> {
        self.store.remove(CART_KEY)
    }
}
