//! Client library for the storefront API.
//!
//! Keeps the signed-in session and the shopping cart on disk between runs and
//! refreshes expired access tokens transparently.

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod telemetry;

pub use api::{ApiClient, Delivery};
pub use error::{ClientError, ClientResult};
