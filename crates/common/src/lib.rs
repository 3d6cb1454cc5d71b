//! Error taxonomy and wire types shared by the storefront server and client.

pub mod error;
pub mod protocol;

pub use error::{FieldErrors, ServiceError, Validator};
