//! bcrypt password hashing, run off the async executor.

use crate::error::{AppError, AppResult};

/// Hashes and verifies passwords at a fixed bcrypt cost.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: &str) -> AppResult<String> {
        let password = password.to_owned();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| AppError::unexpected(format!("hashing task failed: {e}")))?
            .map_err(AppError::from)
    }

    /// `Ok(false)` on mismatch; malformed stored hashes are errors.
    pub async fn verify(&self, password: &str, hash: &str) -> AppResult<bool> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| AppError::unexpected(format!("verification task failed: {e}")))?
            .map_err(AppError::from)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = PasswordHasher::new(4);
        let hash = hasher.hash("tulips-in-spring-9").await.unwrap();
        assert_ne!(hash, "tulips-in-spring-9");
        assert!(hasher.verify("tulips-in-spring-9", &hash).await.unwrap());
        assert!(!hasher.verify("tulips-in-autumn-9", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_error() {
        let hasher = PasswordHasher::new(4);
        assert!(hasher.verify("anything", "not-a-bcrypt-hash").await.is_err());
    }
}
