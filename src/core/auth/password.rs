//! Password hashing with bcrypt
//!
//! bcrypt hashes carry their own cost, so raising the configured cost only
//! affects new hashes; older ones keep verifying.

/// Default work factor
pub const DEFAULT_COST: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Hashing task failed: {0}")]
    Task(String),
}

/// Hashes and verifies passwords off the async runtime
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher {
    /// `cost` must lie within bcrypt's 4..=31
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt with a fresh salt
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_owned();
        let cost = self.cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?
            .map_err(|e| PasswordError::Hashing(e.to_string()))
    }

    /// Verify a password against a stored hash. A hash that fails to parse
    /// counts as a mismatch.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let password = password.to_owned();
        let hash = hash.to_owned();

        let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| PasswordError::Task(e.to_string()))?;

        match outcome {
            Ok(matches) => Ok(matches),
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash could not be verified");
                Ok(false)
            }
        }
    }
}
