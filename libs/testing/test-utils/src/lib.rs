//! Shared test utilities for domain testing
//!
//! This crate provides reusable test infrastructure for the domain crates:
//! - `TestDatabase`: PostgreSQL container with the token schema applied (feature: "postgres")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Features
//!
//! - `postgres` (default): Enables PostgreSQL test infrastructure
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{AccountState, TestDatabase, TestDataBuilder, TokenFixture};
//!
//! #[tokio::test]
//! async fn my_postgres_test() {
//!     let db = TestDatabase::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let account = db
//!         .create_account(&builder.email("main"), &builder.username("main"), AccountState::Pending)
//!         .await;
//!     db.insert_token(&TokenFixture::activation(account, builder.secret("main"))).await;
//! }
//! ```

use sha2::{Digest, Sha256};

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{AccountState, TestDatabase, TokenFixture};

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by deriving every value from a seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// This is the recommended way to create a builder for consistent test data.
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_dequeue");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self::new(u64::from_le_bytes(seed))
    }

    /// Unique email address
    pub fn email(&self, suffix: &str) -> String {
        format!("test-{}-{}@example.com", self.seed, suffix)
    }

    /// Unique display name
    pub fn username(&self, suffix: &str) -> String {
        format!("user-{}-{}", self.seed, suffix)
    }

    /// 32-byte token secret derived from the seed and `suffix`
    pub fn secret(&self, suffix: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(suffix.as_bytes());
        hasher.finalize().to_vec()
    }

    /// Six-digit numeric code
    pub fn code(&self, suffix: &str) -> String {
        let secret = self.secret(suffix);
        let n = u32::from_le_bytes([secret[0], secret[1], secret[2], secret[3]]);
        format!("{:06}", n % 1_000_000)
    }
}
