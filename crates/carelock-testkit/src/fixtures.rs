//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a small practice policy, a
//! handful of staff members and a seeded recorder key.

use std::sync::Arc;

use carelock_core::{Principal, RecorderKeypair, DAY_MS};
use carelock_policy::{ChangeMeta, PolicyStore};
use carelock_store::{MemoryStore, Store, StoreError};

/// Policy of a small practice: two clinical roles on top of an intern role,
/// a billing role and the administrator.
pub const PRACTICE_POLICY: &str = r#"
version = 1
superuser_role = "ADMIN"

[resources]
patients = ["read", "create", "update", "delete"]
invoices = ["read", "billing.write"]
appointments = ["read", "create", "cancel"]

[roles.PRAKTIKANT.grants]
patients = ["read"]
appointments = ["read"]

[roles.ASSISTENT]
inherits = ["PRAKTIKANT"]

[roles.ASSISTENT.grants]
patients = ["read", "create"]
appointments = ["create", "cancel"]

[roles.ABRECHNUNG.grants]
invoices = ["read", "billing.write"]

[roles.ARZT]
inherits = ["ASSISTENT"]

[roles.ARZT.grants]
patients = ["update"]

[roles.ADMIN]
"#;

pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Midnight UTC of a fixed day, the base of every fixture timestamp.
pub const DAY_START: i64 = 19_800 * DAY_MS;

/// `DAY_START` plus whole hours.
pub fn at_hour(hour: i64) -> i64 {
    DAY_START + hour * HOUR_MS
}

/// The practice policy, parsed.
pub fn practice_policy() -> Arc<PolicyStore> {
    match PolicyStore::from_toml_str(PRACTICE_POLICY) {
        Ok(policy) => Arc::new(policy),
        Err(e) => panic!("practice policy fixture is invalid: {e}"),
    }
}

/// Change metadata attributed to the administrator.
pub fn admin_change(at: i64, reason: &str) -> ChangeMeta {
    ChangeMeta::new("root", at, reason)
}

/// One principal per role.
pub fn staff() -> Vec<Principal> {
    vec![
        Principal::new("alice", "ASSISTENT"),
        Principal::new("bob", "PRAKTIKANT"),
        Principal::new("carol", "ARZT"),
        Principal::new("dave", "ABRECHNUNG"),
        Principal::new("root", "ADMIN"),
    ]
}

/// A test fixture with the practice policy, a recorder key and a memory store.
pub struct TestFixture {
    pub policy: Arc<PolicyStore>,
    pub keypair: RecorderKeypair,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new fixture with a random recorder key.
    pub fn new() -> Self {
        Self {
            policy: practice_policy(),
            keypair: RecorderKeypair::generate(),
            store: MemoryStore::new(),
        }
    }

    /// Create with a deterministic recorder key from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: RecorderKeypair::from_seed(&seed),
            ..Self::new()
        }
    }

    /// Save every [`staff`] member into the store.
    pub async fn with_staff(self) -> Result<Self, StoreError> {
        save_staff(&self.store).await?;
        Ok(self)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Save every [`staff`] member into any store.
pub async fn save_staff(store: &dyn Store) -> Result<(), StoreError> {
    for principal in staff() {
        store.save_principal(&principal).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_policy_knows_every_staff_role() {
        let policy = practice_policy();
        for principal in staff() {
            assert!(policy.is_known_role(&principal.primary_role));
        }
    }

    #[test]
    fn test_seeded_fixtures_share_a_key() {
        let a = TestFixture::with_seed([3; 32]);
        let b = TestFixture::with_seed([3; 32]);
        assert_eq!(a.keypair.public_key(), b.keypair.public_key());
    }
}
