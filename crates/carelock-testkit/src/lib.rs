//! # Carelock Testkit
//!
//! Testing utilities for Carelock.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenario vectors**: requests with their expected decisions, stored as JSON
//! - **Generators**: Proptest strategies over the practice policy catalog
//! - **Fixtures**: A practice policy, staff principals and a recorder key
//!
//! ## Scenario Vectors
//!
//! ```rust
//! use carelock_policy::DecisionEngine;
//! use carelock_testkit::fixtures::practice_policy;
//! use carelock_testkit::vectors::all_vectors;
//!
//! let engine = DecisionEngine::new(practice_policy());
//! for vector in all_vectors() {
//!     let decision = vector.decide(&engine);
//!     assert!(vector.holds_for(&decision), "{}", vector.name);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use carelock_testkit::generators::{catalog_request, ordinary_role};
//!
//! proptest! {
//!     #[test]
//!     fn decisions_are_deterministic(role in ordinary_role(), (rt, action) in catalog_request()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{practice_policy, staff, TestFixture, PRACTICE_POLICY};
pub use vectors::{all_vectors, ScenarioVector};
