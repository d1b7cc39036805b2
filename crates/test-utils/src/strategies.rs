//! Proptest strategies for identity data.
//!
//! ```no_run
//! use ironvault_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn names_are_nonempty(name in strategies::arb_identifier()) {
//!         prop_assert!(!name.is_empty());
//!     }
//! }
//! ```

use proptest::prelude::*;

/// Random v4 UUID rendered as a string.
pub fn arb_uuid() -> impl Strategy<Value = String> {
    any::<u128>().prop_map(|bits| uuid::Builder::from_random_bytes(bits.to_le_bytes()).into_uuid().to_string())
}

/// Lowercase identifier of 1-24 characters matching `[a-z][a-z0-9_]{0,23}`.
pub fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,23}"
}

/// Email address `<identifier>@<identifier>.test`.
pub fn arb_email() -> impl Strategy<Value = String> {
    (arb_identifier(), arb_identifier()).prop_map(|(local, domain)| format!("{local}@{domain}.test"))
}

/// Entity alias naming policy of an auth source.
pub fn arb_alias_policy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["email", "full_identifier", "uuid"])
}

/// Sequence of archive (`true`) and restore (`false`) steps.
pub fn arb_archive_steps(max_len: usize) -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), 0..=max_len)
}
