//! Shared test utilities for ironvault crates.
//!
//! - [`TestDir`]: managed temporary directory
//! - [`assert_eventually`]: poll a condition until it holds or a timeout expires
//! - [`TestKeys`] and the `test_*_config` helpers: valid key material and fast settings
//! - [`strategies`]: proptest generators for identifiers

#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod assertions;
pub use assertions::{assert_eventually, assert_eventually_every};

mod fixtures;
pub use fixtures::{TestKeys, test_broker_config, test_consumer_config, test_topics_config};

pub mod strategies;
