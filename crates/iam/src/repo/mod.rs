//! Repositories over the store tables.
//!
//! Repositories are unit structs with associated functions taking the
//! transaction they run in, so several repositories compose inside one
//! write transaction.

mod generation;
mod identity;
mod versioned;

pub use generation::GenerationRepo;
pub use identity::{AuthSourceRepo, EntityAliasRepo, EntityRepo};
pub use versioned::VersionedRepo;
