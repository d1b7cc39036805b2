//! Identity and access objects replicated through ironvault's change logs.
//!
//! - [`model`] and [`schema`]: the tables and the relation graph between them
//! - [`IamStore`]: the table store of one instance, publishing on commit through
//!   [`destination`]s
//! - [`dispatch`]: the type-tag registry applying root, self, generation and
//!   restore messages
//! - [`projection`] and [`downstream`]: entities and aliases derived from
//!   principals, and the identity-system actions they trigger
//! - [`repo`]: versioned CRUD, identity and generation-number repositories
//! - [`backend`]: configuration state machine, restore and consumer lifecycle

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod codec;
pub mod destination;
pub mod dispatch;
pub mod downstream;
mod error;
pub mod model;
pub mod projection;
pub mod repo;
pub mod restore;
pub mod schema;
pub mod service_pack;
pub mod store;

pub use backend::{Backend, BackendConfig, BackendOptions, BackendPhase, BackendState};
pub use dispatch::{Dispatcher, Registry, Scope};
pub use downstream::{DownstreamAction, IdentitySystem, MemoryIdentitySystem};
pub use error::{IamError, Result};
pub use restore::Restorer;
pub use service_pack::ServicePackController;
pub use store::{IamStore, Publisher};
