//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the thing runtime and the outside
//! world. [`Technology`] is implemented in this crate by the local and
//! transport technologies; [`Transport`], [`StateStore`] and [`Codec`] are
//! implemented by adapter crates (or by the in-memory defaults here).

pub mod codec;
pub mod state_store;
pub mod technology;
pub mod transport;

pub use codec::Codec;
pub use state_store::StateStore;
pub use technology::Technology;
pub use transport::{Method, Request, RequestHandler, Transport};
