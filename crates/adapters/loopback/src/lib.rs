//! # thingmesh-adapter-loopback
//!
//! In-process transport: every node of a [`LoopbackNetwork`] lives in the
//! same process and requests are plain function calls.
//!
//! ## Responsibilities
//! - Implement the `Transport` port defined in `thingmesh-app::ports`
//! - Route requests by URI authority to the node registered under it
//! - Deliver requests sent to the multicast authority to every other node
//!
//! ## Dependency rule
//! Depends on `thingmesh-app` (for port traits) and `thingmesh-domain`. The
//! `app` and `domain` crates must never reference this adapter.

pub mod error;
mod network;

pub use network::{LoopbackNetwork, LoopbackTransport, MULTICAST_AUTHORITY, SCHEME};
