//! # thingmesh-app
//!
//! Thing runtime — hosting, groups, transitions, scenes and **port
//! definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `Transport` — deliver requests to other nodes
//!   - `StateStore` — read and write the persisted blob
//!   - `Codec` — turn snapshots into bytes
//! - Model every device as a [`thing::Thing`], local or remote, with one
//!   typed property API and cancellable [`executor::Task`]s
//! - Host things through a [`ports::Technology`]:
//!   - `LocalTechnology` — in-process things, transitions, scenes and
//!     fan-out groups
//!   - `TransportTechnology` — proxies for remote things, request serving
//!     and groups forwarded over multicast
//! - Persist technologies and things through a
//!   [`persistence::PersistentStateManager`]
//!
//! ## Dependency rule
//! Depends on `thingmesh-domain` only (plus `tokio` and `futures` for
//! tasks). Never imports adapter crates. Adapters depend on *this* crate,
//! not the reverse.

pub mod codec;
pub mod executor;
pub mod group;
pub mod local;
pub(crate) mod path;
pub mod persistence;
pub mod ports;
pub mod remote;
pub mod thing;
