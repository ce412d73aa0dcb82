//! Wire frames, admin messages, and the outbound update builder
//!
//! This module holds everything that crosses the process boundary: the
//! typed-argument frame codec and transport contract (`wire`), the admin
//! message schema consumed by the map control plane (`admin`), and the
//! builder that serializes produced destination samples (`builder`).

pub mod admin;
pub mod builder;
pub mod wire;

pub use admin::AdminMessage;
pub use builder::{build_update, IdMap};
pub use wire::{Dispatcher, QueueTransport, Transport, WireArg, WireFrame};
