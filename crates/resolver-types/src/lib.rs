//! Shared types for the resolver bot.
//!
//! Everything the ledger, the coordinator backend and the payment rail
//! agree on lives here: order identifiers, the on-chain order snapshot,
//! decoded ledger events, auction channel payloads and the in-memory
//! processing tracker that guards against duplicate acquisition.

pub mod amount;
pub mod common;
pub mod events;
pub mod order;
pub mod tracker;

pub use amount::*;
pub use common::*;
pub use events::*;
pub use order::*;
pub use tracker::*;
