//! Wire-message model for the client/server invalidation protocol.
//!
//! Messages are CBOR maps keyed by field index, so unknown fields from newer
//! peers are skipped rather than rejected.

pub mod client;
pub mod common;
pub mod error;
pub mod server;
