//! # Ticl Client
//! The client-side cache-invalidation engine: a long-lived agent that
//! maintains a logical session with a remote invalidation service, registers
//! interest in named objects, receives object-version invalidations, and
//! acknowledges them reliably.
//!
//! The application embeds [`InvalidationClient`], hands it a transport (by
//! moving opaque byte-strings through [`InvalidationClient::handle_inbound_message`]
//! and [`InvalidationClient::take_outbound_message`]), a persistence slot (via
//! [`SystemResources::write_state`]), and receives callbacks on its
//! [`InvalidationListener`].

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use ticl_shared::{
    ClientType, ComponentStamp, ComponentStampLog, Invalidation, ObjectId, ObjectSource,
    RegistrationState, UnknownHint, INVALIDATE_ALL_OBJECT_NAME,
};

mod client;
mod config;
mod listener;
mod network_manager;
mod operation_scheduler;
mod persistence_manager;
mod registration_manager;
mod resources;
mod session_manager;
mod smearer;
mod throttle;

pub use client::{AckHandle, InvalidationClient};
pub use config::{ClientConfig, RateLimit};
pub use listener::InvalidationListener;
pub use network_manager::{NetworkManager, NotifyOutcome, OutboundListener};
pub use operation_scheduler::{OperationName, OperationScheduler, OperationSchedulerError};
pub use persistence_manager::PersistenceManager;
pub use registration_manager::{RegistrationUpdateManager, FIRST_SEQUENCE_NUMBER};
pub use resources::{StorageCallback, SystemResources, Task};
pub use session_manager::{MessageAction, SessionManager, SessionState};
pub use smearer::Smearer;
pub use throttle::{FireOutcome, Throttle};
