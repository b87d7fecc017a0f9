//! # Ticl Shared
//! Object model, wire messages, and persistent-state encoding shared by the
//! Ticl invalidation client and its tooling.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod constants;
mod invalidation;
mod messages;
mod state_blob;
mod types;

pub use constants::{ClientVersion, ProtocolVersion, CLIENT_VERSION, PROTOCOL_VERSION};
pub use invalidation::{ComponentStamp, ComponentStampLog, Invalidation};
pub use messages::{
    client::{ClientAction, ClientMessageType, ClientToServerMessage},
    common::{
        RegistrationOpType, RegistrationUpdate, RegistrationUpdateResult, Status, StatusCode,
    },
    error::MessageError,
    server::{ServerMessageType, ServerToClientMessage},
};
pub use state_blob::{deserialize_state, serialize_state, StateBlobError, TiclState};
pub use types::{
    ClientType, ObjectId, ObjectSource, RegistrationState, UnknownHint,
    INVALIDATE_ALL_OBJECT_NAME,
};
