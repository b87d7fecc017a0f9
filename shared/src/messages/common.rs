use minicbor::{Decode, Encode};

use crate::types::ObjectId;

/// Outcome codes a server attaches to its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cbor(index_only)]
pub enum StatusCode {
    #[n(0)]
    Success,
    #[n(1)]
    TransientFailure,
    #[n(2)]
    PermanentFailure,
    #[n(3)]
    UnknownClient,
    #[n(4)]
    InvalidSession,
}

/// A status code plus a human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Status {
    #[n(0)]
    pub code: StatusCode,
    #[n(1)]
    pub description: String,
}

impl Status {
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(StatusCode::Success, "")
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

/// Direction of a registration operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
#[cbor(index_only)]
pub enum RegistrationOpType {
    #[n(0)]
    Register,
    #[n(1)]
    Unregister,
}

/// One registration operation: the object, the direction, and the
/// client-assigned per-operation sequence number the server echoes back.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RegistrationUpdate {
    #[n(0)]
    pub op_type: RegistrationOpType,
    #[n(1)]
    pub object_id: ObjectId,
    #[n(2)]
    pub seqno: i64,
}

/// Server verdict on a previously submitted registration operation.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RegistrationUpdateResult {
    #[n(0)]
    pub operation: RegistrationUpdate,
    #[n(1)]
    pub status: Status,
}
