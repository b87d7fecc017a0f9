use minicbor::{Decode, Encode};

use crate::types::ObjectId;

/// One hop in the life of an invalidation: which component handled it and
/// when, in milliseconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ComponentStamp {
    #[n(0)]
    pub component: String,
    #[n(1)]
    pub time_ms: i64,
}

/// Stamp trail an invalidation accumulates as it travels from the service to
/// the client and back as an acknowledgment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct ComponentStampLog {
    #[n(0)]
    pub stamps: Vec<ComponentStamp>,
}

/// Notice that an object has changed: the object's id, its new version, and
/// an optional payload supplied by the publisher.
///
/// Versions are per-object monotonic but not dense; consumers should compare
/// them only for equality or greater-than.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Invalidation {
    #[n(0)]
    pub object_id: ObjectId,
    #[n(1)]
    pub version: i64,
    #[n(2)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Option<Vec<u8>>,
    #[n(3)]
    pub component_stamp_log: Option<ComponentStampLog>,
}

impl Invalidation {
    pub fn new(object_id: ObjectId, version: i64) -> Self {
        Self {
            object_id,
            version,
            payload: None,
            component_stamp_log: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_component_stamp_log(mut self, log: ComponentStampLog) -> Self {
        self.component_stamp_log = Some(log);
        self
    }
}
