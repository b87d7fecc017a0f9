use minicbor::{Decode, Encode};

/// Name of the reserved internal object whose invalidation tells the
/// application to treat every object as potentially stale.
pub const INVALIDATE_ALL_OBJECT_NAME: &[u8] = b"ALL";

/// Numeric source space an object id belongs to.
///
/// `ObjectSource::INTERNAL` is reserved for objects manufactured by the
/// invalidation service itself; applications pick their own discriminants for
/// everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
#[cbor(transparent)]
pub struct ObjectSource(#[n(0)] pub u32);

impl ObjectSource {
    pub const INTERNAL: ObjectSource = ObjectSource(0);
}

/// Unique id of an object an application can register interest in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ObjectId {
    #[n(0)]
    pub source: ObjectSource,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub name: Vec<u8>,
}

impl ObjectId {
    pub fn new(source: ObjectSource, name: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }

    /// Whether this is the distinguished invalidate-all object.
    pub fn is_invalidate_all(&self) -> bool {
        self.source == ObjectSource::INTERNAL && self.name == INVALIDATE_ALL_OBJECT_NAME
    }
}

/// Type discriminant of the embedding application, stamped on every outbound
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
#[cbor(transparent)]
pub struct ClientType(#[n(0)] pub u32);

/// Registration states in which an object may exist, from the listener's
/// point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Unregistered,
    Unknown,
}

/// Delivered alongside `RegistrationStateChanged` to qualify an `Unknown`
/// state: whether the condition is transient (a retry may succeed) and a
/// human-readable description of what happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownHint {
    pub is_transient: bool,
    pub message: String,
}

impl UnknownHint {
    pub fn new(is_transient: bool, message: impl Into<String>) -> Self {
        Self {
            is_transient,
            message: message.into(),
        }
    }
}
