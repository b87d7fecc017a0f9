use minicbor::{Decode, Encode};

/// Version of the client/server wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ProtocolVersion {
    #[n(0)]
    pub major: u32,
    #[n(1)]
    pub minor: u32,
}

impl ProtocolVersion {
    /// A message is supported as long as its major version matches ours;
    /// minor revisions are additive.
    pub fn is_supported(&self) -> bool {
        self.major == PROTOCOL_VERSION.major
    }
}

/// The protocol version this library speaks.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };

/// Version of this client library build, stamped on outbound messages for
/// server-side diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ClientVersion {
    #[n(0)]
    pub major: u32,
    #[n(1)]
    pub minor: u32,
}

/// The version of this library.
pub const CLIENT_VERSION: ClientVersion = ClientVersion { major: 0, minor: 1 };
