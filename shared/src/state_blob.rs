//! Encoding of the tiny state blob the client persists between runs.
//!
//! The state is wrapped in an envelope carrying a SHA-256 digest so that a
//! truncated or corrupted blob read back at startup is rejected rather than
//! trusted.

use minicbor::{Decode, Encode};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur while reading back a persisted state blob.
#[derive(Debug, Error)]
pub enum StateBlobError {
    /// The blob was not a well-formed envelope.
    #[error("failed to decode state blob: {0}")]
    Decode(#[from] minicbor::decode::Error),

    /// The envelope decoded but its digest did not match its contents.
    #[error("state blob digest mismatch")]
    DigestMismatch,
}

/// The client state that survives restarts: who we are, our current session,
/// and the exclusive upper bound of the reserved block of per-operation
/// sequence numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct TiclState {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    pub uniquifier: Vec<u8>,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    pub session_token: Vec<u8>,
    #[n(2)]
    pub sequence_number_limit: i64,
}

/// Envelope around the encoded state: the state bytes plus a digest over
/// exactly those bytes.
#[derive(Debug, Clone, Encode, Decode)]
struct StateBlob {
    #[n(0)]
    #[cbor(with = "minicbor::bytes")]
    ticl_state: Vec<u8>,
    #[n(1)]
    #[cbor(with = "minicbor::bytes")]
    authentication_code: Vec<u8>,
}

fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

/// Serializes `state` into a digest-protected blob.
pub fn serialize_state(state: &TiclState) -> Vec<u8> {
    let encoded = minicbor::to_vec(state).expect("encoding to an in-memory buffer cannot fail");
    let blob = StateBlob {
        authentication_code: digest(&encoded),
        ticl_state: encoded,
    };
    minicbor::to_vec(&blob).expect("encoding to an in-memory buffer cannot fail")
}

/// Deserializes a blob produced by [`serialize_state`], verifying its digest.
pub fn deserialize_state(serialized: &[u8]) -> Result<TiclState, StateBlobError> {
    let blob: StateBlob = minicbor::decode(serialized)?;
    if digest(&blob.ticl_state) != blob.authentication_code {
        return Err(StateBlobError::DigestMismatch);
    }
    Ok(minicbor::decode(&blob.ticl_state)?)
}
