//! Byte encoding at the replication boundary.
//!
//! Vertices and attestations cross the wire as compact JSON arrays. Decoding
//! recomputes every vertex hash, so a decoded batch is guaranteed to carry
//! the same identities it was encoded with. Transport framing is left to the
//! networking layer.

use crate::finality::AggregatedAttestation;

use super::Vertex;
use super::hash::compute_hash;

/// Errors from decoding a wire payload.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The payload is not a valid encoding.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A decoded vertex does not hash to the identity it carries.
    #[error("decoded vertex hash mismatch: stored={stored} expected={expected}")]
    HashMismatch { stored: String, expected: String },
}

/// Encode a batch of vertices.
#[must_use]
pub fn encode_vertices(vertices: &[Vertex]) -> Vec<u8> {
    // Vertex contains only strings, integers and string-keyed maps.
    serde_json::to_vec(vertices).unwrap_or_default()
}

/// Decode a batch of vertices, verifying each hash.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] for invalid input and
/// [`WireError::HashMismatch`] if any vertex was altered in transit.
pub fn decode_vertices(bytes: &[u8]) -> Result<Vec<Vertex>, WireError> {
    let vertices: Vec<Vertex> = serde_json::from_slice(bytes)?;
    for vertex in &vertices {
        let expected = compute_hash(vertex);
        if vertex.hash != expected {
            return Err(WireError::HashMismatch {
                stored: vertex.hash.clone(),
                expected,
            });
        }
    }
    Ok(vertices)
}

/// Encode a batch of aggregated attestations.
#[must_use]
pub fn encode_attestations(attestations: &[AggregatedAttestation]) -> Vec<u8> {
    serde_json::to_vec(attestations).unwrap_or_default()
}

/// Decode a batch of aggregated attestations.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] for invalid input.
pub fn decode_attestations(bytes: &[u8]) -> Result<Vec<AggregatedAttestation>, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}
