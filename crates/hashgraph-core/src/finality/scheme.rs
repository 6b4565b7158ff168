//! Signature verification and aggregation.
//!
//! The finality store never signs anything itself; it only checks and
//! combines signatures produced elsewhere. [`SignatureScheme`] is the seam
//! where a real aggregable scheme (e.g. BLS) plugs in.

/// Verification and aggregation of signatures over vertex hashes.
pub trait SignatureScheme {
    /// Check one signature made with the key behind `public_key`.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;

    /// Combine signatures over the same message into one.
    fn aggregate(&self, signatures: &[&[u8]]) -> Vec<u8>;

    /// Check an aggregate against the keys of every contributor.
    fn verify_aggregate(&self, public_keys: &[&[u8]], message: &[u8], signature: &[u8]) -> bool;
}

const DIGEST_LEN: usize = 32;

/// A keyed-digest stand-in for an aggregable signature scheme.
///
/// A "signature" is `blake3(key || message)` and the aggregate is the XOR of
/// the contributing digests. The same bytes act as signing and verification
/// key, so this offers integrity checking between cooperating replicas and
/// no security against forgery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestScheme;

impl DigestScheme {
    #[must_use]
    pub fn sign(key: &[u8], message: &[u8]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key);
        hasher.update(message);
        hasher.finalize().as_bytes().to_vec()
    }

    fn fold(signatures: impl IntoIterator<Item = impl AsRef<[u8]>>) -> Vec<u8> {
        let mut acc = vec![0_u8; DIGEST_LEN];
        for sig in signatures {
            for (a, b) in acc.iter_mut().zip(sig.as_ref()) {
                *a ^= b;
            }
        }
        acc
    }
}

impl SignatureScheme for DigestScheme {
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        Self::sign(public_key, message) == signature
    }

    fn aggregate(&self, signatures: &[&[u8]]) -> Vec<u8> {
        Self::fold(signatures)
    }

    fn verify_aggregate(&self, public_keys: &[&[u8]], message: &[u8], signature: &[u8]) -> bool {
        !public_keys.is_empty()
            && Self::fold(public_keys.iter().map(|k| Self::sign(k, message))) == signature
    }
}
