//! Finality: signature quorums over committed vertices.
//!
//! # Eligibility
//!
//! When a vertex is committed, the store records the finality signers of the
//! ACL state *produced by that vertex*, together with their credentials. That
//! set never changes afterwards: a peer granted the role later cannot attest
//! to older vertices, and a peer revoked later keeps its right to attest to
//! the ones committed while it held the role.
//!
//! Signers are sorted by peer id, and each gets the position it holds in that
//! order. An [`AggregatedAttestation`] names its contributors by those
//! positions.
//!
//! # Aggregation
//!
//! Signatures are either folded into one aggregate on arrival or kept
//! individually and folded on demand. Remote aggregates are merged by signer
//! set:
//!
//! - a subset of the local signers is ignored;
//! - a superset replaces the local aggregate;
//! - a disjoint set is combined with it;
//! - an overlapping set replaces it only if it has more signers.
//!
//! No signer is ever counted twice.
//!
//! # Sub-modules
//!
//! - [`scheme`]: the verification/aggregation seam. ([`SignatureScheme`],
//!   [`DigestScheme`])

pub mod scheme;

pub use scheme::{DigestScheme, SignatureScheme};

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use fixedbitset::FixedBitSet;
use serde::{Deserialize, Serialize};

use crate::config::FinalityConfig;
use crate::vertex::{Hash, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalityError {
    #[error("no finality state for vertex {0}")]
    UnknownVertex(Hash),

    #[error("peer {peer} is not an eligible signer of {hash}")]
    NotEligible { peer: PeerId, hash: Hash },

    #[error("signature from {peer} over {hash} does not verify")]
    InvalidSignature { peer: PeerId, hash: Hash },

    #[error("aggregate signature over {0} does not verify")]
    InvalidAggregate(Hash),

    #[error("signer index {index} out of range for {hash}")]
    SignerIndexOutOfRange { hash: Hash, index: usize },
}

/// One signer's signature over a vertex hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub data: Hash,
    pub signature: Vec<u8>,
}

/// An aggregate signature over a vertex hash and the positions of its
/// contributors in the vertex's sorted signer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedAttestation {
    pub data: Hash,
    pub aggregation_bits: Vec<usize>,
    pub signature: Vec<u8>,
}

impl AggregatedAttestation {
    #[must_use]
    pub fn signer_count(&self) -> usize {
        self.aggregation_bits.len()
    }
}

// ---------------------------------------------------------------------------
// FinalityState
// ---------------------------------------------------------------------------

/// Signature bookkeeping for one vertex.
#[derive(Debug, Clone)]
pub struct FinalityState {
    data: Hash,
    signers: Vec<(PeerId, Vec<u8>)>,
    indices: HashMap<PeerId, usize>,
    /// Every contributor, whether folded into `aggregate` or kept in
    /// `individual`.
    aggregation_bits: FixedBitSet,
    aggregate: Option<Vec<u8>>,
    individual: BTreeMap<usize, Vec<u8>>,
    count: usize,
}

impl FinalityState {
    fn new(data: Hash, signers: BTreeMap<PeerId, Vec<u8>>) -> Self {
        let signers: Vec<(PeerId, Vec<u8>)> = signers.into_iter().collect();
        let indices = signers
            .iter()
            .enumerate()
            .map(|(i, (peer, _))| (peer.clone(), i))
            .collect();
        let width = signers.len();
        Self {
            data,
            signers,
            indices,
            aggregation_bits: FixedBitSet::with_capacity(width),
            aggregate: None,
            individual: BTreeMap::new(),
            count: 0,
        }
    }

    /// Eligible signers in index order.
    pub fn signers(&self) -> impl Iterator<Item = &str> {
        self.signers.iter().map(|(peer, _)| peer.as_str())
    }

    #[must_use]
    pub fn signer_index(&self, peer: &str) -> Option<usize> {
        self.indices.get(peer).copied()
    }

    #[must_use]
    pub fn eligible_count(&self) -> usize {
        self.signers.len()
    }

    #[must_use]
    pub const fn signature_count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn has_signed(&self, index: usize) -> bool {
        self.aggregation_bits.contains(index)
    }

    fn add(&mut self, index: usize, signature: Vec<u8>, aggregate: bool, scheme: &dyn SignatureScheme) {
        if aggregate {
            self.aggregate = Some(match self.aggregate.take() {
                Some(existing) => scheme.aggregate(&[existing.as_slice(), signature.as_slice()]),
                None => signature,
            });
        } else {
            self.individual.insert(index, signature);
        }
        self.aggregation_bits.insert(index);
        self.count += 1;
    }

    fn full_signature(&self, scheme: &dyn SignatureScheme) -> Option<Vec<u8>> {
        let parts: Vec<&[u8]> = self
            .aggregate
            .iter()
            .map(Vec::as_slice)
            .chain(self.individual.values().map(Vec::as_slice))
            .collect();
        match parts.as_slice() {
            [] => None,
            [only] => Some(only.to_vec()),
            many => Some(scheme.aggregate(many)),
        }
    }

    fn attestation(&self, scheme: &dyn SignatureScheme) -> Option<AggregatedAttestation> {
        Some(AggregatedAttestation {
            data: self.data.clone(),
            aggregation_bits: self.aggregation_bits.ones().collect(),
            signature: self.full_signature(scheme)?,
        })
    }

    fn replace_with(&mut self, bits: FixedBitSet, signature: Vec<u8>) {
        self.count = bits.count_ones(..);
        self.aggregation_bits = bits;
        self.aggregate = Some(signature);
        self.individual.clear();
    }

    fn merge(
        &mut self,
        remote: &AggregatedAttestation,
        scheme: &dyn SignatureScheme,
    ) -> Result<bool, FinalityError> {
        let mut bits = FixedBitSet::with_capacity(self.signers.len());
        for &index in &remote.aggregation_bits {
            if index >= self.signers.len() {
                return Err(FinalityError::SignerIndexOutOfRange {
                    hash: self.data.clone(),
                    index,
                });
            }
            bits.insert(index);
        }
        if bits.count_ones(..) == 0 || bits.is_subset(&self.aggregation_bits) {
            return Ok(false);
        }

        let keys: Vec<&[u8]> = bits.ones().map(|i| self.signers[i].1.as_slice()).collect();
        if !scheme.verify_aggregate(&keys, self.data.as_bytes(), &remote.signature) {
            return Err(FinalityError::InvalidAggregate(self.data.clone()));
        }

        if self.aggregation_bits.is_subset(&bits) {
            self.replace_with(bits, remote.signature.clone());
        } else if self.aggregation_bits.is_disjoint(&bits) {
            let combined = match self.full_signature(scheme) {
                Some(local) => scheme.aggregate(&[local.as_slice(), remote.signature.as_slice()]),
                None => remote.signature.clone(),
            };
            let mut union = self.aggregation_bits.clone();
            union.union_with(&bits);
            self.replace_with(union, combined);
        } else if bits.count_ones(..) > self.count {
            self.replace_with(bits, remote.signature.clone());
        } else {
            return Ok(false);
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// FinalityStore
// ---------------------------------------------------------------------------

/// Finality state of every committed vertex of one object.
pub struct FinalityStore {
    states: HashMap<Hash, FinalityState>,
    threshold: f64,
    scheme: Box<dyn SignatureScheme>,
}

impl fmt::Debug for FinalityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalityStore")
            .field("vertices", &self.states.len())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl FinalityStore {
    /// A store verifying with [`DigestScheme`].
    #[must_use]
    pub fn new(config: &FinalityConfig) -> Self {
        Self::with_scheme(config, Box::new(DigestScheme))
    }

    #[must_use]
    pub fn with_scheme(config: &FinalityConfig, scheme: Box<dyn SignatureScheme>) -> Self {
        Self {
            states: HashMap::new(),
            threshold: config.threshold,
            scheme,
        }
    }

    /// Record the eligible signers of `hash`. Returns `false` (and changes
    /// nothing) if the vertex already has a state.
    pub fn initialize_state(&mut self, hash: &str, signers: BTreeMap<PeerId, Vec<u8>>) -> bool {
        if self.states.contains_key(hash) {
            return false;
        }
        tracing::trace!(%hash, signers = signers.len(), "initialized finality state");
        self.states
            .insert(hash.to_string(), FinalityState::new(hash.to_string(), signers));
        true
    }

    #[must_use]
    pub fn state(&self, hash: &str) -> Option<&FinalityState> {
        self.states.get(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether `peer` was an eligible signer when `hash` was committed.
    #[must_use]
    pub fn can_sign(&self, peer: &str, hash: &str) -> bool {
        self.states
            .get(hash)
            .is_some_and(|s| s.signer_index(peer).is_some())
    }

    /// Whether `peer` has already contributed to `hash`.
    #[must_use]
    pub fn signed(&self, peer: &str, hash: &str) -> bool {
        self.states.get(hash).is_some_and(|s| {
            s.signer_index(peer)
                .is_some_and(|index| s.has_signed(index))
        })
    }

    /// Record one signature from `peer`.
    ///
    /// Returns `Ok(false)` if the peer already signed.
    ///
    /// # Errors
    ///
    /// - [`FinalityError::UnknownVertex`] if `attestation.data` has no state.
    /// - [`FinalityError::NotEligible`] if `peer` is not an eligible signer.
    /// - [`FinalityError::InvalidSignature`] if the signature does not verify
    ///   against the peer's recorded credential.
    pub fn add_signature(
        &mut self,
        peer: &str,
        attestation: &Attestation,
        aggregate: bool,
    ) -> Result<bool, FinalityError> {
        let hash = &attestation.data;
        let scheme = self.scheme.as_ref();
        let state = self
            .states
            .get_mut(hash)
            .ok_or_else(|| FinalityError::UnknownVertex(hash.clone()))?;
        let index = state
            .signer_index(peer)
            .ok_or_else(|| FinalityError::NotEligible {
                peer: peer.to_string(),
                hash: hash.clone(),
            })?;
        if state.has_signed(index) {
            return Ok(false);
        }
        if !scheme.verify(&state.signers[index].1, hash.as_bytes(), &attestation.signature) {
            return Err(FinalityError::InvalidSignature {
                peer: peer.to_string(),
                hash: hash.clone(),
            });
        }
        state.add(index, attestation.signature.clone(), aggregate, scheme);
        Ok(true)
    }

    /// Record a batch of signatures from `peer`, skipping (and logging) the
    /// ones that fail. Returns the number recorded.
    pub fn add_signatures(&mut self, peer: &str, attestations: &[Attestation], aggregate: bool) -> usize {
        let mut added = 0;
        for attestation in attestations {
            match self.add_signature(peer, attestation, aggregate) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(%peer, error = %e, "skipping attestation"),
            }
        }
        added
    }

    /// The current aggregate for `hash`, if anyone has signed it.
    #[must_use]
    pub fn get_attestation(&self, hash: &str) -> Option<AggregatedAttestation> {
        self.states.get(hash)?.attestation(self.scheme.as_ref())
    }

    /// Aggregates for every signed vertex among `hashes`.
    #[must_use]
    pub fn get_attestations<'a>(&self, hashes: impl IntoIterator<Item = &'a str>) -> Vec<AggregatedAttestation> {
        hashes
            .into_iter()
            .filter_map(|h| self.get_attestation(h))
            .collect()
    }

    /// Merge one remote aggregate. Returns `Ok(true)` if local state changed.
    ///
    /// # Errors
    ///
    /// - [`FinalityError::UnknownVertex`] if the vertex has no state.
    /// - [`FinalityError::SignerIndexOutOfRange`] for a bit past the signer list.
    /// - [`FinalityError::InvalidAggregate`] if the aggregate does not verify.
    pub fn merge_signature(&mut self, remote: &AggregatedAttestation) -> Result<bool, FinalityError> {
        let scheme = self.scheme.as_ref();
        let state = self
            .states
            .get_mut(&remote.data)
            .ok_or_else(|| FinalityError::UnknownVertex(remote.data.clone()))?;
        state.merge(remote, scheme)
    }

    /// Merge remote aggregates, skipping (and logging) the ones that fail.
    /// Returns the number that changed local state.
    pub fn merge_signatures(&mut self, remote: &[AggregatedAttestation]) -> usize {
        let mut merged = 0;
        for attestation in remote {
            match self.merge_signature(attestation) {
                Ok(true) => merged += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(hash = %attestation.data, error = %e, "skipping remote attestation"),
            }
        }
        merged
    }

    /// Signatures needed for `hash` to be final.
    #[must_use]
    pub fn quorum(&self, hash: &str) -> Option<usize> {
        self.states
            .get(hash)
            .map(|s| quorum_for(s.eligible_count(), self.threshold))
    }

    #[must_use]
    pub fn signature_count(&self, hash: &str) -> Option<usize> {
        self.states.get(hash).map(FinalityState::signature_count)
    }

    /// A vertex with no eligible signers is never final.
    #[must_use]
    pub fn is_finalized(&self, hash: &str) -> bool {
        self.states.get(hash).is_some_and(|s| {
            s.eligible_count() > 0 && s.signature_count() >= quorum_for(s.eligible_count(), self.threshold)
        })
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn quorum_for(signers: usize, threshold: f64) -> usize {
    (signers as f64 * threshold).ceil() as usize
}
