//! Content-addressed vertex hashing for the Merkle-DAG.
//!
//! # Hash input
//!
//! BLAKE3 over a sequence of length-prefixed fields, each written as its
//! byte length (`u64`, little-endian) followed by the bytes:
//!
//! ```text
//! peer_id | domain | op_type | value_json | dep_count | dep... | timestamp
//! ```
//!
//! `value_json` is the compact JSON of the argument list (`null` for the
//! NOP), dependencies are sorted, and `timestamp` is its decimal string.
//! Output format: `blake3:<lowercase hex>`.
//!
//! Every field is framed, so no choice of peer id, operation name or
//! dependency string can make two distinct vertices share an input.
//!
//! The signature field is excluded: it is attached after the hash is fixed.

use super::{Hash, Vertex};

fn frame(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    hasher.update(&len.to_le_bytes());
    hasher.update(bytes);
}

/// Compute the content hash of a vertex from its fields.
#[must_use]
pub fn compute_hash(vertex: &Vertex) -> Hash {
    let value_json = vertex
        .operation
        .value
        .as_ref()
        .and_then(|args| serde_json::to_string(args).ok())
        .unwrap_or_else(|| "null".to_string());

    let mut dependencies: Vec<&str> = vertex.dependencies.iter().map(String::as_str).collect();
    dependencies.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    frame(&mut hasher, vertex.peer_id.as_bytes());
    frame(&mut hasher, vertex.operation.domain.as_str().as_bytes());
    frame(&mut hasher, vertex.operation.op_type.as_bytes());
    frame(&mut hasher, value_json.as_bytes());
    frame(&mut hasher, dependencies.len().to_string().as_bytes());
    for dependency in dependencies {
        frame(&mut hasher, dependency.as_bytes());
    }
    frame(&mut hasher, vertex.timestamp.to_string().as_bytes());

    format!("blake3:{}", hasher.finalize())
}

/// Returns `true` if the stored hash matches the content.
#[must_use]
pub fn verify_hash(vertex: &Vertex) -> bool {
    vertex.hash == compute_hash(vertex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::vertex::{Domain, Operation, root_hash};

    fn add(peer: &str, n: i64, deps: Vec<Hash>, ts: i64) -> Vertex {
        Vertex::new(
            peer,
            Operation::new(Domain::Program, "add", vec![Value::Int(n)]),
            deps,
            ts,
        )
    }

    #[test]
    fn hash_format_is_prefixed_hex() {
        let v = add("peer-a", 1, vec![root_hash().clone()], 1);
        let hex = v.hash.strip_prefix("blake3:").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_covers_every_field() {
        let base = add("peer-a", 1, vec![root_hash().clone()], 1);
        let other_peer = add("peer-b", 1, vec![root_hash().clone()], 1);
        let other_arg = add("peer-a", 2, vec![root_hash().clone()], 1);
        let other_ts = add("peer-a", 1, vec![root_hash().clone()], 2);
        let other_deps = add("peer-a", 1, vec![base.hash.clone()], 1);
        let acl = Vertex::new(
            "peer-a",
            Operation::new(Domain::Acl, "add", vec![Value::Int(1)]),
            vec![root_hash().clone()],
            1,
        );

        for other in [&other_peer, &other_arg, &other_ts, &other_deps, &acl] {
            assert_ne!(base.hash, other.hash);
        }
    }

    #[test]
    fn signature_is_not_hashed() {
        let mut v = add("peer-a", 1, vec![root_hash().clone()], 1);
        v.signature = Some(vec![1, 2, 3]);
        assert!(verify_hash(&v));
    }

    #[test]
    fn tampered_vertex_fails_verification() {
        let mut v = add("peer-a", 1, vec![root_hash().clone()], 1);
        v.timestamp = 99;
        assert!(!verify_hash(&v));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        // Shifting a tab-separated suffix between adjacent fields must not
        // reproduce the same identity.
        let peer_carries_domain = Vertex::new(
            "p\tacl",
            Operation::new(Domain::Program, "grant", vec![Value::Int(1)]),
            vec![root_hash().clone()],
            5,
        );
        let domain_carries_op = Vertex::new(
            "p",
            Operation::new(Domain::Acl, "program\tgrant", vec![Value::Int(1)]),
            vec![root_hash().clone()],
            5,
        );
        assert!(verify_hash(&peer_carries_domain));
        assert!(verify_hash(&domain_carries_op));
        assert_ne!(peer_carries_domain.hash, domain_carries_op.hash);
    }

    #[test]
    fn dependency_list_is_framed_per_entry() {
        let joined = add("peer-a", 1, vec!["x,y".into()], 1);
        let split = add("peer-a", 1, vec!["x".into(), "y".into()], 1);
        assert_ne!(joined.hash, split.hash);
    }

    #[test]
    fn dependency_order_does_not_matter() {
        let a = add("peer-a", 1, vec!["x".into(), "y".into()], 1);
        let b = add("peer-a", 1, vec!["y".into(), "x".into()], 1);
        assert_eq!(a.hash, b.hash);
    }
}
