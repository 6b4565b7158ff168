//! Built-in access-control state.
//!
//! # Groups
//!
//! - `Admin`: fixed at construction. Admins are implicitly writers and
//!   finality signers, may grant and revoke, and cannot be revoked.
//! - `Writer`: may create program vertices.
//! - `Finality`: may attest to vertices committed while it held the role.
//!
//! # Operations (domain [`Domain::Acl`])
//!
//! | op        | args             | who              |
//! |-----------|------------------|------------------|
//! | `grant`   | `[peer, group]`  | admins           |
//! | `revoke`  | `[peer, group]`  | admins           |
//! | `set_key` | `[bytes]`        | any peer (own)   |
//!
//! Concurrent `grant`/`revoke` of the same peer are resolved by
//! [`ConflictResolution`]: revoke wins unless configured otherwise.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::config::{AclConfig, ConflictResolution};
use crate::dag::Action;
use crate::program::{Acl, Program, ProgramError};
use crate::state::DrpState;
use crate::value::Value;
use crate::vertex::{Domain, PeerId, Vertex};

pub const OP_GRANT: &str = "grant";
pub const OP_REVOKE: &str = "revoke";
pub const OP_SET_KEY: &str = "set_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Group {
    Admin,
    Writer,
    Finality,
}

impl Group {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Writer => "writer",
            Self::Finality => "finality",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Group {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "writer" => Ok(Self::Writer),
            "finality" => Ok(Self::Finality),
            other => Err(format!("unknown group '{other}'")),
        }
    }
}

impl From<Group> for Value {
    fn from(group: Group) -> Self {
        Self::from(group.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Member {
    groups: BTreeSet<Group>,
    key: Option<Vec<u8>>,
}

/// Group membership and signer credentials for one replicated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAcl {
    members: BTreeMap<PeerId, Member>,
    permissionless: bool,
    conflict_resolution: ConflictResolution,
}

impl ObjectAcl {
    /// An ACL whose admins are `admins`.
    pub fn new<I, S>(admins: I, config: &AclConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerId>,
    {
        let members = admins
            .into_iter()
            .map(|peer| {
                (
                    peer.into(),
                    Member {
                        groups: BTreeSet::from([Group::Admin]),
                        key: None,
                    },
                )
            })
            .collect();
        Self {
            members,
            permissionless: config.permissionless,
            conflict_resolution: config.conflict_resolution,
        }
    }

    #[must_use]
    pub const fn is_permissionless(&self) -> bool {
        self.permissionless
    }

    #[must_use]
    pub const fn conflict_resolution(&self) -> ConflictResolution {
        self.conflict_resolution
    }

    /// Groups explicitly held by `peer` (admins report only `Admin`).
    #[must_use]
    pub fn groups(&self, peer: &str) -> Vec<Group> {
        self.members
            .get(peer)
            .map(|m| m.groups.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Registered credential of `peer`.
    #[must_use]
    pub fn key(&self, peer: &str) -> Option<&[u8]> {
        self.members.get(peer).and_then(|m| m.key.as_deref())
    }

    fn in_group(&self, peer: &str, group: Group) -> bool {
        self.members
            .get(peer)
            .is_some_and(|m| m.groups.contains(&group) || m.groups.contains(&Group::Admin))
    }

    fn grant(&mut self, caller: &str, peer: &str, group: Group) -> Result<(), ProgramError> {
        self.require_admin(caller, "grant")?;
        if group == Group::Admin {
            return Err(ProgramError::Rejected("the admin group is fixed at creation".into()));
        }
        self.members
            .entry(peer.to_string())
            .or_default()
            .groups
            .insert(group);
        Ok(())
    }

    fn revoke(&mut self, caller: &str, peer: &str, group: Group) -> Result<(), ProgramError> {
        self.require_admin(caller, "revoke")?;
        if self.is_admin(peer) {
            return Err(ProgramError::Rejected(format!("cannot revoke admin {peer}")));
        }
        if let Some(member) = self.members.get_mut(peer) {
            member.groups.remove(&group);
        }
        Ok(())
    }

    fn set_key(&mut self, caller: &str, key: Vec<u8>) {
        self.members.entry(caller.to_string()).or_default().key = Some(key);
    }

    fn require_admin(&self, caller: &str, action: &str) -> Result<(), ProgramError> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(ProgramError::Unauthorized {
                peer: caller.to_string(),
                action: action.to_string(),
            })
        }
    }
}

fn peer_and_group(op: &str, args: &[Value]) -> Result<(PeerId, Group), ProgramError> {
    let [peer, group] = args else {
        return Err(ProgramError::invalid_args(op, "expected [peer, group]"));
    };
    let peer = peer
        .as_str()
        .ok_or_else(|| ProgramError::invalid_args(op, "peer must be a string"))?;
    let group = group
        .as_str()
        .ok_or_else(|| ProgramError::invalid_args(op, "group must be a string"))?
        .parse::<Group>()
        .map_err(|e| ProgramError::invalid_args(op, e))?;
    Ok((peer.to_string(), group))
}

// ---------------------------------------------------------------------------
// Snapshot encoding
// ---------------------------------------------------------------------------

fn member_to_value(member: &Member) -> Value {
    let mut map = BTreeMap::new();
    map.insert(
        "groups".to_string(),
        Value::List(member.groups.iter().map(|g| Value::from(*g)).collect()),
    );
    map.insert(
        "key".to_string(),
        member.key.clone().map_or(Value::Null, Value::Bytes),
    );
    Value::Map(map)
}

fn member_from_value(value: &Value) -> Member {
    let Some(map) = value.as_map() else {
        return Member::default();
    };
    let groups = map
        .get("groups")
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(|g| g.as_str()?.parse().ok())
        .collect();
    let key = map.get("key").and_then(Value::as_bytes).map(<[u8]>::to_vec);
    Member { groups, key }
}

impl Program for ObjectAcl {
    fn fields(&self) -> DrpState {
        let members: BTreeMap<String, Value> = self
            .members
            .iter()
            .map(|(peer, m)| (peer.clone(), member_to_value(m)))
            .collect();
        DrpState::new()
            .with("members", members)
            .with("permissionless", self.permissionless)
            .with(
                "conflict_resolution",
                match self.conflict_resolution {
                    ConflictResolution::RevokeWins => "revoke_wins",
                    ConflictResolution::GrantWins => "grant_wins",
                },
            )
    }

    fn set_field(&mut self, name: &str, value: Value) {
        match name {
            "members" => {
                if let Some(map) = value.as_map() {
                    self.members = map
                        .iter()
                        .map(|(peer, m)| (peer.clone(), member_from_value(m)))
                        .collect();
                }
            }
            "permissionless" => {
                if let Some(b) = value.as_bool() {
                    self.permissionless = b;
                }
            }
            "conflict_resolution" => match value.as_str() {
                Some("revoke_wins") => self.conflict_resolution = ConflictResolution::RevokeWins,
                Some("grant_wins") => self.conflict_resolution = ConflictResolution::GrantWins,
                _ => {}
            },
            _ => {}
        }
    }

    fn apply(
        &mut self,
        caller: &str,
        op_type: &str,
        args: &[Value],
    ) -> Result<Option<Value>, ProgramError> {
        match op_type {
            OP_GRANT => {
                let (peer, group) = peer_and_group(op_type, args)?;
                self.grant(caller, &peer, group)?;
            }
            OP_REVOKE => {
                let (peer, group) = peer_and_group(op_type, args)?;
                self.revoke(caller, &peer, group)?;
            }
            OP_SET_KEY => {
                let [Value::Bytes(key)] = args else {
                    return Err(ProgramError::invalid_args(op_type, "expected [bytes]"));
                };
                self.set_key(caller, key.clone());
            }
            other => return Err(ProgramError::UnknownOperation(other.to_string())),
        }
        Ok(None)
    }

    fn resolve_conflicts(&self, left: &Vertex, right: &Vertex) -> Action {
        if left.operation.domain != Domain::Acl || right.operation.domain != Domain::Acl {
            return Action::Nop;
        }
        let target = |v: &Vertex| v.operation.args().first().and_then(Value::as_str).map(str::to_string);
        if target(left).is_none() || target(left) != target(right) {
            return Action::Nop;
        }

        let l = left.operation.op_type.as_str();
        let r = right.operation.op_type.as_str();
        match (self.conflict_resolution, l, r) {
            (ConflictResolution::RevokeWins, OP_GRANT, OP_REVOKE)
            | (ConflictResolution::GrantWins, OP_REVOKE, OP_GRANT) => Action::DropLeft,
            (ConflictResolution::RevokeWins, OP_REVOKE, OP_GRANT)
            | (ConflictResolution::GrantWins, OP_GRANT, OP_REVOKE) => Action::DropRight,
            _ => Action::Nop,
        }
    }
}

impl Acl for ObjectAcl {
    fn is_admin(&self, peer: &str) -> bool {
        self.members
            .get(peer)
            .is_some_and(|m| m.groups.contains(&Group::Admin))
    }

    fn is_writer(&self, peer: &str) -> bool {
        self.permissionless || self.in_group(peer, Group::Writer)
    }

    fn is_finality_signer(&self, peer: &str) -> bool {
        self.in_group(peer, Group::Finality)
    }

    fn finality_signers(&self) -> BTreeMap<PeerId, Vec<u8>> {
        self.members
            .iter()
            .filter(|(peer, _)| self.is_finality_signer(peer))
            .map(|(peer, m)| (peer.clone(), m.key.clone().unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::{Operation, root_hash};

    fn make_acl() -> ObjectAcl {
        ObjectAcl::new(["admin"], &AclConfig::default())
    }

    fn grant_args(peer: &str, group: Group) -> Vec<Value> {
        vec![Value::from(peer), Value::from(group)]
    }

    fn acl_vertex(peer: &str, op: &str, args: Vec<Value>) -> Vertex {
        Vertex::new(
            peer,
            Operation::new(Domain::Acl, op, args),
            vec![root_hash().clone()],
            1,
        )
    }

    #[test]
    fn admins_hold_every_role() {
        let acl = make_acl();
        assert!(acl.is_admin("admin"));
        assert!(acl.is_writer("admin"));
        assert!(acl.is_finality_signer("admin"));
        assert!(!acl.is_writer("stranger"));
    }

    #[test]
    fn grant_and_revoke_writer() {
        let mut acl = make_acl();
        acl.apply("admin", OP_GRANT, &grant_args("p2", Group::Writer))
            .unwrap();
        assert!(acl.is_writer("p2"));
        assert!(!acl.is_finality_signer("p2"));

        acl.apply("admin", OP_REVOKE, &grant_args("p2", Group::Writer))
            .unwrap();
        assert!(!acl.is_writer("p2"));
    }

    #[test]
    fn non_admin_cannot_grant() {
        let mut acl = make_acl();
        let err = acl
            .apply("p2", OP_GRANT, &grant_args("p3", Group::Writer))
            .unwrap_err();
        assert!(matches!(err, ProgramError::Unauthorized { .. }));
        assert!(!acl.is_writer("p3"));
    }

    #[test]
    fn admins_cannot_be_revoked_or_granted() {
        let mut acl = make_acl();
        assert!(matches!(
            acl.apply("admin", OP_REVOKE, &grant_args("admin", Group::Writer)),
            Err(ProgramError::Rejected(_))
        ));
        assert!(matches!(
            acl.apply("admin", OP_GRANT, &grant_args("p2", Group::Admin)),
            Err(ProgramError::Rejected(_))
        ));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let mut acl = make_acl();
        assert!(matches!(
            acl.apply("admin", OP_GRANT, &[Value::from("p2")]),
            Err(ProgramError::InvalidArguments { .. })
        ));
        assert!(matches!(
            acl.apply("admin", OP_GRANT, &[Value::from("p2"), Value::from("root")]),
            Err(ProgramError::InvalidArguments { .. })
        ));
        assert!(matches!(
            acl.apply("admin", "promote", &[]),
            Err(ProgramError::UnknownOperation(_))
        ));
    }

    #[test]
    fn set_key_registers_finality_credential() {
        let mut acl = make_acl();
        acl.apply("admin", OP_GRANT, &grant_args("p2", Group::Finality))
            .unwrap();
        acl.apply("p2", OP_SET_KEY, &[Value::Bytes(vec![7, 7])])
            .unwrap();
        let signers = acl.finality_signers();
        assert_eq!(signers.get("p2"), Some(&vec![7, 7]));
        assert_eq!(signers.get("admin"), Some(&Vec::new()));
        assert_eq!(acl.key("p2"), Some(&[7_u8, 7][..]));
    }

    #[test]
    fn permissionless_makes_everyone_a_writer() {
        let config = AclConfig {
            permissionless: true,
            ..AclConfig::default()
        };
        let acl = ObjectAcl::new(["admin"], &config);
        assert!(acl.is_writer("anyone"));
        assert!(!acl.is_finality_signer("anyone"));
    }

    #[test]
    fn snapshot_restores_identical_acl() {
        let mut acl = make_acl();
        acl.apply("admin", OP_GRANT, &grant_args("p2", Group::Writer))
            .unwrap();
        acl.apply("p2", OP_SET_KEY, &[Value::Bytes(vec![1])]).unwrap();

        let mut restored = ObjectAcl::new(Vec::<String>::new(), &AclConfig::default());
        restored.restore(&acl.fields());
        assert_eq!(restored, acl);
    }

    #[test]
    fn revoke_wins_by_default() {
        let acl = make_acl();
        let grant = acl_vertex("p1", OP_GRANT, grant_args("p3", Group::Writer));
        let revoke = acl_vertex("p2", OP_REVOKE, grant_args("p3", Group::Writer));
        assert_eq!(acl.resolve_conflicts(&grant, &revoke), Action::DropLeft);
        assert_eq!(acl.resolve_conflicts(&revoke, &grant), Action::DropRight);
    }

    #[test]
    fn grant_wins_when_configured() {
        let config = AclConfig {
            conflict_resolution: ConflictResolution::GrantWins,
            ..AclConfig::default()
        };
        let acl = ObjectAcl::new(["admin"], &config);
        let grant = acl_vertex("p1", OP_GRANT, grant_args("p3", Group::Writer));
        let revoke = acl_vertex("p2", OP_REVOKE, grant_args("p3", Group::Writer));
        assert_eq!(acl.resolve_conflicts(&grant, &revoke), Action::DropRight);
        assert_eq!(acl.resolve_conflicts(&revoke, &grant), Action::DropLeft);
    }

    #[test]
    fn unrelated_targets_do_not_conflict() {
        let acl = make_acl();
        let grant = acl_vertex("p1", OP_GRANT, grant_args("p3", Group::Writer));
        let revoke = acl_vertex("p2", OP_REVOKE, grant_args("p4", Group::Writer));
        assert_eq!(acl.resolve_conflicts(&grant, &revoke), Action::Nop);
        let twice = acl_vertex("p2", OP_GRANT, grant_args("p3", Group::Finality));
        assert_eq!(acl.resolve_conflicts(&grant, &twice), Action::Nop);
    }
}
