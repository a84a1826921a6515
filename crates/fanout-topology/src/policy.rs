//! Per-node responder policy

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The family of distributed operations a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationFamily {
    Find,
    Save,
    Remove,
    Update,
    Aggregate,
}

impl OperationFamily {
    /// All operation families
    pub const ALL: [OperationFamily; 5] = [
        OperationFamily::Find,
        OperationFamily::Save,
        OperationFamily::Remove,
        OperationFamily::Update,
        OperationFamily::Aggregate,
    ];
}

impl fmt::Display for OperationFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationFamily::Find => "find",
            OperationFamily::Save => "save",
            OperationFamily::Remove => "remove",
            OperationFamily::Update => "update",
            OperationFamily::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

/// Access-control policy of one node's local responder.
///
/// The policy is advertised on the node-register broadcast so dispatchers can
/// exclude nodes that do not serve an operation family without a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderPolicy {
    /// Families this node's responder executes locally
    served: HashSet<OperationFamily>,
    /// Families served only when the request explicitly targets this node
    remote_only: HashSet<OperationFamily>,
}

impl ResponderPolicy {
    /// Policy serving every operation family for broadcast and targeted requests
    pub fn allow_all() -> Self {
        Self {
            served: OperationFamily::ALL.into_iter().collect(),
            remote_only: HashSet::new(),
        }
    }

    /// Policy serving only the given families
    pub fn allow(families: impl IntoIterator<Item = OperationFamily>) -> Self {
        Self {
            served: families.into_iter().collect(),
            remote_only: HashSet::new(),
        }
    }

    /// Mark families as served only for requests that explicitly name this node
    pub fn with_remote_only(mut self, families: impl IntoIterator<Item = OperationFamily>) -> Self {
        self.remote_only.extend(families);
        self
    }

    /// Whether this node's responder executes the family at all
    pub fn serves(&self, family: OperationFamily) -> bool {
        self.served.contains(&family)
    }

    /// Whether the family is restricted to explicitly-targeted requests
    pub fn is_remote_only(&self, family: OperationFamily) -> bool {
        self.remote_only.contains(&family)
    }

    /// Whether an unaddressed broadcast for the family should be answered
    pub fn serves_broadcast(&self, family: OperationFamily) -> bool {
        self.serves(family) && !self.is_remote_only(family)
    }
}

impl Default for ResponderPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}
