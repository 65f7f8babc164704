//! # Change records and version markers
//!
//! Every commit produces one [`Change`]: the forward patches plus the
//! metadata needed to address it. A change is identified by the SHA-256
//! of its contents and dependencies, so two replicas that applied the same
//! history agree on [`Heads`] without comparing document contents.

use crate::Patch;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Content hash of a single change
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeHash([u8; 32]);

impl ChangeHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeHash({})", self)
    }
}

/// Version marker: the sorted set of changes nothing else depends on
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Heads(Vec<ChangeHash>);

impl Heads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, hash: &ChangeHash) -> bool {
        self.0.binary_search(hash).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeHash> {
        self.0.iter()
    }

    /// Heads after `change` has been applied on top of these heads
    pub(crate) fn advance(&self, change: &Change) -> Heads {
        let mut next: Vec<ChangeHash> = self
            .0
            .iter()
            .filter(|hash| !change.deps.contains(*hash))
            .copied()
            .collect();
        next.push(change.hash);
        next.sort();
        next.dedup();
        Heads(next)
    }
}

impl fmt::Display for Heads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|hash| hash.to_string()).collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Identity of the replica that authored a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(Uuid);

impl ActorId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// One committed edit. Opaque outside this crate; read it through
/// [`DocumentEngine::decode_change`](crate::DocumentEngine::decode_change).
#[derive(Debug)]
pub struct Change {
    hash: ChangeHash,
    actor: ActorId,
    seq: u64,
    deps: Heads,
    time: i64,
    message: Option<String>,
    ops: Vec<Patch>,
}

impl Change {
    pub(crate) fn new(
        actor: ActorId,
        seq: u64,
        deps: Heads,
        time: i64,
        message: Option<String>,
        ops: Vec<Patch>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(actor.0.as_bytes());
        hasher.update(seq.to_le_bytes());
        hasher.update(time.to_le_bytes());
        for dep in deps.iter() {
            hasher.update(dep.as_bytes());
        }
        match &message {
            Some(message) => {
                hasher.update([1u8]);
                hasher.update((message.len() as u64).to_le_bytes());
                hasher.update(message.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(serde_json::to_vec(&ops).unwrap_or_default());

        Self {
            hash: ChangeHash(hasher.finalize().into()),
            actor,
            seq,
            deps,
            time,
            message,
            ops,
        }
    }

    pub fn hash(&self) -> ChangeHash {
        self.hash
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub(crate) fn ops(&self) -> &[Patch] {
        &self.ops
    }

    pub(crate) fn decode(&self) -> DecodedChange {
        DecodedChange {
            hash: self.hash,
            actor: self.actor,
            seq: self.seq,
            deps: self.deps.clone(),
            time: self.time,
            message: self.message.clone(),
            op_count: self.ops.len(),
        }
    }
}

/// Human-readable view of a [`Change`]
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedChange {
    pub hash: ChangeHash,
    pub actor: ActorId,
    pub seq: u64,
    pub deps: Heads,
    /// Seconds since the Unix epoch
    pub time: i64,
    pub message: Option<String>,
    pub op_count: usize,
}
