//! Ownership-based trust decisions for shared-memory segments.
//!
//! A segment is trusted iff its owner identity equals one of two reference
//! identities computed fresh per check: the current user identity and the
//! process's default identity (real and effective uid in the Unix rendition;
//! either may legitimately be the creator depending on how the client
//! process was launched). Any identity lookup failure is treated as
//! untrusted: the check fails closed, never open.

use nix::unistd::Uid;
use tracing::warn;

use crate::segment::Segment;

/// An owner identity attached to a kernel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub u32);

impl From<Uid> for Identity {
    fn from(uid: Uid) -> Self {
        Identity(uid.as_raw())
    }
}

/// The pure trust decision over three identities.
///
/// True iff `owner` equals either reference identity. Never cached: callers
/// recompute the references per check.
pub fn owner_is_trusted(owner: Identity, user: Identity, process_default: Identity) -> bool {
    owner == user || owner == process_default
}

/// Policy seam deciding whether a segment may be relayed.
///
/// The notification frontend depends only on this trait, keeping it testable
/// without real foreign-owned kernel objects.
pub trait SegmentPolicy: Send + Sync {
    /// Return true iff the segment's owner is trusted.
    fn validate(&self, segment: &Segment) -> bool;
}

/// Production policy: compare the segment owner against the current user
/// and the process default identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityValidator;

impl SecurityValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self
    }
}

impl SegmentPolicy for SecurityValidator {
    fn validate(&self, segment: &Segment) -> bool {
        let user = Identity::from(Uid::current());
        let process_default = Identity::from(Uid::effective());

        match segment.owner() {
            Ok(owner) => owner_is_trusted(owner, user, process_default),
            Err(e) => {
                warn!(segment = segment.name(), error = %e, "owner lookup failed, refusing segment");
                false
            }
        }
    }
}
