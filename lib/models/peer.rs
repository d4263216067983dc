//! Peer: another deployment of this system federated with this one.

use chrono::{DateTime, Utc};
use getset::{Getters, Setters};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Another deployment, identified by hostname, that this deployment replicates from or is
/// replicated by.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct Peer {
    /// The peer's hostname, used as its primary key and as the `issuer` in tokens it accepts.
    hostname: String,

    /// Whether replica accounts are allowed to lazily pull from this peer.
    use_for_pull_delegation: bool,

    /// Our current password for authenticating to the peer, issued by
    /// `IssueNewPasswordForPeerJob`.
    our_password: Option<String>,

    /// Hash of the peer's current password, accepted on peering requests addressed to us.
    their_current_password_hash: Option<String>,

    /// Hash of the peer's previous password, still accepted briefly after rotation to avoid a
    /// thundering-herd re-auth failure window.
    their_previous_password_hash: Option<String>,

    /// Last time we successfully used our current credentials against this peer.
    last_peered_at: Option<DateTime<Utc>>,
}

impl Peer {
    /// Registers a new, not-yet-authenticated peer.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            use_for_pull_delegation: true,
            our_password: None,
            their_current_password_hash: None,
            their_previous_password_hash: None,
            last_peered_at: None,
        }
    }

    /// Rotates in a freshly issued password for us to present to the peer.
    pub fn rotate_our_password(&mut self, new_password: impl Into<String>) {
        self.our_password = Some(new_password.into());
    }

    /// Accepts a new password the peer has POSTed to the peering endpoint, demoting the current
    /// hash to `their_previous_password_hash` so both are briefly accepted.
    pub fn rotate_their_password(&mut self, new_password_hash: impl Into<String>) {
        self.their_previous_password_hash = self.their_current_password_hash.take();
        self.their_current_password_hash = Some(new_password_hash.into());
    }

    /// Whether `candidate_hash` matches either the current or the previous password hash.
    pub fn accepts_password_hash(&self, candidate_hash: &str) -> bool {
        self.their_current_password_hash.as_deref() == Some(candidate_hash)
            || self.their_previous_password_hash.as_deref() == Some(candidate_hash)
    }

    /// Reconstructs a peer read back from the database.
    pub(crate) fn from_row(
        hostname: String,
        use_for_pull_delegation: bool,
        our_password: Option<String>,
        their_current_password_hash: Option<String>,
        their_previous_password_hash: Option<String>,
        last_peered_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            hostname,
            use_for_pull_delegation,
            our_password,
            their_current_password_hash,
            their_previous_password_hash,
            last_peered_at,
        }
    }
}
