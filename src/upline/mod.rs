//! Referral tree reading and registration.
//!
//! Sponsor links are fixed at registration, but admin tooling can rewrite
//! them, so the walk never trusts the data to be acyclic: it tracks visited
//! members and has a hard depth bound.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{Member, MemberId, MemberSnapshot};
use crate::storage::{MemberStore, StorageError, Store};

/// Upper bound for walks that are not limited by commission depth.
pub const MAX_WALK_DEPTH: usize = 1_024;

/// Referral tree errors.
#[derive(Debug, Error)]
pub enum UplineError {
    #[error("Member not found: {0}")]
    UnknownMember(MemberId),

    #[error("Sponsor cycle above {member}: {repeated} appears twice")]
    Cycle { member: MemberId, repeated: MemberId },

    #[error("Member {0} cannot sponsor itself")]
    SelfSponsor(MemberId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of a lenient walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upline {
    /// `ancestors[0]` is the direct sponsor.
    pub ancestors: Vec<MemberSnapshot>,
    /// Set when the walk stopped at a repeated member.
    pub cycle_at: Option<MemberId>,
}

impl Upline {
    pub fn ids(&self) -> Vec<MemberId> {
        self.ancestors.iter().map(|a| a.member.id.clone()).collect()
    }
}

/// Reads sponsor chains.
#[derive(Clone)]
pub struct UplineReader {
    store: Arc<dyn Store>,
}

impl UplineReader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Ancestors up to `depth` levels, stopping early at the root.
    ///
    /// A cycle truncates the walk: the remaining levels are treated as absent
    /// and `cycle_at` names the repeated member. A sponsor id with no member
    /// row also ends the walk.
    pub async fn walk(&self, member: &MemberId, depth: usize) -> Result<Upline, UplineError> {
        let start = self
            .store
            .member(member)
            .await?
            .ok_or_else(|| UplineError::UnknownMember(member.clone()))?;

        let mut visited = HashSet::from([member.clone()]);
        let mut ancestors = Vec::new();
        let mut next = start.sponsor_id;

        while let Some(sponsor) = next {
            if ancestors.len() >= depth {
                break;
            }
            if !visited.insert(sponsor.clone()) {
                warn!(
                    member = %member,
                    repeated = %sponsor,
                    "Sponsor cycle detected; truncating upline"
                );
                return Ok(Upline {
                    ancestors,
                    cycle_at: Some(sponsor),
                });
            }
            let Some(snapshot) = self.store.member_snapshot(&sponsor).await? else {
                warn!(member = %member, sponsor = %sponsor, "Dangling sponsor link");
                break;
            };
            next = snapshot.member.sponsor_id.clone();
            ancestors.push(snapshot);
        }

        Ok(Upline {
            ancestors,
            cycle_at: None,
        })
    }

    /// Like [`walk`](Self::walk), but a cycle is an error.
    ///
    /// Settlement uses this so that a corrupted tree aborts the payment
    /// instead of paying a partial chain.
    pub async fn resolve(
        &self,
        member: &MemberId,
        depth: usize,
    ) -> Result<Vec<MemberSnapshot>, UplineError> {
        let upline = self.walk(member, depth).await?;
        match upline.cycle_at {
            Some(repeated) => Err(UplineError::Cycle {
                member: member.clone(),
                repeated,
            }),
            None => Ok(upline.ancestors),
        }
    }

    /// Whether linking `member` under `sponsor` would close a loop.
    pub async fn would_create_cycle(
        &self,
        member: &MemberId,
        sponsor: &MemberId,
    ) -> Result<bool, UplineError> {
        if member == sponsor {
            return Ok(true);
        }
        let upline = self.walk(sponsor, MAX_WALK_DEPTH).await?;
        Ok(upline.cycle_at.is_some() || upline.ancestors.iter().any(|a| &a.member.id == member))
    }
}

/// Create a member under an existing sponsor.
pub async fn register_member<S: MemberStore + ?Sized>(
    store: &S,
    id: MemberId,
    sponsor: Option<MemberId>,
) -> Result<Member, UplineError> {
    if let Some(sponsor) = &sponsor {
        if sponsor == &id {
            return Err(UplineError::SelfSponsor(id));
        }
        if store.member(sponsor).await?.is_none() {
            return Err(UplineError::UnknownMember(sponsor.clone()));
        }
    }

    let member = Member {
        id,
        sponsor_id: sponsor,
        deactivated: false,
        ecommerce_rate_override: None,
        created_at: Utc::now(),
    };
    store.register_member(&member).await?;
    info!(
        member = %member.id,
        sponsor = ?member.sponsor_id.as_ref().map(MemberId::as_str),
        "Member registered"
    );
    Ok(member)
}
