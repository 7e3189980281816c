//! A scriptable in-memory trust view.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use wotfetch_api::*;

/// A scriptable [TrustView] for driving scheduler tests. All reads
/// reflect whatever the test last scripted, mirroring the "snapshot is
/// already committed" contract of the real trust engine.
#[derive(Debug, Default)]
pub struct MemTrustView(Mutex<Inner>);

#[derive(Debug, Default)]
struct Inner {
    eligible: HashSet<IdentityId>,
    direct: HashSet<IdentityId>,
    roots: HashSet<IdentityId>,
    own: HashSet<IdentityId>,
    edges: HashMap<IdentityId, Vec<TrustEdge>>,
    next_editions: HashMap<IdentityId, u64>,
}

impl MemTrustView {
    /// Script whether the identity is eligible for download.
    pub fn set_eligible(&self, identity: IdentityId, eligible: bool) {
        let mut lock = self.0.lock().unwrap();
        if eligible {
            lock.eligible.insert(identity);
        } else {
            lock.eligible.remove(&identity);
        }
    }

    /// Script whether the identity is directly trusted (rank <= 1).
    pub fn set_directly_trusted(&self, identity: IdentityId, direct: bool) {
        let mut lock = self.0.lock().unwrap();
        if direct {
            lock.direct.insert(identity);
        } else {
            lock.direct.remove(&identity);
        }
    }

    /// Script whether the identity is a local trust root.
    pub fn set_local_root(&self, identity: IdentityId, root: bool) {
        let mut lock = self.0.lock().unwrap();
        if root {
            lock.roots.insert(identity);
        } else {
            lock.roots.remove(&identity);
        }
    }

    /// Script whether the identity is owned by the local user.
    pub fn set_own(&self, identity: IdentityId, own: bool) {
        let mut lock = self.0.lock().unwrap();
        if own {
            lock.own.insert(identity);
        } else {
            lock.own.remove(&identity);
        }
    }

    /// Script an incoming trust edge for its target.
    pub fn add_edge(&self, edge: TrustEdge) {
        self.0
            .lock()
            .unwrap()
            .edges
            .entry(edge.target.clone())
            .or_default()
            .push(edge);
    }

    /// Script the "next edition to fetch" counter of the identity.
    pub fn set_next_edition(&self, identity: IdentityId, edition: u64) {
        self.0.lock().unwrap().next_editions.insert(identity, edition);
    }
}

impl TrustView for MemTrustView {
    fn is_eligible(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().eligible.contains(&identity);
        Box::pin(async move { Ok(r) })
    }

    fn is_directly_trusted(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().direct.contains(&identity);
        Box::pin(async move { Ok(r) })
    }

    fn is_local_root(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().roots.contains(&identity);
        Box::pin(async move { Ok(r) })
    }

    fn is_own(&self, identity: IdentityId) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().own.contains(&identity);
        Box::pin(async move { Ok(r) })
    }

    fn hinting_edges(
        &self,
        target: IdentityId,
    ) -> BoxFut<'_, WotResult<Vec<TrustEdge>>> {
        let r = self
            .0
            .lock()
            .unwrap()
            .edges
            .get(&target)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(r) })
    }

    fn next_edition(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<u64>> {
        let r = self
            .0
            .lock()
            .unwrap()
            .next_editions
            .get(&identity)
            .copied()
            .unwrap_or(0);
        Box::pin(async move { Ok(r) })
    }
}
