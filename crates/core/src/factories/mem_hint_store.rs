//! A memory-backed hint store ordered by download priority.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use wotfetch_api::{builder, config::*, hint_store::*, *};

const MOD_NAME: &str = "MemHintStore";

/// Configuration parameters for [MemHintStoreFactory]. Currently empty;
/// kept for config-file uniformity across modules.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemHintStoreConfig {}

impl ModConfig for MemHintStoreConfig {}

/// A production-ready memory-based hint store factory.
///
/// The priority queue is a `BTreeMap` keyed so that plain key iteration
/// yields exactly the order of [Hint::cmp_priority]. Secondary indexes by
/// natural key and by each identity role hold keys only, never hint
/// references, so deleting an identity is a plain index removal.
#[derive(Debug)]
pub struct MemHintStoreFactory {}

impl MemHintStoreFactory {
    /// Construct a new MemHintStoreFactory.
    pub fn create() -> DynHintStoreFactory {
        let out: DynHintStoreFactory = Arc::new(Self {});
        out
    }
}

impl HintStoreFactory for MemHintStoreFactory {
    fn default_config(&self, config: &mut Config) -> WotResult<()> {
        config
            .add_default_module_config::<MemHintStoreConfig>(MOD_NAME.into())
    }

    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, WotResult<DynHintStore>> {
        Box::pin(async move {
            let _config = builder
                .config
                .get_module_config::<MemHintStoreConfig>(MOD_NAME)?;
            let out: DynHintStore = Arc::new(MemHintStore::default());
            Ok(out)
        })
    }
}

/// Index key that sorts exactly like [Hint::cmp_priority]: descending
/// fields wrapped in [Reverse], then the derived lexicographic order of
/// the struct fields matches the comparator's tie-break chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    date: Reverse<DayStamp>,
    capacity: Reverse<u8>,
    sign: Reverse<ScoreSign>,
    target: IdentityId,
    edition: Reverse<u64>,
    source: IdentityId,
}

impl From<&Hint> for PriorityKey {
    fn from(h: &Hint) -> Self {
        Self {
            date: Reverse(h.date),
            capacity: Reverse(h.source_capacity),
            sign: Reverse(h.score_sign),
            target: h.target.clone(),
            edition: Reverse(h.edition),
            source: h.source.clone(),
        }
    }
}

#[derive(Default)]
struct MemHintStore(Mutex<Inner>);

impl std::fmt::Debug for MemHintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemHintStore").finish()
    }
}

#[derive(Default)]
struct Inner {
    queue: BTreeMap<PriorityKey, Hint>,
    by_key: HashMap<HintKey, PriorityKey>,
    by_source: HashMap<IdentityId, HashSet<HintKey>>,
    by_target: HashMap<IdentityId, HashSet<HintKey>>,
}

impl Inner {
    fn insert(&mut self, hint: Hint) -> InsertOutcome {
        let key = hint.key();
        if let Some(old_pk) = self.by_key.get(&key) {
            let existing = self
                .queue
                .get(old_pk)
                .expect("by_key always points at a queue entry");
            if existing.edition >= hint.edition {
                return InsertOutcome::Rejected;
            }
            let old_pk = old_pk.clone();
            self.queue.remove(&old_pk);
            let pk = PriorityKey::from(&hint);
            self.by_key.insert(key, pk.clone());
            self.queue.insert(pk, hint);
            InsertOutcome::Replaced
        } else {
            let pk = PriorityKey::from(&hint);
            self.by_key.insert(key.clone(), pk.clone());
            self.by_source
                .entry(key.source.clone())
                .or_default()
                .insert(key.clone());
            self.by_target
                .entry(key.target.clone())
                .or_default()
                .insert(key);
            self.queue.insert(pk, hint);
            InsertOutcome::Inserted
        }
    }

    fn get(&self, key: &HintKey) -> Option<Hint> {
        self.by_key
            .get(key)
            .and_then(|pk| self.queue.get(pk))
            .cloned()
    }

    fn remove(&mut self, key: &HintKey) -> bool {
        match self.by_key.remove(key) {
            None => false,
            Some(pk) => {
                self.queue.remove(&pk);
                self.unindex(key);
                true
            }
        }
    }

    fn unindex(&mut self, key: &HintKey) {
        if let Some(set) = self.by_source.get_mut(&key.source) {
            set.remove(key);
            if set.is_empty() {
                self.by_source.remove(&key.source);
            }
        }
        if let Some(set) = self.by_target.get_mut(&key.target) {
            set.remove(key);
            if set.is_empty() {
                self.by_target.remove(&key.target);
            }
        }
    }

    fn remove_exact(&mut self, key: &HintKey, edition: u64) -> bool {
        match self.get(key) {
            Some(h) if h.edition == edition => self.remove(key),
            _ => false,
        }
    }

    fn remove_target_up_to(
        &mut self,
        target: &IdentityId,
        edition: u64,
    ) -> usize {
        let keys: Vec<HintKey> = self
            .by_target
            .get(target)
            .map(|set| {
                set.iter()
                    .filter(|k| {
                        self.get(k)
                            .map(|h| h.edition <= edition)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for key in keys.iter() {
            self.remove(key);
        }
        keys.len()
    }

    fn remove_for_identity(&mut self, identity: &IdentityId) -> usize {
        let mut keys: HashSet<HintKey> = HashSet::new();
        if let Some(set) = self.by_source.get(identity) {
            keys.extend(set.iter().cloned());
        }
        if let Some(set) = self.by_target.get(identity) {
            keys.extend(set.iter().cloned());
        }
        for key in keys.iter() {
            self.remove(key);
        }
        keys.len()
    }

    fn select_ready(
        &self,
        exclude_targets: &[IdentityId],
        limit: usize,
    ) -> Vec<Hint> {
        let exclude: HashSet<&IdentityId> = exclude_targets.iter().collect();
        let mut seen: HashSet<IdentityId> = HashSet::new();
        let mut out = Vec::new();
        for hint in self.queue.values() {
            if out.len() >= limit {
                break;
            }
            if exclude.contains(&hint.target) || seen.contains(&hint.target)
            {
                continue;
            }
            seen.insert(hint.target.clone());
            out.push(hint.clone());
        }
        out
    }

    fn ordered(&self) -> Vec<Hint> {
        self.queue.values().cloned().collect()
    }
}

impl HintStore for MemHintStore {
    fn insert(&self, hint: Hint) -> BoxFut<'_, WotResult<InsertOutcome>> {
        let r = self.0.lock().unwrap().insert(hint);
        Box::pin(async move { Ok(r) })
    }

    fn get(&self, key: HintKey) -> BoxFut<'_, WotResult<Option<Hint>>> {
        let r = self.0.lock().unwrap().get(&key);
        Box::pin(async move { Ok(r) })
    }

    fn remove(&self, key: HintKey) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().remove(&key);
        Box::pin(async move { Ok(r) })
    }

    fn remove_exact(
        &self,
        key: HintKey,
        edition: u64,
    ) -> BoxFut<'_, WotResult<bool>> {
        let r = self.0.lock().unwrap().remove_exact(&key, edition);
        Box::pin(async move { Ok(r) })
    }

    fn remove_target_up_to(
        &self,
        target: IdentityId,
        edition: u64,
    ) -> BoxFut<'_, WotResult<usize>> {
        let r = self
            .0
            .lock()
            .unwrap()
            .remove_target_up_to(&target, edition);
        Box::pin(async move { Ok(r) })
    }

    fn remove_for_identity(
        &self,
        identity: IdentityId,
    ) -> BoxFut<'_, WotResult<usize>> {
        let r = self.0.lock().unwrap().remove_for_identity(&identity);
        Box::pin(async move { Ok(r) })
    }

    fn select_ready(
        &self,
        exclude_targets: Vec<IdentityId>,
        limit: usize,
    ) -> BoxFut<'_, WotResult<Vec<Hint>>> {
        let r = self
            .0
            .lock()
            .unwrap()
            .select_ready(&exclude_targets, limit);
        Box::pin(async move { Ok(r) })
    }

    fn ordered(&self) -> BoxFut<'_, WotResult<Vec<Hint>>> {
        let r = self.0.lock().unwrap().ordered();
        Box::pin(async move { Ok(r) })
    }

    fn count(&self) -> BoxFut<'_, WotResult<usize>> {
        let r = self.0.lock().unwrap().queue.len();
        Box::pin(async move { Ok(r) })
    }
}

#[cfg(test)]
mod test;
