//! Working memory: the in-RAM fact set a reasoning run operates on.
//!
//! Loaded from the fact store at the start of a run and queried heavily while
//! chaining, so facts are held under several secondary indexes chosen to match
//! the access paths of condition instructions. The body index doubles as the
//! idempotence check: two facts with equal bodies are the same statement, and
//! the second one is never admitted.

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::error::StoreResult;
use crate::fact::{EntityId, Fact, FactBody, FactId, FactPattern, Scope};
use crate::store::FactStore;

/// Indexed fact set for one reasoning run.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    facts: DashMap<FactId, Fact>,
    /// Idempotence index: body → the fact that already states it.
    by_body: DashMap<FactBody, FactId>,
    by_source_relation: DashMap<(EntityId, String), BTreeSet<FactId>>,
    by_relation_target: DashMap<(String, EntityId), BTreeSet<FactId>>,
    by_relation: DashMap<String, BTreeSet<FactId>>,
    by_entity_property: DashMap<(EntityId, String), BTreeSet<FactId>>,
    by_property: DashMap<String, BTreeSet<FactId>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every fact visible to `scope` from the store.
    ///
    /// This is the run's one bulk read; a store failure here aborts the run
    /// before any mutation happens.
    pub fn load(store: &dyn FactStore, scope: &Scope) -> StoreResult<Self> {
        let memory = Self::new();
        for fact in store.query(&FactPattern::any_relationship(), scope)? {
            memory.insert(fact);
        }
        for fact in store.query(&FactPattern::any_property(), scope)? {
            memory.insert(fact);
        }
        Ok(memory)
    }

    /// Insert a fact. Returns `false` (and admits nothing) if an equal body
    /// is already present.
    pub fn insert(&self, fact: Fact) -> bool {
        if self.by_body.contains_key(&fact.body) {
            return false;
        }
        self.by_body.insert(fact.body.clone(), fact.id);
        match &fact.body {
            FactBody::Relationship {
                source,
                relation,
                target,
            } => {
                self.by_source_relation
                    .entry((source.clone(), relation.clone()))
                    .or_default()
                    .insert(fact.id);
                self.by_relation_target
                    .entry((relation.clone(), target.clone()))
                    .or_default()
                    .insert(fact.id);
                self.by_relation
                    .entry(relation.clone())
                    .or_default()
                    .insert(fact.id);
            }
            FactBody::Property { entity, name, .. } => {
                self.by_entity_property
                    .entry((entity.clone(), name.clone()))
                    .or_default()
                    .insert(fact.id);
                self.by_property
                    .entry(name.clone())
                    .or_default()
                    .insert(fact.id);
            }
        }
        self.facts.insert(fact.id, fact);
        true
    }

    /// Remove a fact by ID, unlinking every index entry.
    pub fn remove(&self, fact_id: FactId) -> Option<Fact> {
        let (_, fact) = self.facts.remove(&fact_id)?;
        self.by_body.remove(&fact.body);
        match &fact.body {
            FactBody::Relationship {
                source,
                relation,
                target,
            } => {
                unlink(
                    &self.by_source_relation,
                    &(source.clone(), relation.clone()),
                    fact_id,
                );
                unlink(
                    &self.by_relation_target,
                    &(relation.clone(), target.clone()),
                    fact_id,
                );
                unlink(&self.by_relation, relation, fact_id);
            }
            FactBody::Property { entity, name, .. } => {
                unlink(
                    &self.by_entity_property,
                    &(entity.clone(), name.clone()),
                    fact_id,
                );
                unlink(&self.by_property, name, fact_id);
            }
        }
        Some(fact)
    }

    pub fn get(&self, fact_id: FactId) -> Option<Fact> {
        self.facts.get(&fact_id).map(|entry| entry.clone())
    }

    /// The fact that already states `body`, if any.
    pub fn find_body(&self, body: &FactBody) -> Option<FactId> {
        self.by_body.get(body).map(|entry| *entry)
    }

    pub fn contains_body(&self, body: &FactBody) -> bool {
        self.by_body.contains_key(body)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// All facts, ordered by ID.
    pub fn snapshot(&self) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self.facts.iter().map(|entry| entry.clone()).collect();
        facts.sort_by_key(|f| f.id);
        facts
    }

    /// Facts matching `pattern`, via the narrowest applicable index, ordered
    /// by ID for deterministic chaining.
    pub fn candidates(&self, pattern: &FactPattern) -> Vec<Fact> {
        let ids = match pattern {
            FactPattern::Relationship {
                source,
                relation,
                target,
            } => match (source, relation, target) {
                (Some(s), Some(r), _) => {
                    Some(index_ids(&self.by_source_relation, &(s.clone(), r.clone())))
                }
                (_, Some(r), Some(t)) => {
                    Some(index_ids(&self.by_relation_target, &(r.clone(), t.clone())))
                }
                (_, Some(r), _) => Some(index_ids(&self.by_relation, r)),
                _ => None,
            },
            FactPattern::Property { entity, name, .. } => match (entity, name) {
                (Some(e), Some(n)) => {
                    Some(index_ids(&self.by_entity_property, &(e.clone(), n.clone())))
                }
                (_, Some(n)) => Some(index_ids(&self.by_property, n)),
                _ => None,
            },
        };

        match ids {
            Some(ids) => ids
                .into_iter()
                .filter_map(|id| self.get(id))
                .filter(|fact| pattern.matches(&fact.body))
                .collect(),
            // No usable index; fall back to a linear scan.
            None => {
                let mut facts: Vec<Fact> = self
                    .facts
                    .iter()
                    .filter(|entry| pattern.matches(&entry.body))
                    .map(|entry| entry.clone())
                    .collect();
                facts.sort_by_key(|f| f.id);
                facts
            }
        }
    }

    /// Whether any fact matches `pattern`. Backs negated conditions.
    pub fn matches_any(&self, pattern: &FactPattern) -> bool {
        !self.candidates(pattern).is_empty()
    }
}

fn index_ids<K: Eq + std::hash::Hash>(
    index: &DashMap<K, BTreeSet<FactId>>,
    key: &K,
) -> Vec<FactId> {
    index
        .get(key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

fn unlink<K: Eq + std::hash::Hash + Clone>(
    index: &DashMap<K, BTreeSet<FactId>>,
    key: &K,
    fact_id: FactId,
) {
    if let Some(mut set) = index.get_mut(key) {
        set.remove(&fact_id);
        if set.is_empty() {
            drop(set);
            index.remove(key);
        }
    }
}
