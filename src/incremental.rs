//! Incremental re-derivation: react to a batch of external graph changes
//! without rerunning every rule over the whole graph.
//!
//! The pipeline is plan-then-execute. Planning is pure: extract the names a
//! change batch touches, select the rules whose conditions read any of those
//! names, and compute the retraction closure of removed facts from the
//! provenance ledger. Execution (in the engine) retracts the closure, loads
//! the neighborhood of the changed entities, and chains only the selected
//! rules over it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreResult;
use crate::fact::{EntityId, Fact, FactBody, FactId, FactPattern, PropertyValue, Scope, TYPE_PROPERTY};
use crate::memory::WorkingMemory;
use crate::provenance::ProvenanceLedger;
use crate::rule::{CompiledRule, RuleSnapshot};
use crate::store::FactStore;

/// One externally observed mutation of the fact graph.
///
/// Variants carry full fact payloads so planning never has to consult the
/// store for a fact that may already be gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum GraphChange {
    Added(Fact),
    Removed(Fact),
    Modified { old: Fact, new: Fact },
}

impl GraphChange {
    /// Fact payloads this change mentions (two for modifications).
    pub fn facts(&self) -> Vec<&Fact> {
        match self {
            GraphChange::Added(fact) | GraphChange::Removed(fact) => vec![fact],
            GraphChange::Modified { old, new } => vec![old, new],
        }
    }

    /// The prior fact, for changes that invalidate derivations.
    fn invalidated(&self) -> Option<&Fact> {
        match self {
            GraphChange::Added(_) => None,
            GraphChange::Removed(fact) => Some(fact),
            GraphChange::Modified { old, .. } => Some(old),
        }
    }
}

/// The names and entities a change batch touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedNames {
    pub relations: BTreeSet<String>,
    pub entity_types: BTreeSet<String>,
    pub properties: BTreeSet<String>,
    /// Entities appearing in any changed fact; seeds the neighborhood load.
    pub entities: BTreeSet<EntityId>,
}

impl TouchedNames {
    pub fn from_changes(changes: &[GraphChange]) -> Self {
        let mut touched = Self::default();
        for change in changes {
            for fact in change.facts() {
                touched.absorb(&fact.body);
            }
        }
        touched
    }

    fn absorb(&mut self, body: &FactBody) {
        match body {
            FactBody::Relationship {
                source,
                relation,
                target,
            } => {
                self.relations.insert(relation.clone());
                self.entities.insert(source.clone());
                self.entities.insert(target.clone());
            }
            FactBody::Property {
                entity,
                name,
                value,
            } => {
                self.properties.insert(name.clone());
                self.entities.insert(entity.clone());
                if name == TYPE_PROPERTY
                    && let PropertyValue::Str(entity_type) = value
                {
                    self.entity_types.insert(entity_type.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
            && self.entity_types.is_empty()
            && self.properties.is_empty()
            && self.entities.is_empty()
    }
}

/// What an incremental run will do, computed before touching anything.
#[derive(Debug, Clone)]
pub struct IncrementalPlan {
    pub touched: TouchedNames,
    /// Rules whose conditions read a touched name, in agenda order.
    pub agenda: Vec<Arc<CompiledRule>>,
    /// Derived facts invalidated by removals, in ascending ID order.
    pub retractions: Vec<FactId>,
}

/// Plan an incremental run for a change batch.
///
/// The retraction closure's own bodies count as touched too: removing a
/// derived fact can re-enable rules that read its names through negation.
pub fn plan(
    changes: &[GraphChange],
    snapshot: &RuleSnapshot,
    ledger: &ProvenanceLedger,
    scope: &Scope,
) -> IncrementalPlan {
    let mut touched = TouchedNames::from_changes(changes);

    let mut retractions: BTreeSet<FactId> = BTreeSet::new();
    for change in changes {
        if let Some(fact) = change.invalidated() {
            retractions.extend(ledger.transitive_dependents(fact.id));
        }
    }
    for fact_id in &retractions {
        if let Some(record) = ledger.record_of(*fact_id) {
            touched.absorb(&record.fact.body);
        }
    }

    let agenda: Vec<Arc<CompiledRule>> = snapshot
        .agenda(scope)
        .into_iter()
        .filter(|rule| {
            rule.touches(
                &touched.relations,
                &touched.entity_types,
                &touched.properties,
            )
        })
        .collect();

    debug!(
        changes = changes.len(),
        rules = agenda.len(),
        retractions = retractions.len(),
        "incremental plan built"
    );
    IncrementalPlan {
        touched,
        agenda,
        retractions: retractions.into_iter().collect(),
    }
}

/// Load the changed entities and their one-hop neighborhood from the store.
///
/// Rule conditions join facts through shared entities, so facts adjacent to
/// a changed entity are the only ones a selected rule can newly combine.
pub fn load_neighborhood(
    store: &dyn FactStore,
    scope: &Scope,
    seeds: &BTreeSet<EntityId>,
) -> StoreResult<WorkingMemory> {
    let memory = WorkingMemory::new();
    let mut known = seeds.clone();
    let mut frontier = seeds.clone();

    // Two passes: the seeds themselves, then their direct neighbors.
    for _ in 0..2 {
        let mut next: BTreeSet<EntityId> = BTreeSet::new();
        for entity in &frontier {
            let outgoing = store.query(
                &FactPattern::Relationship {
                    source: Some(entity.clone()),
                    relation: None,
                    target: None,
                },
                scope,
            )?;
            let incoming = store.query(
                &FactPattern::Relationship {
                    source: None,
                    relation: None,
                    target: Some(entity.clone()),
                },
                scope,
            )?;
            for fact in outgoing.into_iter().chain(incoming) {
                for neighbor in fact.body.entities() {
                    if !known.contains(neighbor) {
                        next.insert(neighbor.clone());
                    }
                }
                memory.insert(fact);
            }
            let properties = store.query(
                &FactPattern::Property {
                    entity: Some(entity.clone()),
                    name: None,
                    value: None,
                },
                scope,
            )?;
            for fact in properties {
                memory.insert(fact);
            }
        }
        known.extend(next.iter().cloned());
        frontier = next;
    }
    Ok(memory)
}
