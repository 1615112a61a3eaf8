//! Compiled-rule cache with atomic snapshot swap.
//!
//! Readers (forward-chaining runs) grab an `Arc<RuleSnapshot>` and keep it for
//! the whole run; a concurrent rule update builds a new snapshot and swaps the
//! `Arc`, so in-flight runs never observe a half-updated rule set.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{CompiledRule, InferenceRule, RuleId};
use crate::fact::Scope;

/// An immutable view of the rule set at one generation.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    /// Monotonic generation counter, bumped on every mutation.
    pub generation: u64,
    rules: BTreeMap<RuleId, Arc<CompiledRule>>,
    sources: BTreeMap<RuleId, InferenceRule>,
}

impl RuleSnapshot {
    /// The compiled rule for `id`, if present.
    pub fn get(&self, id: RuleId) -> Option<&Arc<CompiledRule>> {
        self.rules.get(&id)
    }

    /// The source definition for `id`, if present.
    pub fn source(&self, id: RuleId) -> Option<&InferenceRule> {
        self.sources.get(&id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All compiled rules, in rule ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.values()
    }

    /// The agenda for a run in `run_scope`: rules that fire there, ordered by
    /// priority descending, ties broken by ascending rule ID.
    pub fn agenda(&self, run_scope: &Scope) -> Vec<Arc<CompiledRule>> {
        let mut agenda: Vec<Arc<CompiledRule>> = self
            .rules
            .values()
            .filter(|rule| rule.fires_in(run_scope))
            .cloned()
            .collect();
        agenda.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        agenda
    }
}

/// Shared, swap-on-write rule cache.
#[derive(Debug, Default)]
pub struct RuleCache {
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot. Cheap; callers hold it across a whole run.
    pub fn current(&self) -> Arc<RuleSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install or replace a rule. Returns the new generation.
    pub fn upsert(&self, source: InferenceRule, compiled: Arc<CompiledRule>) -> u64 {
        self.mutate(|rules, sources| {
            rules.insert(source.id, compiled);
            sources.insert(source.id, source);
        })
    }

    /// Remove a rule. Returns its source definition, if it was present.
    pub fn remove(&self, id: RuleId) -> Option<InferenceRule> {
        let mut removed = None;
        self.mutate(|rules, sources| {
            rules.remove(&id);
            removed = sources.remove(&id);
        });
        removed
    }

    fn mutate(
        &self,
        apply: impl FnOnce(
            &mut BTreeMap<RuleId, Arc<CompiledRule>>,
            &mut BTreeMap<RuleId, InferenceRule>,
        ),
    ) -> u64 {
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut rules = guard.rules.clone();
        let mut sources = guard.sources.clone();
        apply(&mut rules, &mut sources);
        let generation = guard.generation + 1;
        debug!(generation, rules = rules.len(), "rule snapshot swapped");
        *guard = Arc::new(RuleSnapshot {
            generation,
            rules,
            sources,
        });
        generation
    }
}
