//! The engine facade: rule management, reasoning runs, and provenance
//! queries behind one handle.
//!
//! An [`Engine`] owns the rule cache, the provenance ledger, and the fact ID
//! allocator, and talks to the knowledge graph only through the
//! [`FactStore`] trait. Runs in the same scope are serialized by a per-scope
//! lock; runs in different scopes proceed concurrently.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::chain::{ChainOptions, ChainOutcome, ChainWarning, ForwardChainer, InferenceStatus};
use crate::error::{EngineError, SeshatError, SeshatResult, StoreError};
use crate::event::{EngineEvent, EventSink, NullSink};
use crate::fact::{AtomicFactIdAllocator, Fact, FactBody, FactId, FactPattern, Scope};
use crate::incremental::{self, GraphChange};
use crate::memory::WorkingMemory;
use crate::provenance::{DerivationRecord, Explanation, ProvenanceLedger};
use crate::rule::{CompileWarning, InferenceRule, RuleId, RuleCache, codegen};
use crate::store::{FactStore, SchemaView};

/// Report of one reasoning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRun {
    pub status: InferenceStatus,
    pub facts_derived: usize,
    pub facts_retracted: usize,
    pub rules_evaluated: usize,
    pub iterations: u32,
    pub duration: Duration,
    /// The derived facts, in derivation order.
    pub derived: Vec<Fact>,
    pub warnings: Vec<ChainWarning>,
}

/// Forward-chaining inference engine over an external fact store.
pub struct Engine {
    store: Arc<dyn FactStore>,
    rules: RuleCache,
    provenance: ProvenanceLedger,
    sink: Arc<dyn EventSink>,
    allocator: AtomicFactIdAllocator,
    run_locks: DashMap<Scope, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self {
            store,
            rules: RuleCache::new(),
            provenance: ProvenanceLedger::new(),
            sink: Arc::new(NullSink),
            allocator: AtomicFactIdAllocator::new(),
            run_locks: DashMap::new(),
        }
    }

    /// Attach an event sink. Replaces the default discarding sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resume fact ID allocation from a known high-water mark.
    pub fn with_next_fact_id(self, next: u64) -> Self {
        Self {
            allocator: AtomicFactIdAllocator::starting_from(next),
            ..self
        }
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    /// Compile and install (or replace) a rule. Returns compile warnings.
    pub fn upsert_rule(&self, rule: InferenceRule) -> SeshatResult<Vec<CompileWarning>> {
        let schema = SchemaView::from_store(self.store.as_ref(), &rule.scope)?;
        let output = codegen::compile(&rule, &schema).map_err(|errors| {
            SeshatError::from(EngineError::CompileFailed {
                name: rule.name.clone(),
                errors,
            })
        })?;
        info!(rule = %rule.id, name = %rule.name, "rule installed");
        self.rules.upsert(rule, output.rule);
        Ok(output.warnings)
    }

    /// Compile a batch of rules in parallel and install them atomically:
    /// either every rule lands or none does.
    pub fn load_rules(
        &self,
        rules: Vec<InferenceRule>,
        scope: &Scope,
    ) -> SeshatResult<Vec<CompileWarning>> {
        let schema = SchemaView::from_store(self.store.as_ref(), scope)?;
        let results = codegen::compile_batch(&rules, &schema);

        let mut outputs = Vec::with_capacity(rules.len());
        for (rule, result) in rules.iter().zip(results) {
            match result {
                Ok(output) => outputs.push(output),
                Err(errors) => {
                    return Err(EngineError::CompileFailed {
                        name: rule.name.clone(),
                        errors,
                    }
                    .into());
                }
            }
        }

        let mut warnings = Vec::new();
        for (rule, output) in rules.into_iter().zip(outputs) {
            warnings.extend(output.warnings);
            self.rules.upsert(rule, output.rule);
        }
        Ok(warnings)
    }

    /// Uninstall a rule, returning its source definition.
    pub fn remove_rule(&self, rule_id: RuleId) -> SeshatResult<InferenceRule> {
        self.rules
            .remove(rule_id)
            .ok_or_else(|| EngineError::RuleNotFound { rule_id }.into())
    }

    /// Source definitions of every installed rule, in ID order.
    pub fn rules(&self) -> Vec<InferenceRule> {
        let snapshot = self.rules.current();
        snapshot
            .iter()
            .filter_map(|rule| snapshot.source(rule.rule_id).cloned())
            .collect()
    }

    /// The store's schema surface for a scope.
    pub fn schema(&self, scope: &Scope) -> SeshatResult<SchemaView> {
        Ok(SchemaView::from_store(self.store.as_ref(), scope)?)
    }

    // -----------------------------------------------------------------------
    // Facts
    // -----------------------------------------------------------------------

    /// Assert a fact with full confidence.
    pub fn assert_fact(&self, body: FactBody, scope: &Scope) -> SeshatResult<Fact> {
        self.assert_fact_with_confidence(body, 1.0, scope)
    }

    /// Assert a fact with an explicit confidence.
    pub fn assert_fact_with_confidence(
        &self,
        body: FactBody,
        confidence: f32,
        scope: &Scope,
    ) -> SeshatResult<Fact> {
        let id = self.allocator.next_id()?;
        let fact = Fact::asserted_with_confidence(id, body, confidence)?;
        self.store.persist(&fact, scope)?;
        Ok(fact)
    }

    /// Retract a fact and everything derived from it, dependents-first in
    /// effect. Returns every retracted fact ID, the named fact first.
    pub fn retract_fact(&self, fact_id: FactId, scope: &Scope) -> SeshatResult<Vec<FactId>> {
        self.with_scope_lock(scope, || {
            // Capture the closure before the ledger forgets the node.
            let dependents = self.provenance.transitive_dependents(fact_id);
            self.store.retract(fact_id, scope)?;
            self.provenance.retract(fact_id);

            let mut retracted = vec![fact_id];
            for dependent in dependents {
                match self.store.retract(dependent, scope) {
                    // A dependent may have been retracted out-of-band already.
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
                self.provenance.retract(dependent);
                retracted.push(dependent);
            }

            self.sink.facts_retracted(&EngineEvent::FactsRetracted {
                scope: scope.clone(),
                fact_ids: retracted.clone(),
            });
            Ok(retracted)
        })
    }

    // -----------------------------------------------------------------------
    // Provenance queries
    // -----------------------------------------------------------------------

    /// Why does this fact hold? `None` for asserted or unknown facts.
    pub fn explain(&self, fact_id: FactId) -> Option<Explanation> {
        self.provenance.explain(fact_id)
    }

    /// Facts derived directly from `fact_id`.
    pub fn direct_dependents(&self, fact_id: FactId) -> Vec<FactId> {
        self.provenance.direct_dependents(fact_id)
    }

    /// Every fact transitively derived from `fact_id`.
    pub fn dependents(&self, fact_id: FactId) -> Vec<FactId> {
        self.provenance.transitive_dependents(fact_id)
    }

    // -----------------------------------------------------------------------
    // Reasoning runs
    // -----------------------------------------------------------------------

    /// Run the full agenda over everything visible in `scope` to fixpoint.
    #[instrument(skip(self, options), fields(scope = %scope))]
    pub fn infer(&self, scope: &Scope, options: &ChainOptions) -> SeshatResult<InferenceRun> {
        self.with_scope_lock(scope, || {
            if options.cancel_requested() {
                return Ok(Self::cancelled_run(0));
            }
            // A store failure here aborts before any mutation.
            let memory = WorkingMemory::load(self.store.as_ref(), scope)?;
            let agenda = self.rules.current().agenda(scope);
            let outcome = ForwardChainer::new(&memory, &self.allocator, options).run(&agenda);
            self.commit(scope, outcome, 0, options, false)
        })
    }

    /// React to a batch of external graph changes: retract invalidated
    /// derivations, then re-chain only the affected rules over the changed
    /// neighborhood.
    #[instrument(skip(self, changes, options), fields(scope = %scope, changes = changes.len()))]
    pub fn infer_incremental(
        &self,
        changes: &[GraphChange],
        scope: &Scope,
        options: &ChainOptions,
    ) -> SeshatResult<InferenceRun> {
        self.with_scope_lock(scope, || {
            if options.cancel_requested() {
                return Ok(Self::cancelled_run(0));
            }
            let snapshot = self.rules.current();
            let plan = incremental::plan(changes, &snapshot, &self.provenance, scope);

            if !options.dry_run {
                for fact_id in &plan.retractions {
                    match self.store.retract(*fact_id, scope) {
                        Ok(()) | Err(StoreError::NotFound { .. }) => {}
                        Err(err) => return Err(err.into()),
                    }
                    self.provenance.retract(*fact_id);
                }
                if !plan.retractions.is_empty() {
                    self.sink.facts_retracted(&EngineEvent::FactsRetracted {
                        scope: scope.clone(),
                        fact_ids: plan.retractions.clone(),
                    });
                }
            }

            let memory =
                incremental::load_neighborhood(self.store.as_ref(), scope, &plan.touched.entities)?;
            // In dry runs the closure is still in the store; evaluate without it.
            for fact_id in &plan.retractions {
                memory.remove(*fact_id);
            }

            let outcome = ForwardChainer::new(&memory, &self.allocator, options).run(&plan.agenda);
            self.commit(scope, outcome, plan.retractions.len(), options, true)
        })
    }

    /// Persist a run's derivations, record provenance, and emit events.
    ///
    /// `skip_existing` guards incremental runs, whose partial working memory
    /// cannot see facts outside the changed neighborhood: a conclusion whose
    /// body the store already holds is silently dropped instead of duplicated.
    fn commit(
        &self,
        scope: &Scope,
        outcome: ChainOutcome,
        facts_retracted: usize,
        options: &ChainOptions,
        skip_existing: bool,
    ) -> SeshatResult<InferenceRun> {
        // Cancellation raised after chaining: abandon the batch unpersisted.
        if options.cancel_requested() {
            return Ok(InferenceRun {
                status: InferenceStatus::Cancelled,
                facts_derived: 0,
                facts_retracted,
                rules_evaluated: outcome.rules_evaluated,
                iterations: outcome.iterations,
                duration: outcome.duration,
                derived: Vec::new(),
                warnings: outcome.warnings,
            });
        }

        let mut derived: Vec<Fact> = Vec::with_capacity(outcome.derivations.len());

        if options.dry_run {
            derived.extend(outcome.derivations.iter().map(|d| d.fact.clone()));
        } else {
            let mut persisted = 0usize;
            for (idx, derivation) in outcome.derivations.iter().enumerate() {
                let already_known = skip_existing
                    && match self.body_exists(&derivation.fact.body, scope) {
                        Ok(exists) => exists,
                        Err(source) => {
                            return Err(self.persist_incomplete(
                                persisted,
                                &outcome.derivations[idx..],
                                source,
                            ));
                        }
                    };
                if already_known {
                    continue;
                }
                if let Err(source) = self.store.persist(&derivation.fact, scope) {
                    return Err(self.persist_incomplete(
                        persisted,
                        &outcome.derivations[idx..],
                        source,
                    ));
                }
                persisted += 1;
                self.provenance.record(DerivationRecord {
                    fact: derivation.fact.clone(),
                    rule: derivation.rule,
                    rule_name: derivation.rule_name.clone(),
                    premises: derivation.premises.clone(),
                });
                derived.push(derivation.fact.clone());
            }

            if !derived.is_empty() {
                self.sink.facts_derived(&EngineEvent::FactsDerived {
                    scope: scope.clone(),
                    facts: derived.clone(),
                });
            }
            self.sink.run_completed(&EngineEvent::RunCompleted {
                scope: scope.clone(),
                status: outcome.status,
                facts_derived: derived.len(),
                facts_retracted,
                duration_ms: outcome.duration.as_millis() as u64,
            });
        }

        info!(
            scope = %scope,
            status = ?outcome.status,
            derived = derived.len(),
            retracted = facts_retracted,
            iterations = outcome.iterations,
            "run finished"
        );
        Ok(InferenceRun {
            status: outcome.status,
            facts_derived: derived.len(),
            facts_retracted,
            rules_evaluated: outcome.rules_evaluated,
            iterations: outcome.iterations,
            duration: outcome.duration,
            derived,
            warnings: outcome.warnings,
        })
    }

    fn persist_incomplete(
        &self,
        persisted: usize,
        remaining: &[crate::chain::Derivation],
        source: StoreError,
    ) -> SeshatError {
        EngineError::PersistIncomplete {
            persisted,
            unpersisted: remaining.iter().map(|d| d.fact.id).collect(),
            source,
        }
        .into()
    }

    fn body_exists(&self, body: &FactBody, scope: &Scope) -> Result<bool, StoreError> {
        let pattern = match body {
            FactBody::Relationship {
                source,
                relation,
                target,
            } => FactPattern::Relationship {
                source: Some(source.clone()),
                relation: Some(relation.clone()),
                target: Some(target.clone()),
            },
            FactBody::Property {
                entity,
                name,
                value,
            } => FactPattern::Property {
                entity: Some(entity.clone()),
                name: Some(name.clone()),
                value: Some(value.clone()),
            },
        };
        Ok(!self.store.query(&pattern, scope)?.is_empty())
    }

    fn cancelled_run(facts_retracted: usize) -> InferenceRun {
        InferenceRun {
            status: InferenceStatus::Cancelled,
            facts_derived: 0,
            facts_retracted,
            rules_evaluated: 0,
            iterations: 0,
            duration: Duration::ZERO,
            derived: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Serialize `body` against other runs in the same scope. The lock table
    /// entry is dropped once no concurrent run still holds it.
    fn with_scope_lock<T>(
        &self,
        scope: &Scope,
        body: impl FnOnce() -> SeshatResult<T>,
    ) -> SeshatResult<T> {
        let lock = self.run_lock(scope);
        let guard = lock_scope(&lock);
        let result = body();
        drop(guard);
        drop(lock);
        self.run_locks
            .remove_if(scope, |_, entry| Arc::strong_count(entry) == 1);
        result
    }

    fn run_lock(&self, scope: &Scope) -> Arc<Mutex<()>> {
        self.run_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn lock_scope(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BufferedSink;
    use crate::rule::grandparent_inference;
    use crate::store::MemoryFactStore;

    fn rid(raw: u64) -> RuleId {
        RuleId::new(raw).unwrap()
    }

    fn engine() -> (Engine, Arc<MemoryFactStore>) {
        let store = Arc::new(MemoryFactStore::new());
        (Engine::new(store.clone()), store)
    }

    #[test]
    fn end_to_end_grandparent_run() {
        let (engine, store) = engine();
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        let p1 = engine
            .assert_fact(FactBody::relationship("alice", "PARENT_OF", "bob"), &scope)
            .unwrap();
        let p2 = engine
            .assert_fact(FactBody::relationship("bob", "PARENT_OF", "carol"), &scope)
            .unwrap();

        let run = engine.infer(&scope, &ChainOptions::default()).unwrap();
        assert_eq!(run.status, InferenceStatus::Success);
        assert_eq!(run.facts_derived, 1);

        let derived = &run.derived[0];
        assert_eq!(
            derived.body,
            FactBody::relationship("alice", "GRANDPARENT_OF", "carol")
        );
        assert!(store.get(derived.id).is_some());

        let explanation = engine.explain(derived.id).unwrap();
        assert_eq!(explanation.rule_name, "Grandparent Inference");
        assert_eq!(explanation.premises.len(), 2);
        assert_eq!(engine.dependents(p1.id), vec![derived.id]);
        assert_eq!(engine.dependents(p2.id), vec![derived.id]);
    }

    #[test]
    fn dry_run_persists_nothing() {
        let (engine, store) = engine();
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        engine
            .assert_fact(FactBody::relationship("a", "PARENT_OF", "b"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("b", "PARENT_OF", "c"), &scope)
            .unwrap();
        let before = store.fact_count();

        let options = ChainOptions {
            dry_run: true,
            ..Default::default()
        };
        let run = engine.infer(&scope, &options).unwrap();
        assert_eq!(run.facts_derived, 1);
        assert_eq!(store.fact_count(), before);
        // Nothing recorded either: the would-be fact has no explanation.
        assert!(engine.explain(run.derived[0].id).is_none());
    }

    #[test]
    fn unavailable_store_aborts_before_mutation() {
        let (engine, store) = engine();
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        store.set_unavailable(true);

        let err = engine
            .infer(&Scope::Global, &ChainOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SeshatError::Store(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn retraction_cascades_through_derivations() {
        let (engine, store) = engine();
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        let p1 = engine
            .assert_fact(FactBody::relationship("a", "PARENT_OF", "b"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("b", "PARENT_OF", "c"), &scope)
            .unwrap();
        let run = engine.infer(&scope, &ChainOptions::default()).unwrap();
        let derived_id = run.derived[0].id;

        let retracted = engine.retract_fact(p1.id, &scope).unwrap();
        assert_eq!(retracted, vec![p1.id, derived_id]);
        assert!(store.get(derived_id).is_none());
        assert!(engine.explain(derived_id).is_none());
    }

    #[test]
    fn retraction_closure_spans_derived_premises() {
        let (engine, store) = engine();
        let scope = Scope::Global;
        engine
            .upsert_rule(InferenceRule::new(
                rid(1),
                "transitive ancestry",
                "?x -[ANCESTOR_OF]-> ?y\n?y -[ANCESTOR_OF]-> ?z",
                "DERIVE ?x -[ANCESTOR_OF]-> ?z",
            ))
            .unwrap();
        let ab = engine
            .assert_fact(FactBody::relationship("a", "ANCESTOR_OF", "b"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("b", "ANCESTOR_OF", "c"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("c", "ANCESTOR_OF", "d"), &scope)
            .unwrap();
        let run = engine.infer(&scope, &ChainOptions::default()).unwrap();
        // a->c, b->d, a->d.
        assert_eq!(run.facts_derived, 3);

        // a->b supports a->c directly and a->d through it.
        let retracted = engine.retract_fact(ab.id, &scope).unwrap();
        assert_eq!(retracted[0], ab.id);
        assert_eq!(retracted.len(), 3);

        // b->d stands on surviving premises.
        let survivors = store
            .query(
                &FactPattern::Relationship {
                    source: Some("b".into()),
                    relation: Some("ANCESTOR_OF".into()),
                    target: Some("d".into()),
                },
                &scope,
            )
            .unwrap();
        assert_eq!(survivors.len(), 1);
        assert!(store
            .query(
                &FactPattern::Relationship {
                    source: Some("a".into()),
                    relation: Some("ANCESTOR_OF".into()),
                    target: Some("d".into()),
                },
                &scope,
            )
            .unwrap()
            .is_empty());
    }

    #[test]
    fn cancellation_checked_before_store_access() {
        use std::sync::atomic::AtomicBool;

        let (engine, store) = engine();
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        // With the store down, reaching it would error; the cancel check
        // comes first.
        store.set_unavailable(true);

        let options = ChainOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..Default::default()
        };
        let run = engine.infer(&Scope::Global, &options).unwrap();
        assert_eq!(run.status, InferenceStatus::Cancelled);
        assert_eq!(run.facts_derived, 0);

        let run = engine
            .infer_incremental(&[], &Scope::Global, &options)
            .unwrap();
        assert_eq!(run.status, InferenceStatus::Cancelled);
    }

    #[test]
    fn scope_locks_released_after_runs() {
        let (engine, _store) = engine();
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        engine
            .infer(&Scope::Global, &ChainOptions::default())
            .unwrap();
        engine
            .infer(
                &Scope::Workspace("research".into()),
                &ChainOptions::default(),
            )
            .unwrap();
        assert!(engine.run_locks.is_empty());
    }

    #[test]
    fn compile_failure_surfaces_all_errors() {
        let (engine, _store) = engine();
        let bad = InferenceRule::new(
            rid(1),
            "broken",
            "NOT ?a -[R]-> ?b",
            "DERIVE ?a -[S]-> ?c",
        );
        let err = engine.upsert_rule(bad).unwrap_err();
        let SeshatError::Engine(EngineError::CompileFailed { errors, .. }) = err else {
            panic!("expected CompileFailed");
        };
        assert!(errors.len() >= 2, "{errors:?}");
        assert!(engine.rules().is_empty());
    }

    #[test]
    fn remove_rule_round_trip() {
        let (engine, _store) = engine();
        engine.upsert_rule(grandparent_inference(rid(3))).unwrap();
        let removed = engine.remove_rule(rid(3)).unwrap();
        assert_eq!(removed.name, "Grandparent Inference");
        assert!(matches!(
            engine.remove_rule(rid(3)).unwrap_err(),
            SeshatError::Engine(EngineError::RuleNotFound { .. })
        ));
    }

    #[test]
    fn events_flow_to_sink() {
        let store = Arc::new(MemoryFactStore::new());
        let sink = Arc::new(BufferedSink::new());
        let engine = Engine::new(store).with_sink(sink.clone());
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        engine
            .assert_fact(FactBody::relationship("a", "PARENT_OF", "b"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("b", "PARENT_OF", "c"), &scope)
            .unwrap();
        engine.infer(&scope, &ChainOptions::default()).unwrap();

        let events = sink.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::FactsDerived { facts, .. } if facts.len() == 1)));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::RunCompleted { facts_derived: 1, .. })));
    }

    #[test]
    fn incremental_run_reacts_to_addition() {
        let (engine, _store) = engine();
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        engine
            .assert_fact(FactBody::relationship("a", "PARENT_OF", "b"), &scope)
            .unwrap();
        let run = engine.infer(&scope, &ChainOptions::default()).unwrap();
        assert_eq!(run.facts_derived, 0);

        let added = engine
            .assert_fact(FactBody::relationship("b", "PARENT_OF", "c"), &scope)
            .unwrap();
        let run = engine
            .infer_incremental(
                &[GraphChange::Added(added)],
                &scope,
                &ChainOptions::default(),
            )
            .unwrap();
        assert_eq!(run.facts_derived, 1);
        assert_eq!(
            run.derived[0].body,
            FactBody::relationship("a", "GRANDPARENT_OF", "c")
        );
    }

    #[test]
    fn incremental_removal_retracts_dependents() {
        let (engine, store) = engine();
        let scope = Scope::Global;
        engine.upsert_rule(grandparent_inference(rid(1))).unwrap();
        let p1 = engine
            .assert_fact(FactBody::relationship("a", "PARENT_OF", "b"), &scope)
            .unwrap();
        engine
            .assert_fact(FactBody::relationship("b", "PARENT_OF", "c"), &scope)
            .unwrap();
        let run = engine.infer(&scope, &ChainOptions::default()).unwrap();
        let derived_id = run.derived[0].id;

        // The premise disappears out-of-band; report it as a change.
        store.retract(p1.id, &scope).unwrap();
        let run = engine
            .infer_incremental(
                &[GraphChange::Removed(p1)],
                &scope,
                &ChainOptions::default(),
            )
            .unwrap();
        assert_eq!(run.facts_retracted, 1);
        assert!(store.get(derived_id).is_none());
        assert!(engine.explain(derived_id).is_none());
    }
}
