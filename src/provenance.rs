//! Provenance: the derivation DAG and the explanation queries over it.
//!
//! Every admitted derivation is recorded as edges premise → conclusion, so
//! "what depends on this fact" is graph reachability and "why does this fact
//! hold" is a walk backward over the recorded premises. The graph and a
//! fact-ID index are kept in lockstep: petgraph for traversal, a concurrent
//! map for O(1) ID lookup.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::RwLock;

use dashmap::DashMap;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fact::{Fact, FactId};
use crate::rule::RuleId;

/// What the ledger remembers about one derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationRecord {
    pub fact: Fact,
    pub rule: RuleId,
    /// Rule name at derivation time, so explanations survive rule removal.
    pub rule_name: String,
    pub premises: Vec<FactId>,
}

/// One premise in an explanation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PremiseExplanation {
    /// Ground assertion; nothing further to unfold.
    Asserted { fact_id: FactId },
    /// Itself derived; unfolded recursively.
    Derived { explanation: Box<Explanation> },
    /// Already unfolded earlier in this tree; expansion stopped here.
    Truncated { fact_id: FactId },
}

/// Why a fact holds: the deriving rule and the full premise tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub fact: Fact,
    pub rule: RuleId,
    pub rule_name: String,
    pub premises: Vec<PremiseExplanation>,
    /// Whether any branch below was truncated on revisit.
    pub truncated: bool,
}

/// Thread-safe derivation ledger.
///
/// Nodes exist for every fact that appears in a recorded derivation,
/// premises included, so dependent traversal works from asserted facts too.
#[derive(Debug, Default)]
pub struct ProvenanceLedger {
    graph: RwLock<StableDiGraph<FactId, RuleId>>,
    node_index: DashMap<FactId, NodeIndex>,
    records: DashMap<FactId, DerivationRecord>,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded derivations.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The raw record for a derived fact.
    pub fn record_of(&self, fact_id: FactId) -> Option<DerivationRecord> {
        self.records.get(&fact_id).map(|entry| entry.clone())
    }

    /// Record one derivation: premise → conclusion edges plus the record.
    pub fn record(&self, record: DerivationRecord) {
        let fact_id = record.fact.id;
        let mut graph = self.write_graph();
        let target = self.intern(&mut graph, fact_id);
        for premise in &record.premises {
            let source = self.intern(&mut graph, *premise);
            graph.add_edge(source, target, record.rule);
        }
        drop(graph);
        debug!(fact = %fact_id, premises = record.premises.len(), "derivation recorded");
        self.records.insert(fact_id, record);
    }

    /// Why does this fact hold? `None` for asserted or unknown facts.
    pub fn explain(&self, fact_id: FactId) -> Option<Explanation> {
        let mut visited = HashSet::new();
        self.explain_inner(fact_id, &mut visited)
    }

    fn explain_inner(
        &self,
        fact_id: FactId,
        visited: &mut HashSet<FactId>,
    ) -> Option<Explanation> {
        let record = self.record_of(fact_id)?;
        visited.insert(fact_id);

        let mut truncated = false;
        let mut premises = Vec::with_capacity(record.premises.len());
        for premise in &record.premises {
            if visited.contains(premise) {
                truncated = true;
                premises.push(PremiseExplanation::Truncated { fact_id: *premise });
                continue;
            }
            match self.explain_inner(*premise, visited) {
                Some(explanation) => {
                    truncated |= explanation.truncated;
                    premises.push(PremiseExplanation::Derived {
                        explanation: Box::new(explanation),
                    });
                }
                None => premises.push(PremiseExplanation::Asserted { fact_id: *premise }),
            }
        }

        Some(Explanation {
            fact: record.fact,
            rule: record.rule,
            rule_name: record.rule_name,
            premises,
            truncated,
        })
    }

    /// Facts derived directly from `fact_id`, in ascending ID order.
    pub fn direct_dependents(&self, fact_id: FactId) -> Vec<FactId> {
        let Some(node) = self.node_index.get(&fact_id).map(|entry| *entry) else {
            return Vec::new();
        };
        let graph = self.read_graph();
        let mut out: BTreeSet<FactId> = BTreeSet::new();
        for neighbor in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(id) = graph.node_weight(neighbor) {
                out.insert(*id);
            }
        }
        out.into_iter().collect()
    }

    /// Every fact transitively derived from `fact_id`, in ascending ID order.
    /// Excludes `fact_id` itself. This is the retraction closure.
    pub fn transitive_dependents(&self, fact_id: FactId) -> Vec<FactId> {
        let Some(start) = self.node_index.get(&fact_id).map(|entry| *entry) else {
            return Vec::new();
        };
        let graph = self.read_graph();
        let mut seen: BTreeSet<FactId> = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        let mut visited_nodes = HashSet::from([start]);
        while let Some(node) = queue.pop_front() {
            for neighbor in graph.neighbors_directed(node, Direction::Outgoing) {
                if visited_nodes.insert(neighbor) {
                    if let Some(id) = graph.node_weight(neighbor) {
                        seen.insert(*id);
                    }
                    queue.push_back(neighbor);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Forget a fact: drop its node, incident edges, and record.
    ///
    /// Callers retract dependents first (see [`transitive_dependents`]);
    /// this method removes exactly one fact.
    ///
    /// [`transitive_dependents`]: ProvenanceLedger::transitive_dependents
    pub fn retract(&self, fact_id: FactId) -> Option<DerivationRecord> {
        if let Some((_, node)) = self.node_index.remove(&fact_id) {
            self.write_graph().remove_node(node);
        }
        self.records.remove(&fact_id).map(|(_, record)| record)
    }

    fn intern(&self, graph: &mut StableDiGraph<FactId, RuleId>, fact_id: FactId) -> NodeIndex {
        if let Some(node) = self.node_index.get(&fact_id) {
            return *node;
        }
        let node = graph.add_node(fact_id);
        self.node_index.insert(fact_id, node);
        node
    }

    fn read_graph(&self) -> std::sync::RwLockReadGuard<'_, StableDiGraph<FactId, RuleId>> {
        match self.graph.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_graph(&self) -> std::sync::RwLockWriteGuard<'_, StableDiGraph<FactId, RuleId>> {
        match self.graph.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactBody;

    fn fid(raw: u64) -> FactId {
        FactId::new(raw).unwrap()
    }

    fn rid(raw: u64) -> RuleId {
        RuleId::new(raw).unwrap()
    }

    fn derived(id: u64, source: &str, relation: &str, target: &str, premises: &[u64]) -> DerivationRecord {
        DerivationRecord {
            fact: Fact::derived(
                fid(id),
                FactBody::relationship(source, relation, target),
                1.0,
                rid(1),
                0,
                1,
            )
            .unwrap(),
            rule: rid(1),
            rule_name: "Grandparent Inference".into(),
            premises: premises.iter().map(|raw| fid(*raw)).collect(),
        }
    }

    #[test]
    fn explain_unfolds_to_asserted_premises() {
        let ledger = ProvenanceLedger::new();
        ledger.record(derived(10, "alice", "GRANDPARENT_OF", "carol", &[1, 2]));

        let explanation = ledger.explain(fid(10)).unwrap();
        assert_eq!(explanation.rule_name, "Grandparent Inference");
        assert_eq!(
            explanation.premises,
            vec![
                PremiseExplanation::Asserted { fact_id: fid(1) },
                PremiseExplanation::Asserted { fact_id: fid(2) },
            ]
        );
        assert!(!explanation.truncated);

        // Asserted facts have no explanation of their own.
        assert!(ledger.explain(fid(1)).is_none());
    }

    #[test]
    fn explain_nests_derived_premises() {
        let ledger = ProvenanceLedger::new();
        ledger.record(derived(10, "a", "R", "b", &[1, 2]));
        ledger.record(derived(11, "a", "S", "c", &[10, 3]));

        let explanation = ledger.explain(fid(11)).unwrap();
        assert_eq!(explanation.premises.len(), 2);
        let PremiseExplanation::Derived { explanation: nested } = &explanation.premises[0] else {
            panic!("first premise should be derived");
        };
        assert_eq!(nested.fact.id, fid(10));
    }

    #[test]
    fn shared_premise_truncates_on_revisit() {
        let ledger = ProvenanceLedger::new();
        // Diamond: 20 and 21 both rest on derived 10; 22 rests on both.
        ledger.record(derived(10, "a", "R", "b", &[1]));
        ledger.record(derived(20, "a", "S", "b", &[10]));
        ledger.record(derived(21, "a", "T", "b", &[10]));
        ledger.record(derived(22, "a", "U", "b", &[20, 21]));

        let explanation = ledger.explain(fid(22)).unwrap();
        assert!(explanation.truncated);
    }

    #[test]
    fn dependents_traversal() {
        let ledger = ProvenanceLedger::new();
        ledger.record(derived(10, "a", "R", "c", &[1, 2]));
        ledger.record(derived(11, "a", "S", "d", &[10]));
        ledger.record(derived(12, "a", "T", "e", &[11, 3]));

        assert_eq!(ledger.direct_dependents(fid(1)), vec![fid(10)]);
        assert_eq!(
            ledger.transitive_dependents(fid(1)),
            vec![fid(10), fid(11), fid(12)]
        );
        assert_eq!(ledger.transitive_dependents(fid(3)), vec![fid(12)]);
        assert!(ledger.transitive_dependents(fid(99)).is_empty());
    }

    #[test]
    fn retract_forgets_fact_and_edges() {
        let ledger = ProvenanceLedger::new();
        ledger.record(derived(10, "a", "R", "c", &[1]));
        ledger.record(derived(11, "a", "S", "d", &[10]));

        let record = ledger.retract(fid(10)).unwrap();
        assert_eq!(record.fact.id, fid(10));
        assert!(ledger.explain(fid(10)).is_none());
        // Edges through the removed node are gone.
        assert!(ledger.transitive_dependents(fid(1)).is_empty());
        // The downstream record survives until its own retraction.
        assert!(ledger.explain(fid(11)).is_some());
    }
}
