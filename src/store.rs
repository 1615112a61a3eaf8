//! Fact store adapter: the boundary to the external knowledge graph.
//!
//! The engine never talks to a database directly; it consumes the
//! [`FactStore`] trait. Any call through this trait is a suspension point —
//! the only place a reasoning run may block on external I/O. A
//! [`MemoryFactStore`] reference implementation backs tests and embedded use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::{StoreError, StoreResult};
use crate::fact::{Fact, FactId, FactPattern, Scope, TYPE_PROPERTY};

/// Read/write access to the external knowledge graph, scope-qualified.
pub trait FactStore: Send + Sync {
    /// Facts visible to `scope` that satisfy `pattern`.
    fn query(&self, pattern: &FactPattern, scope: &Scope) -> StoreResult<Vec<Fact>>;

    /// Entity type names declared by the schema.
    fn entity_types(&self, scope: &Scope) -> StoreResult<Vec<String>>;

    /// Relationship type names declared by the schema.
    fn relationship_types(&self, scope: &Scope) -> StoreResult<Vec<String>>;

    /// Property names declared for an entity type.
    fn properties_for(&self, entity_type: &str, scope: &Scope) -> StoreResult<Vec<String>>;

    /// Write a fact.
    fn persist(&self, fact: &Fact, scope: &Scope) -> StoreResult<()>;

    /// Remove a fact by ID.
    fn retract(&self, fact_id: FactId, scope: &Scope) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// Schema view
// ---------------------------------------------------------------------------

/// Snapshot of the store's schema used by the compiler's semantic pass.
///
/// A store that declares no schema at all yields an *open* view: every name
/// validates. A store that declares any schema yields a closed view in which
/// unknown names are Validate-phase errors.
#[derive(Debug, Clone, Default)]
pub struct SchemaView {
    open: bool,
    entity_types: BTreeSet<String>,
    relationship_types: BTreeSet<String>,
    /// Union of property names across all entity types.
    properties: BTreeSet<String>,
}

impl SchemaView {
    /// A view that accepts every name (store declared no schema).
    pub fn open() -> Self {
        Self {
            open: true,
            ..Default::default()
        }
    }

    /// Build a view by reading the store's schema surface.
    pub fn from_store(store: &dyn FactStore, scope: &Scope) -> StoreResult<Self> {
        let entity_types: BTreeSet<String> = store.entity_types(scope)?.into_iter().collect();
        let relationship_types: BTreeSet<String> =
            store.relationship_types(scope)?.into_iter().collect();
        let mut properties = BTreeSet::new();
        for entity_type in &entity_types {
            properties.extend(store.properties_for(entity_type, scope)?);
        }
        if entity_types.is_empty() && relationship_types.is_empty() {
            return Ok(Self::open());
        }
        Ok(Self {
            open: false,
            entity_types,
            relationship_types,
            properties,
        })
    }

    pub fn with_entity_type(mut self, name: impl Into<String>) -> Self {
        self.entity_types.insert(name.into());
        self
    }

    pub fn with_relationship_type(mut self, name: impl Into<String>) -> Self {
        self.relationship_types.insert(name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.properties.insert(name.into());
        self
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.open || self.entity_types.contains(name)
    }

    pub fn has_relationship_type(&self, name: &str) -> bool {
        self.open || self.relationship_types.contains(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.open || name == TYPE_PROPERTY || self.properties.contains(name)
    }
}

// ---------------------------------------------------------------------------
// In-memory reference store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SchemaDecl {
    entity_types: BTreeSet<String>,
    relationship_types: BTreeSet<String>,
    properties: BTreeMap<String, BTreeSet<String>>,
}

/// In-process [`FactStore`] backed by a concurrent map.
///
/// The system of record in embedded deployments and the collaborator stand-in
/// in tests. `set_unavailable(true)` makes every call fail with
/// [`StoreError::Unavailable`], for exercising abort/retry paths.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    facts: DashMap<FactId, (Scope, Fact)>,
    schema: RwLock<SchemaDecl>,
    unavailable: AtomicBool,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity type in the schema.
    pub fn declare_entity_type(&self, name: impl Into<String>) {
        self.schema
            .write()
            .expect("schema lock poisoned")
            .entity_types
            .insert(name.into());
    }

    /// Declare a relationship type in the schema.
    pub fn declare_relationship_type(&self, name: impl Into<String>) {
        self.schema
            .write()
            .expect("schema lock poisoned")
            .relationship_types
            .insert(name.into());
    }

    /// Declare a property for an entity type.
    pub fn declare_property(&self, entity_type: impl Into<String>, name: impl Into<String>) {
        self.schema
            .write()
            .expect("schema lock poisoned")
            .properties
            .entry(entity_type.into())
            .or_default()
            .insert(name.into());
    }

    /// Toggle simulated outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored facts across all scopes.
    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Look up a fact by ID regardless of scope.
    pub fn get(&self, fact_id: FactId) -> Option<Fact> {
        self.facts.get(&fact_id).map(|e| e.value().1.clone())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "store marked unavailable".into(),
            });
        }
        Ok(())
    }
}

impl FactStore for MemoryFactStore {
    fn query(&self, pattern: &FactPattern, scope: &Scope) -> StoreResult<Vec<Fact>> {
        self.check_available()?;
        let mut out: Vec<Fact> = self
            .facts
            .iter()
            .filter(|entry| entry.value().0.visible_to(scope))
            .filter(|entry| pattern.matches(&entry.value().1.body))
            .map(|entry| entry.value().1.clone())
            .collect();
        // Deterministic order for callers that snapshot results.
        out.sort_by_key(|f| f.id);
        Ok(out)
    }

    fn entity_types(&self, _scope: &Scope) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let schema = self.schema.read().expect("schema lock poisoned");
        Ok(schema.entity_types.iter().cloned().collect())
    }

    fn relationship_types(&self, _scope: &Scope) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let schema = self.schema.read().expect("schema lock poisoned");
        Ok(schema.relationship_types.iter().cloned().collect())
    }

    fn properties_for(&self, entity_type: &str, _scope: &Scope) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let schema = self.schema.read().expect("schema lock poisoned");
        Ok(schema
            .properties
            .get(entity_type)
            .map(|props| props.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn persist(&self, fact: &Fact, scope: &Scope) -> StoreResult<()> {
        self.check_available()?;
        self.facts.insert(fact.id, (scope.clone(), fact.clone()));
        Ok(())
    }

    fn retract(&self, fact_id: FactId, _scope: &Scope) -> StoreResult<()> {
        self.check_available()?;
        self.facts
            .remove(&fact_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { fact_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::FactBody;

    fn fid(raw: u64) -> FactId {
        FactId::new(raw).unwrap()
    }

    #[test]
    fn persist_query_retract() {
        let store = MemoryFactStore::new();
        let scope = Scope::Workspace("w1".into());
        let fact = Fact::asserted(fid(1), FactBody::relationship("a", "R", "b"));

        store.persist(&fact, &scope).unwrap();
        let found = store.query(&FactPattern::any_relationship(), &scope).unwrap();
        assert_eq!(found, vec![fact]);

        store.retract(fid(1), &scope).unwrap();
        assert!(store
            .query(&FactPattern::any_relationship(), &scope)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn retract_missing_fact_errors() {
        let store = MemoryFactStore::new();
        let err = store.retract(fid(9), &Scope::Global).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn global_facts_visible_in_workspaces() {
        let store = MemoryFactStore::new();
        let ws = Scope::Workspace("w1".into());
        store
            .persist(
                &Fact::asserted(fid(1), FactBody::relationship("a", "R", "b")),
                &Scope::Global,
            )
            .unwrap();
        store
            .persist(
                &Fact::asserted(fid(2), FactBody::relationship("c", "R", "d")),
                &Scope::Workspace("w2".into()),
            )
            .unwrap();

        let visible = store.query(&FactPattern::any_relationship(), &ws).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, fid(1));
    }

    #[test]
    fn schema_view_from_declarations() {
        let store = MemoryFactStore::new();
        store.declare_entity_type("Person");
        store.declare_relationship_type("PARENT_OF");
        store.declare_property("Person", "age");

        let view = SchemaView::from_store(&store, &Scope::Global).unwrap();
        assert!(view.has_entity_type("Person"));
        assert!(!view.has_entity_type("Robot"));
        assert!(view.has_relationship_type("PARENT_OF"));
        assert!(view.has_property("age"));
        assert!(!view.has_property("height"));
        // The reserved type property always validates.
        assert!(view.has_property(TYPE_PROPERTY));
    }

    #[test]
    fn empty_schema_is_open() {
        let store = MemoryFactStore::new();
        let view = SchemaView::from_store(&store, &Scope::Global).unwrap();
        assert!(view.has_entity_type("Anything"));
        assert!(view.has_relationship_type("WHATEVER"));
        assert!(view.has_property("any_prop"));
    }

    #[test]
    fn unavailable_store_fails_everything() {
        let store = MemoryFactStore::new();
        store.set_unavailable(true);
        assert!(store.query(&FactPattern::any_property(), &Scope::Global).is_err());
        assert!(store.entity_types(&Scope::Global).is_err());
        assert!(store
            .persist(
                &Fact::asserted(fid(1), FactBody::property("e", "p", true)),
                &Scope::Global
            )
            .is_err());
    }
}
