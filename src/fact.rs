//! Core fact types for the seshat engine.
//!
//! Facts are the atomic units of knowledge: a typed relationship between two
//! entities, or a property attached to one entity. Every fact is identified by
//! a [`FactId`] and is immutable once created — "changing" a fact means
//! retracting the old one and asserting or deriving a new one. The
//! [`AtomicFactIdAllocator`] provides thread-safe ID generation.

use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{FactError, SeshatResult};
use crate::rule::RuleId;

/// Unique, niche-optimized identifier for a fact.
///
/// Uses `NonZeroU64` so that `Option<FactId>` is the same size as `FactId`
/// (the niche optimization lets the compiler use 0 as the `None` discriminant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FactId(NonZeroU64);

impl FactId {
    /// Create a `FactId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(FactId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fact:{}", self.0)
    }
}

/// Identifier for an entity in the external knowledge graph.
///
/// Entity IDs are opaque strings owned by the fact store; the engine never
/// interprets them beyond equality.
pub type EntityId = String;

/// Reserved property name under which an entity's type is recorded.
///
/// A `?x TYPE "Person"` clause in the rule DSL matches a property fact
/// `(?x, "type", Str("Person"))`.
pub const TYPE_PROPERTY: &str = "type";

/// A property value: a closed tagged variant rather than an open dynamic type,
/// so equality and hashing stay well-defined.
///
/// `Num` rejects NaN at construction; `-0.0` is normalized to `0.0` so that
/// numeric equality matches IEEE equality for all representable values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
}

impl PropertyValue {
    /// Create a numeric value. Returns `None` for NaN.
    pub fn num(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else {
            Some(PropertyValue::Num(value))
        }
    }

    /// Canonical bit pattern for hashing/equality of numeric values.
    fn num_bits(value: f64) -> u64 {
        // Normalize -0.0 to 0.0 so the two compare and hash identically.
        if value == 0.0 { 0.0f64.to_bits() } else { value.to_bits() }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::Num(a), PropertyValue::Num(b)) => {
                Self::num_bits(*a) == Self::num_bits(*b)
            }
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Null, PropertyValue::Null) => true,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PropertyValue::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            PropertyValue::Num(n) => {
                1u8.hash(state);
                Self::num_bits(*n).hash(state);
            }
            PropertyValue::Bool(b) => {
                2u8.hash(state);
                b.hash(state);
            }
            PropertyValue::Null => 3u8.hash(state),
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Str(s) => write!(f, "\"{s}\""),
            PropertyValue::Num(n) => write!(f, "{n}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// The content of a fact: the tuple that identifies it for idempotence checks.
///
/// Two facts with equal bodies are the same statement — derivation never
/// produces a second fact with an already-present body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactBody {
    /// `(source) -[relation]-> (target)`
    Relationship {
        source: EntityId,
        relation: String,
        target: EntityId,
    },
    /// `(entity).name = value`
    Property {
        entity: EntityId,
        name: String,
        value: PropertyValue,
    },
}

impl FactBody {
    /// Build a relationship body.
    pub fn relationship(
        source: impl Into<EntityId>,
        relation: impl Into<String>,
        target: impl Into<EntityId>,
    ) -> Self {
        FactBody::Relationship {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
        }
    }

    /// Build a property body.
    pub fn property(
        entity: impl Into<EntityId>,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        FactBody::Property {
            entity: entity.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Entity IDs mentioned by this body (1 for properties, 2 for relationships).
    pub fn entities(&self) -> Vec<&EntityId> {
        match self {
            FactBody::Relationship { source, target, .. } => vec![source, target],
            FactBody::Property { entity, .. } => vec![entity],
        }
    }
}

impl std::fmt::Display for FactBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactBody::Relationship {
                source,
                relation,
                target,
            } => write!(f, "{source} -[{relation}]-> {target}"),
            FactBody::Property {
                entity,
                name,
                value,
            } => write!(f, "{entity}.{name} = {value}"),
        }
    }
}

/// How a fact came to exist.
///
/// The invariant "an asserted fact never has a deriving rule; a derived fact
/// always does" is enforced by construction: there is no way to build a
/// derived fact without naming the rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum FactOrigin {
    /// Stated directly by a user or an importer.
    Asserted,
    /// Produced by the forward chainer.
    Derived {
        /// The rule whose conclusion produced this fact.
        rule: RuleId,
        /// Seconds since UNIX epoch at derivation time.
        at: u64,
        /// 1 + max depth of any derived premise (asserted premises count 0).
        depth: u32,
    },
}

/// An atomic unit of knowledge, asserted or derived. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Unique identifier.
    pub id: FactId,
    /// The statement itself.
    pub body: FactBody,
    /// Confidence in `[0.0, 1.0]`; asserted facts default to 1.0.
    pub confidence: f32,
    /// Provenance marker.
    pub origin: FactOrigin,
}

impl Fact {
    /// Create an asserted fact with full confidence.
    pub fn asserted(id: FactId, body: FactBody) -> Self {
        Self {
            id,
            body,
            confidence: 1.0,
            origin: FactOrigin::Asserted,
        }
    }

    /// Create an asserted fact with an explicit confidence.
    ///
    /// Fails if `confidence` is outside `[0.0, 1.0]`.
    pub fn asserted_with_confidence(
        id: FactId,
        body: FactBody,
        confidence: f32,
    ) -> SeshatResult<Self> {
        check_confidence(confidence)?;
        Ok(Self {
            id,
            body,
            confidence,
            origin: FactOrigin::Asserted,
        })
    }

    /// Create a derived fact.
    ///
    /// Fails if `confidence` is outside `[0.0, 1.0]`.
    pub fn derived(
        id: FactId,
        body: FactBody,
        confidence: f32,
        rule: RuleId,
        at: u64,
        depth: u32,
    ) -> SeshatResult<Self> {
        check_confidence(confidence)?;
        Ok(Self {
            id,
            body,
            confidence,
            origin: FactOrigin::Derived { rule, at, depth },
        })
    }

    /// Whether this fact was produced by the chainer.
    pub fn is_derived(&self) -> bool {
        matches!(self.origin, FactOrigin::Derived { .. })
    }

    /// Derivation depth: 0 for asserted facts.
    pub fn depth(&self) -> u32 {
        match self.origin {
            FactOrigin::Asserted => 0,
            FactOrigin::Derived { depth, .. } => depth,
        }
    }

    /// The rule that derived this fact, if any.
    pub fn derived_by(&self) -> Option<RuleId> {
        match self.origin {
            FactOrigin::Asserted => None,
            FactOrigin::Derived { rule, .. } => Some(rule),
        }
    }
}

fn check_confidence(confidence: f32) -> SeshatResult<()> {
    if !(0.0..=1.0).contains(&confidence) || confidence.is_nan() {
        return Err(FactError::InvalidConfidence { confidence }.into());
    }
    Ok(())
}

/// A partially-bound fact shape used for lookups.
///
/// `None` in a position means "match anything". The same pattern type serves
/// the fact store adapter and the working memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactPattern {
    Relationship {
        source: Option<EntityId>,
        relation: Option<String>,
        target: Option<EntityId>,
    },
    Property {
        entity: Option<EntityId>,
        name: Option<String>,
        value: Option<PropertyValue>,
    },
}

impl FactPattern {
    /// Match any relationship fact.
    pub fn any_relationship() -> Self {
        FactPattern::Relationship {
            source: None,
            relation: None,
            target: None,
        }
    }

    /// Match any property fact.
    pub fn any_property() -> Self {
        FactPattern::Property {
            entity: None,
            name: None,
            value: None,
        }
    }

    /// Whether the given body satisfies this pattern.
    pub fn matches(&self, body: &FactBody) -> bool {
        match (self, body) {
            (
                FactPattern::Relationship {
                    source: ps,
                    relation: pr,
                    target: pt,
                },
                FactBody::Relationship {
                    source,
                    relation,
                    target,
                },
            ) => {
                ps.as_ref().is_none_or(|s| s == source)
                    && pr.as_ref().is_none_or(|r| r == relation)
                    && pt.as_ref().is_none_or(|t| t == target)
            }
            (
                FactPattern::Property {
                    entity: pe,
                    name: pn,
                    value: pv,
                },
                FactBody::Property {
                    entity,
                    name,
                    value,
                },
            ) => {
                pe.as_ref().is_none_or(|e| e == entity)
                    && pn.as_ref().is_none_or(|n| n == name)
                    && pv.as_ref().is_none_or(|v| v == value)
            }
            _ => false,
        }
    }
}

/// Scope a fact, rule, or run belongs to. Determines store visibility and
/// which runs must be serialized against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Workspace(String),
    Project(String),
}

impl Scope {
    /// Whether content in `self` is visible to a run executing in `run_scope`.
    ///
    /// Global content is visible everywhere; workspace/project content only
    /// within the same scope.
    pub fn visible_to(&self, run_scope: &Scope) -> bool {
        matches!(self, Scope::Global) || self == run_scope
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Workspace(id) => write!(f, "workspace:{id}"),
            Scope::Project(id) => write!(f, "project:{id}"),
        }
    }
}

/// Thread-safe fact ID allocator.
///
/// Produces monotonically increasing IDs starting from 1.
/// Safe to share across threads via `Arc<AtomicFactIdAllocator>`.
#[derive(Debug)]
pub struct AtomicFactIdAllocator {
    next: AtomicU64,
}

impl AtomicFactIdAllocator {
    /// Create a new allocator that starts from ID 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create an allocator that resumes from a given ID.
    ///
    /// Useful when restoring state from the fact store.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start.max(1)),
        }
    }

    /// Allocate the next fact ID.
    ///
    /// Returns an error if the ID space is exhausted (after 2^64 - 1 allocations).
    pub fn next_id(&self) -> SeshatResult<FactId> {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        FactId::new(raw).ok_or_else(|| FactError::AllocatorExhausted.into())
    }

    /// Return the next ID that *would* be allocated, without consuming it.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AtomicFactIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
