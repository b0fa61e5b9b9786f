//! Metamorphic relations and the knowledge base that registers them.
//!
//! A [`Relation`] pairs one named transformation with a set of named
//! invariants. The [`KnowledgeBase`] owns the universe of registered
//! relations and guarantees at most one relation per transformation name:
//! registering the same transformation again with a new invariant adds that
//! invariant to the existing relation instead of creating a duplicate.
//!
//! Relations are keyed by caller-supplied names, not by function identity.
//! A blank name is rejected at registration time — there is nothing stable
//! to key the relation on.

use std::collections::HashMap;
use std::sync::Arc;

use ulid::Ulid;

use crate::{MorphoError, Result};

/// Stable per-session identifier for a registered transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformationId(pub String);

impl TransformationId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for TransformationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransformationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable per-session identifier for a registered invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvariantId(pub String);

impl InvariantId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for InvariantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named input transformation: maps an input to a modified input of the
/// same type.
///
/// The name is the transformation's identity within a session — two
/// registrations under the same name refer to the same transformation.
/// The optional category feeds the default compatibility predicate of the
/// exhaustive search strategy.
pub struct Transformation<T> {
    name: String,
    category: Option<String>,
    f: Arc<dyn Fn(&T) -> T + Send + Sync>,
}

impl<T> Transformation<T> {
    pub fn new(name: impl Into<String>, f: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            category: None,
            f: Arc::new(f),
        }
    }

    /// Tag this transformation with a category for compatibility-constrained
    /// search. Untagged transformations all share the `None` category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn apply(&self, data: &T) -> T {
        (self.f)(data)
    }
}

impl<T> Clone for Transformation<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            category: self.category.clone(),
            f: Arc::clone(&self.f),
        }
    }
}

impl<T> std::fmt::Debug for Transformation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformation")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// A named boolean predicate over two SUT outputs: `(current, previous)`.
///
/// An invariant holding means the transformation preserved the declared
/// relationship between outputs. A failing invariant is an expected,
/// recorded outcome — never an error.
pub struct Invariant<R> {
    name: String,
    f: Arc<dyn Fn(&R, &R) -> bool + Send + Sync>,
}

impl<R> Invariant<R> {
    pub fn new(name: impl Into<String>, f: impl Fn(&R, &R) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holds(&self, current: &R, previous: &R) -> bool {
        (self.f)(current, previous)
    }
}

impl<R> Clone for Invariant<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            f: Arc::clone(&self.f),
        }
    }
}

impl<R> std::fmt::Debug for Invariant<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invariant")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One transformation plus its associated invariants — the atomic unit of
/// metamorphic testing.
///
/// Invariants form a set keyed by [`InvariantId`]: adding the same invariant
/// id twice replaces the stored predicate (last registration wins) without
/// growing the set.
pub struct Relation<T, R> {
    transformation: Transformation<T>,
    transformation_id: TransformationId,
    invariant_order: Vec<InvariantId>,
    invariants: HashMap<InvariantId, Invariant<R>>,
}

impl<T, R> Relation<T, R> {
    fn new(transformation: Transformation<T>, transformation_id: TransformationId) -> Self {
        Self {
            transformation,
            transformation_id,
            invariant_order: Vec::new(),
            invariants: HashMap::new(),
        }
    }

    /// Add an invariant under its id. Re-adding an existing id replaces the
    /// predicate body; the set size and ordering are unchanged.
    pub fn add_invariant(&mut self, invariant: Invariant<R>, invariant_id: InvariantId) {
        if !self.invariants.contains_key(&invariant_id) {
            self.invariant_order.push(invariant_id.clone());
        }
        self.invariants.insert(invariant_id, invariant);
    }

    /// Apply this relation's transformation.
    pub fn apply(&self, data: &T) -> T {
        self.transformation.apply(data)
    }

    pub fn transformation_id(&self) -> &TransformationId {
        &self.transformation_id
    }

    pub fn name(&self) -> &str {
        self.transformation.name()
    }

    pub fn category(&self) -> Option<&str> {
        self.transformation.category()
    }

    /// Invariants in registration order.
    pub fn invariants(&self) -> impl Iterator<Item = (&InvariantId, &Invariant<R>)> {
        self.invariant_order
            .iter()
            .map(|id| (id, &self.invariants[id]))
    }

    pub fn invariant_count(&self) -> usize {
        self.invariant_order.len()
    }
}

impl<T, R> Clone for Relation<T, R> {
    fn clone(&self) -> Self {
        Self {
            transformation: self.transformation.clone(),
            transformation_id: self.transformation_id.clone(),
            invariant_order: self.invariant_order.clone(),
            invariants: self.invariants.clone(),
        }
    }
}

impl<T, R> std::fmt::Debug for Relation<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let invariant_names: Vec<&str> = self
            .invariants()
            .map(|(_, invariant)| invariant.name())
            .collect();
        f.debug_struct("Relation")
            .field("transformation", &self.transformation.name())
            .field("invariants", &invariant_names)
            .finish()
    }
}

/// The registry of all currently known relations.
///
/// Owned explicitly by the caller — there is no ambient process-wide
/// registry. Name→id maps and the relation set preserve registration order
/// so test output stays deterministic.
pub struct KnowledgeBase<T, R> {
    transformation_order: Vec<String>,
    transformations: HashMap<String, TransformationId>,
    invariant_order: Vec<String>,
    invariants: HashMap<String, InvariantId>,
    relation_order: Vec<TransformationId>,
    relations: HashMap<TransformationId, Relation<T, R>>,
}

impl<T, R> KnowledgeBase<T, R> {
    pub fn new() -> Self {
        Self {
            transformation_order: Vec::new(),
            transformations: HashMap::new(),
            invariant_order: Vec::new(),
            invariants: HashMap::new(),
            relation_order: Vec::new(),
            relations: HashMap::new(),
        }
    }

    /// Register a `(transformation, invariant)` pair.
    ///
    /// Looks up or creates the stable id for each name, then adds the
    /// invariant to the transformation's relation. The first registration of
    /// a transformation name fixes its function and category; an invariant
    /// re-registered under an existing name replaces the stored predicate
    /// (last registration wins).
    ///
    /// # Errors
    ///
    /// [`MorphoError::InvalidRelation`] when either name is empty or
    /// whitespace-only — a nameless function has no stable identity to key
    /// a relation on.
    pub fn register(
        &mut self,
        transformation: Transformation<T>,
        invariant: Invariant<R>,
    ) -> Result<()> {
        if transformation.name().trim().is_empty() || invariant.name().trim().is_empty() {
            return Err(MorphoError::InvalidRelation(
                "transformations and invariants must carry a non-empty name".to_string(),
            ));
        }

        let transformation_id = match self.transformations.get(transformation.name()) {
            Some(id) => id.clone(),
            None => {
                let id = TransformationId::new();
                self.transformation_order
                    .push(transformation.name().to_string());
                self.transformations
                    .insert(transformation.name().to_string(), id.clone());
                id
            }
        };
        let invariant_id = match self.invariants.get(invariant.name()) {
            Some(id) => id.clone(),
            None => {
                let id = InvariantId::new();
                self.invariant_order.push(invariant.name().to_string());
                self.invariants
                    .insert(invariant.name().to_string(), id.clone());
                id
            }
        };

        self.relations
            .entry(transformation_id.clone())
            .or_insert_with(|| {
                self.relation_order.push(transformation_id.clone());
                Relation::new(transformation, transformation_id)
            })
            .add_invariant(invariant, invariant_id);
        Ok(())
    }

    /// `(name, id)` pairs for every registered transformation, in
    /// registration order.
    pub fn transformation_ids(&self) -> impl Iterator<Item = (&str, &TransformationId)> {
        self.transformation_order
            .iter()
            .map(|name| (name.as_str(), &self.transformations[name]))
    }

    /// `(name, id)` pairs for every registered invariant, in registration
    /// order.
    pub fn invariant_ids(&self) -> impl Iterator<Item = (&str, &InvariantId)> {
        self.invariant_order
            .iter()
            .map(|name| (name.as_str(), &self.invariants[name]))
    }

    /// Registered relations in registration order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation<T, R>> {
        self.relation_order.iter().map(|id| &self.relations[id])
    }

    pub fn relation(&self, id: &TransformationId) -> Option<&Relation<T, R>> {
        self.relations.get(id)
    }

    pub fn len(&self) -> usize {
        self.relation_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relation_order.is_empty()
    }
}

impl<T, R> Default for KnowledgeBase<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R> std::fmt::Debug for KnowledgeBase<T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("relations", &self.transformation_order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> KnowledgeBase<i64, i64> {
        KnowledgeBase::new()
    }

    fn identity() -> Transformation<i64> {
        Transformation::new("identity", |x: &i64| *x)
    }

    fn inverse() -> Transformation<i64> {
        Transformation::new("inverse", |x: &i64| -x)
    }

    fn equals() -> Invariant<i64> {
        Invariant::new("equals", |current: &i64, previous: &i64| current == previous)
    }

    fn not_equals() -> Invariant<i64> {
        Invariant::new("not_equals", |current: &i64, previous: &i64| {
            current != previous
        })
    }

    #[test]
    fn register_creates_one_relation_per_transformation_name() {
        let mut base = kb();
        base.register(identity(), equals()).unwrap();
        base.register(inverse(), not_equals()).unwrap();
        base.register(identity(), not_equals()).unwrap();

        assert_eq!(base.len(), 2);
        let names: Vec<&str> = base.relations().map(|r| r.name()).collect();
        assert_eq!(names, vec!["identity", "inverse"]);
    }

    #[test]
    fn same_transformation_accumulates_invariants() {
        let mut base = kb();
        base.register(identity(), equals()).unwrap();
        base.register(
            identity(),
            Invariant::new("is_same_sign", |current: &i64, previous: &i64| {
                (*current >= 0) == (*previous >= 0)
            }),
        )
        .unwrap();

        let relation = base.relations().next().unwrap();
        assert_eq!(relation.invariant_count(), 2);
        let names: Vec<&str> = relation.invariants().map(|(_, i)| i.name()).collect();
        assert_eq!(names, vec!["equals", "is_same_sign"]);
    }

    #[test]
    fn reregistering_same_invariant_name_is_idempotent_in_size() {
        let mut base = kb();
        base.register(identity(), equals()).unwrap();
        base.register(identity(), equals()).unwrap();

        let relation = base.relations().next().unwrap();
        assert_eq!(relation.invariant_count(), 1);
    }

    #[test]
    fn last_registration_wins_for_same_invariant_name() {
        let mut base = kb();
        base.register(identity(), equals()).unwrap();
        // Same name, inverted body: the stored predicate must be replaced.
        base.register(
            identity(),
            Invariant::new("equals", |_: &i64, _: &i64| false),
        )
        .unwrap();

        let relation = base.relations().next().unwrap();
        assert_eq!(relation.invariant_count(), 1);
        let (_, invariant) = relation.invariants().next().unwrap();
        assert!(!invariant.holds(&1, &1));
    }

    #[test]
    fn blank_transformation_name_is_rejected() {
        let mut base = kb();
        let err = base
            .register(Transformation::new("  ", |x: &i64| *x), equals())
            .unwrap_err();
        assert!(matches!(err, MorphoError::InvalidRelation(_)));
        assert!(base.is_empty());
    }

    #[test]
    fn blank_invariant_name_is_rejected() {
        let mut base = kb();
        let err = base
            .register(identity(), Invariant::new("", |_: &i64, _: &i64| true))
            .unwrap_err();
        assert!(matches!(err, MorphoError::InvalidRelation(_)));
        assert!(base.is_empty());
    }

    #[test]
    fn ids_are_stable_across_repeated_registration() {
        let mut base = kb();
        base.register(identity(), equals()).unwrap();
        let first: Vec<(String, TransformationId)> = base
            .transformation_ids()
            .map(|(n, id)| (n.to_string(), id.clone()))
            .collect();

        base.register(identity(), not_equals()).unwrap();
        let second: Vec<(String, TransformationId)> = base
            .transformation_ids()
            .map(|(n, id)| (n.to_string(), id.clone()))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn first_transformation_registration_fixes_category() {
        let mut base = kb();
        base.register(identity().with_category("arith"), equals())
            .unwrap();
        base.register(identity().with_category("other"), not_equals())
            .unwrap();

        let relation = base.relations().next().unwrap();
        assert_eq!(relation.category(), Some("arith"));
    }
}
