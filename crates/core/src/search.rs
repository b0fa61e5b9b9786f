//! Chain generation over a knowledge base.
//!
//! A chain is an ordered sequence of relations applied successively to an
//! input. [`SearchSpace`] produces chains under one of three strategies:
//!
//! - [`SearchStrategy::Random`] — fixed-length chains drawn uniformly with
//!   replacement from the full relation set. No compatibility constraint.
//! - [`SearchStrategy::Exhaustive`] — maximal simple paths through a
//!   compatibility graph, found by depth-first backtracking. A relation is
//!   never revisited within one path, and a path is recorded only when no
//!   compatible unvisited successor remains.
//! - [`SearchStrategy::Dynamic`] — reserved for outcome-driven selection.
//!   Unimplemented: generation fails rather than silently falling back.
//!
//! Exhaustive search can yield combinatorially many chains, so it is also
//! exposed as the lazy [`MaximalChains`] iterator.

use std::sync::Arc;

use rand::Rng;

use crate::relation::{KnowledgeBase, Relation};
use crate::{MorphoError, Result};

/// Possible search strategies when creating metamorphic relation chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Random,
    Exhaustive,
    Dynamic,
}

/// An ordered sequence of relations applied successively to an input.
pub type Chain<T, R> = Vec<Relation<T, R>>;

/// Ordered compatibility predicate for exhaustive search: `pred(a, b)` means
/// `b` may follow `a` in a chain. Not required to be symmetric.
pub type CompatibilityFn<T, R> = Arc<dyn Fn(&Relation<T, R>, &Relation<T, R>) -> bool + Send + Sync>;

const DEFAULT_CHAIN_LENGTH: usize = 10;

/// A handle to interact with the search space for a knowledge base.
pub struct SearchSpace<'kb, T, R> {
    knowledge_base: &'kb KnowledgeBase<T, R>,
    strategy: SearchStrategy,
    chain_length: usize,
    compatibility: Option<CompatibilityFn<T, R>>,
}

impl<'kb, T, R> SearchSpace<'kb, T, R> {
    /// Defaults to the random strategy with chains of ten links.
    pub fn new(knowledge_base: &'kb KnowledgeBase<T, R>) -> Self {
        Self {
            knowledge_base,
            strategy: SearchStrategy::Random,
            chain_length: DEFAULT_CHAIN_LENGTH,
            compatibility: None,
        }
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Chain length used by the random strategy. Exhaustive chains take
    /// their length from the compatibility graph instead.
    pub fn with_chain_length(mut self, chain_length: usize) -> Self {
        self.chain_length = chain_length;
        self
    }

    /// Replace the default same-category predicate for exhaustive search.
    pub fn with_compatibility(
        mut self,
        predicate: impl Fn(&Relation<T, R>, &Relation<T, R>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.compatibility = Some(Arc::new(predicate));
        self
    }

    /// Generate metamorphic chains based on the configured search strategy.
    ///
    /// Random generation returns exactly `num_chains` chains of exactly the
    /// configured length. Exhaustive generation ignores `num_chains` and
    /// returns every maximal path from every starting relation, in
    /// registration order of the starts.
    ///
    /// # Errors
    ///
    /// [`MorphoError::NoRelations`] when the knowledge base is empty,
    /// [`MorphoError::NotSupported`] for the dynamic strategy.
    pub fn generate_chains(&self, num_chains: usize) -> Result<Vec<Chain<T, R>>> {
        if self.knowledge_base.is_empty() {
            return Err(MorphoError::NoRelations);
        }
        match self.strategy {
            SearchStrategy::Random => Ok(self.random_chains(num_chains)),
            SearchStrategy::Exhaustive => Ok(self.maximal_chains().collect()),
            SearchStrategy::Dynamic => Err(MorphoError::NotSupported(
                "dynamic search strategy is reserved and not implemented".to_string(),
            )),
        }
    }

    fn random_chains(&self, num_chains: usize) -> Vec<Chain<T, R>> {
        let relations: Vec<&Relation<T, R>> = self.knowledge_base.relations().collect();
        let mut rng = rand::thread_rng();
        (0..num_chains)
            .map(|_| {
                (0..self.chain_length)
                    .map(|_| Relation::clone(relations[rng.gen_range(0..relations.len())]))
                    .collect()
            })
            .collect()
    }

    /// Lazily iterate every maximal simple path through the compatibility
    /// graph, starting from each relation in registration order.
    pub fn maximal_chains(&self) -> MaximalChains<'_, T, R> {
        let relations: Vec<&Relation<T, R>> = self.knowledge_base.relations().collect();
        let compatible = |a: &Relation<T, R>, b: &Relation<T, R>| match &self.compatibility {
            Some(predicate) => predicate(a, b),
            None => a.category() == b.category(),
        };

        // Adjacency by index; a relation is never its own successor.
        let successors: Vec<Vec<usize>> = (0..relations.len())
            .map(|i| {
                (0..relations.len())
                    .filter(|&j| j != i && compatible(relations[i], relations[j]))
                    .collect()
            })
            .collect();

        MaximalChains {
            relations,
            successors,
            next_start: 0,
            stack: Vec::new(),
            path: Vec::new(),
            visited: vec![false; self.knowledge_base.len()],
        }
    }
}

struct Frame {
    node: usize,
    /// Cursor into `successors[node]`.
    next: usize,
    /// Set when the node was entered with no unvisited compatible successor;
    /// the path ending here is maximal and must be emitted once.
    emit: bool,
}

/// Iterator over maximal simple paths, produced on demand.
///
/// Depth-first backtracking with an explicit stack: the recursion of the
/// textbook formulation is replaced by `stack` + `path` + `visited` so large
/// knowledge bases cannot overflow the call stack. Backtracking unmarks the
/// node and truncates the path, leaving sibling branches unaffected.
pub struct MaximalChains<'kb, T, R> {
    relations: Vec<&'kb Relation<T, R>>,
    successors: Vec<Vec<usize>>,
    next_start: usize,
    stack: Vec<Frame>,
    path: Vec<usize>,
    visited: Vec<bool>,
}

impl<'kb, T, R> MaximalChains<'kb, T, R> {
    fn push_node(&mut self, node: usize) {
        self.visited[node] = true;
        self.path.push(node);
        let emit = self.successors[node]
            .iter()
            .all(|&succ| self.visited[succ]);
        self.stack.push(Frame {
            node,
            next: 0,
            emit,
        });
    }

    fn current_chain(&self) -> Chain<T, R> {
        self.path
            .iter()
            .map(|&i| Relation::clone(self.relations[i]))
            .collect()
    }
}

impl<'kb, T, R> Iterator for MaximalChains<'kb, T, R> {
    type Item = Chain<T, R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stack.is_empty() {
                if self.next_start >= self.relations.len() {
                    return None;
                }
                let start = self.next_start;
                self.next_start += 1;
                self.push_node(start);
                continue;
            }

            let emit_now = {
                let top = self.stack.last_mut().expect("stack is non-empty");
                if top.emit {
                    top.emit = false;
                    true
                } else {
                    false
                }
            };
            if emit_now {
                return Some(self.current_chain());
            }

            // Descend into the next unvisited successor, if any.
            let descend = loop {
                let top = self.stack.last_mut().expect("stack is non-empty");
                let candidates = &self.successors[top.node];
                if top.next >= candidates.len() {
                    break None;
                }
                let succ = candidates[top.next];
                top.next += 1;
                if !self.visited[succ] {
                    break Some(succ);
                }
            };

            match descend {
                Some(succ) => self.push_node(succ),
                None => {
                    // All successors explored: backtrack.
                    let frame = self.stack.pop().expect("stack is non-empty");
                    self.visited[frame.node] = false;
                    self.path.pop();
                }
            }
        }
    }
}
