//! High-level metamorphic test sessions built on Morpho.
//!
//! A [`Session`] is the explicit context object a test author registers
//! relations into and runs the system under test against. Construction and
//! lifetime belong to the caller — there is no process-wide registry to
//! reset between tests.
//!
//! # Usage
//!
//! ```rust,no_run
//! use morpho_harness::{RunOptions, Session};
//! use morpho::{Invariant, SutError, Transformation};
//!
//! let mut session = Session::new();
//! session.register(
//!     Transformation::new("inverse", |x: &i64| -x),
//!     Invariant::new("not_equals", |current: &i64, previous: &i64| current != previous),
//! ).unwrap();
//!
//! let report = session.run(
//!     |x: &i64| -> Result<i64, SutError> { Ok(*x) },
//!     &[3, -7, 0],
//!     RunOptions::default(),
//! ).unwrap();
//! assert_eq!(report.chains_executed, 30);
//! ```

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use morpho::{
    AnalyticalStore, Engine, EngineOptions, FailureEvent, Invariant, KnowledgeBase, Reporter,
    ResultStore, SearchSpace, SearchStrategy, SutError, Transformation,
};
use serde::Serialize;

pub use morpho::MorphoError as Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Verbosity levels gating which reporting callbacks produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent,
    Failure,
    All,
}

/// Knobs for one `run` invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub strategy: SearchStrategy,
    /// Links per chain under the random strategy.
    pub chain_length: usize,
    /// Chains to generate under the random strategy; ignored by exhaustive
    /// search, which returns every maximal path.
    pub num_chains: usize,
    pub workers: usize,
    pub sut_timeout: Option<Duration>,
    pub verbosity: Verbosity,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            strategy: SearchStrategy::Random,
            chain_length: 10,
            num_chains: 10,
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            sut_timeout: None,
            verbosity: Verbosity::Failure,
        }
    }
}

/// Everything a finished run leaves behind: the analytical store for
/// aggregate queries plus the failure summary the reporter printed.
#[derive(Debug)]
pub struct RunReport {
    pub results: AnalyticalStore,
    pub failures: Vec<FailureEvent>,
    pub chains_executed: usize,
    pub links_executed: usize,
}

/// An explicit metamorphic test session: a knowledge base plus the
/// orchestration to execute it.
pub struct Session<T, R> {
    knowledge_base: KnowledgeBase<T, R>,
}

impl<T, R> Session<T, R>
where
    T: Clone + Serialize + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            knowledge_base: KnowledgeBase::new(),
        }
    }

    /// Register a metamorphic relation into this session's knowledge base.
    pub fn register(
        &mut self,
        transformation: Transformation<T>,
        invariant: Invariant<R>,
    ) -> Result<()> {
        self.knowledge_base.register(transformation, invariant)
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase<T, R> {
        &self.knowledge_base
    }

    /// Generate chains, execute them against the SUT, and report to the
    /// terminal at the configured verbosity.
    ///
    /// The transactional store lives in a temporary directory for the
    /// duration of the run and is discarded after conversion — only the
    /// returned [`AnalyticalStore`] survives.
    pub fn run(
        &self,
        sut: impl Fn(&T) -> std::result::Result<R, SutError> + Send + Sync + 'static,
        dataset: &[T],
        options: RunOptions,
    ) -> Result<RunReport> {
        let mut reporter = TerminalReporter::new(options.verbosity);
        reporter.print_header(options.strategy, options.chain_length, options.num_chains);
        self.run_with_reporter(sut, dataset, options, &mut reporter)
    }

    /// `run` with a caller-supplied reporting collaborator.
    pub fn run_with_reporter(
        &self,
        sut: impl Fn(&T) -> std::result::Result<R, SutError> + Send + Sync + 'static,
        dataset: &[T],
        options: RunOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        if self.knowledge_base.is_empty() {
            return Err(Error::NoRelations);
        }

        let chains = SearchSpace::new(&self.knowledge_base)
            .with_strategy(options.strategy)
            .with_chain_length(options.chain_length)
            .generate_chains(options.num_chains)?;

        tracing::info!(
            strategy = ?options.strategy,
            chains = chains.len(),
            inputs = dataset.len(),
            "starting metamorphic test session"
        );

        let dir = tempfile::tempdir().map_err(|e| Error::Storage(e.to_string()))?;
        let store = ResultStore::create(&dir.path().join("session.morpho"), &self.knowledge_base)?;
        let engine = Engine::new(
            store,
            sut,
            EngineOptions {
                workers: options.workers,
                sut_timeout: options.sut_timeout,
                ..EngineOptions::default()
            },
        );

        let summary = engine.execute(dataset, &chains, reporter)?;
        let results = engine.into_analytical()?;

        Ok(RunReport {
            results,
            failures: summary.failures,
            chains_executed: summary.chains_executed,
            links_executed: summary.links_executed,
        })
    }
}

impl<T, R> Default for Session<T, R>
where
    T: Clone + Serialize + Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

const RULE_WIDTH: usize = 80;

/// Terminal progress writer: a `.`/`F` glyph per tested link and a summary
/// of failed relations once the run finishes.
///
/// `Verbosity::All` is reserved for per-link detail; until that lands it
/// renders the same as `Verbosity::Failure`.
pub struct TerminalReporter<W: Write> {
    verbosity: Verbosity,
    out: W,
}

impl TerminalReporter<io::Stdout> {
    pub fn new(verbosity: Verbosity) -> Self {
        Self::with_writer(verbosity, io::stdout())
    }
}

impl<W: Write> TerminalReporter<W> {
    pub fn with_writer(verbosity: Verbosity, out: W) -> Self {
        Self { verbosity, out }
    }

    pub fn print_header(&mut self, strategy: SearchStrategy, chain_length: usize, num_chains: usize) {
        if self.verbosity < Verbosity::Failure {
            return;
        }
        let _ = writeln!(self.out, "morpho · metamorphic test session");
        let _ = writeln!(self.out, "Search Strategy: {strategy:?}");
        let _ = writeln!(self.out, "Chain Length: {chain_length}");
        let _ = writeln!(self.out, "Num Chains: {num_chains}");
        let _ = writeln!(self.out);
    }
}

impl<W: Write> Reporter for TerminalReporter<W> {
    fn link_tested(&mut self, success: bool) {
        if self.verbosity < Verbosity::Failure {
            return;
        }
        let glyph = if success { "." } else { "F" };
        let _ = write!(self.out, "{glyph}");
        let _ = self.out.flush();
    }

    fn run_finished(&mut self, failures: &[FailureEvent]) {
        if self.verbosity < Verbosity::Failure {
            return;
        }
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "{}", "=".repeat(RULE_WIDTH));
        for failure in failures {
            match (&failure.relation, &failure.sut_error) {
                (Some(relation), None) => {
                    let _ = writeln!(self.out, "Failed Relation: {relation}");
                    let _ = writeln!(
                        self.out,
                        "Failed Invariants: {:?}",
                        failure.failed_invariants
                    );
                }
                (Some(relation), Some(error)) => {
                    let _ = writeln!(self.out, "Failed Relation: {relation}");
                    let _ = writeln!(self.out, "SUT Error: {error}");
                }
                (None, error) => {
                    let _ = writeln!(
                        self.out,
                        "SUT Error on base input: {}",
                        error.as_deref().unwrap_or("unknown")
                    );
                }
            }
            let _ = writeln!(self.out, "{}", "=".repeat(RULE_WIDTH));
        }
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arithmetic_session() -> Session<i64, i64> {
        let mut session = Session::new();
        session
            .register(
                Transformation::new("identity", |x: &i64| *x),
                Invariant::new("equals", |c: &i64, p: &i64| c == p),
            )
            .unwrap();
        session
            .register(
                Transformation::new("inverse", |x: &i64| -x),
                Invariant::new("not_equals", |c: &i64, p: &i64| c != p),
            )
            .unwrap();
        session
    }

    struct RecordingReporter {
        chains: usize,
        links: usize,
        finishes: usize,
    }

    impl Reporter for RecordingReporter {
        fn chain_started(&mut self, _chain_index: usize) {
            self.chains += 1;
        }
        fn link_tested(&mut self, _success: bool) {
            self.links += 1;
        }
        fn run_finished(&mut self, _failures: &[FailureEvent]) {
            self.finishes += 1;
        }
    }

    #[test]
    fn run_without_relations_is_an_error() {
        let session: Session<i64, i64> = Session::new();
        let err = session
            .run_with_reporter(
                |x: &i64| Ok(*x),
                &[1],
                RunOptions::default(),
                &mut morpho::NullReporter,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoRelations));
        assert_eq!(err.to_string(), "no relations registered");
    }

    #[test]
    fn run_executes_the_full_cross_product() {
        let session = arithmetic_session();
        let options = RunOptions {
            chain_length: 3,
            num_chains: 4,
            verbosity: Verbosity::Silent,
            ..RunOptions::default()
        };

        let mut reporter = RecordingReporter {
            chains: 0,
            links: 0,
            finishes: 0,
        };
        let report = session
            .run_with_reporter(|x: &i64| Ok(*x * 2), &[5, 9], options, &mut reporter)
            .unwrap();

        // 2 inputs × 4 chains of 3 links.
        assert_eq!(report.chains_executed, 8);
        assert_eq!(report.links_executed, 24);
        assert_eq!(reporter.chains, 8);
        assert_eq!(reporter.links, 24);
        assert_eq!(reporter.finishes, 1);
        assert_eq!(report.results.table_counts().applied_transformation, 24);
    }

    #[test]
    fn buggy_sut_surfaces_failures_in_the_report() {
        let mut session = Session::new();
        session
            .register(
                Transformation::new("inverse", |x: &i64| -x),
                Invariant::new("not_equals", |c: &i64, p: &i64| c != p),
            )
            .unwrap();

        // Absolute value collapses x and -x: not_equals fails at every link.
        let report = session
            .run(
                |x: &i64| Ok(x.abs()),
                &[17],
                RunOptions {
                    chain_length: 2,
                    num_chains: 1,
                    verbosity: Verbosity::Silent,
                    ..RunOptions::default()
                },
            )
            .unwrap();

        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.relation.as_deref() == Some("inverse")));
        assert_eq!(report.results.table_counts().failed_invariant, 2);
    }

    #[test]
    fn exhaustive_strategy_runs_every_maximal_path() {
        let session = arithmetic_session();
        let report = session
            .run_with_reporter(
                |x: &i64| Ok(*x),
                &[1],
                RunOptions {
                    strategy: SearchStrategy::Exhaustive,
                    verbosity: Verbosity::Silent,
                    ..RunOptions::default()
                },
                &mut morpho::NullReporter,
            )
            .unwrap();

        // Two fully compatible relations: identity→inverse and inverse→identity.
        assert_eq!(report.chains_executed, 2);
        assert_eq!(report.links_executed, 4);
    }

    #[test]
    fn dynamic_strategy_fails_rather_than_falling_back() {
        let session = arithmetic_session();
        let err = session
            .run_with_reporter(
                |x: &i64| Ok(*x),
                &[1],
                RunOptions {
                    strategy: SearchStrategy::Dynamic,
                    ..RunOptions::default()
                },
                &mut morpho::NullReporter,
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }

    #[test]
    fn silent_reporter_writes_nothing() {
        let mut reporter = TerminalReporter::with_writer(Verbosity::Silent, Vec::new());
        reporter.print_header(SearchStrategy::Random, 10, 10);
        reporter.link_tested(false);
        reporter.run_finished(&[FailureEvent {
            relation: Some("inverse".to_string()),
            failed_invariants: vec!["not_equals".to_string()],
            sut_error: None,
        }]);
        assert!(reporter.out.is_empty());
    }

    #[test]
    fn failure_verbosity_prints_glyphs_and_summary() {
        let mut reporter = TerminalReporter::with_writer(Verbosity::Failure, Vec::new());
        reporter.print_header(SearchStrategy::Random, 5, 2);
        reporter.link_tested(true);
        reporter.link_tested(false);
        reporter.run_finished(&[FailureEvent {
            relation: Some("inverse".to_string()),
            failed_invariants: vec!["not_equals".to_string()],
            sut_error: None,
        }]);

        let output = String::from_utf8(reporter.out.clone()).unwrap();
        assert!(output.contains("Search Strategy: Random"));
        assert!(output.contains(".F"));
        assert!(output.contains("Failed Relation: inverse"));
        assert!(output.contains("not_equals"));
    }
}
