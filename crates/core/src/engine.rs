//! Morpho — metamorphic-testing orchestration engine.
//!
//! Metamorphic testing checks a system under test (SUT) without a ground-
//! truth oracle: a [`Relation`] pairs a named input transformation with
//! invariants that must hold between the SUT's outputs before and after the
//! transformation. Relations are composed into ordered chains, each chain is
//! replayed against sample inputs, and every invariant that fails is
//! durably recorded.
//!
//! The [`KnowledgeBase`] registers relations, a [`SearchSpace`] generates
//! chains from it, and the [`Engine`] executes `(input, chain)` pairs across
//! a pool of worker threads, serializing all writes through a single owning
//! [`ResultStore`] handle. After execution the store converts wholesale into
//! an [`AnalyticalStore`] for aggregate queries.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use morpho::{Engine, EngineOptions, Invariant, KnowledgeBase, NullReporter,
//!              ResultStore, SearchSpace, SutError, Transformation};
//!
//! let mut base = KnowledgeBase::new();
//! base.register(
//!     Transformation::new("inverse", |x: &i64| -x),
//!     Invariant::new("equals", |current: &i64, previous: &i64| current == previous),
//! ).unwrap();
//!
//! let chains = SearchSpace::new(&base)
//!     .with_chain_length(4)
//!     .generate_chains(8)
//!     .unwrap();
//!
//! let store = ResultStore::create_in_memory(&base).unwrap();
//! let engine = Engine::new(
//!     store,
//!     |x: &i64| -> Result<i64, SutError> { Ok(x * x) },
//!     EngineOptions::default(),
//! );
//! engine.execute(&[3, -7], &chains, &mut NullReporter).unwrap();
//! let results = engine.into_analytical().unwrap();
//! println!("{:?}", results.failure_summary());
//! ```

pub mod relation;
pub mod search;
pub mod store;

use std::any::Any;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;

pub use relation::{Invariant, InvariantId, KnowledgeBase, Relation, Transformation, TransformationId};
pub use search::{Chain, MaximalChains, SearchSpace, SearchStrategy};
pub use store::{
    AnalyticalStore, AppliedView, ChainId, ChainRecord, FailureGroup, FailureView, InputId,
    LinkRecord, ResultStore, TableCounts,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MorphoError {
    /// A transformation or invariant was registered without a usable name.
    #[error("invalid relation: {0}")]
    InvalidRelation(String),
    /// The requested search strategy is reserved but not implemented.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// `run` was invoked against an empty knowledge base.
    #[error("no relations registered")]
    NoRelations,
    /// A store write referenced a row that does not exist.
    #[error("store integrity violation: {0}")]
    StoreIntegrity(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<redb::DatabaseError> for MorphoError {
    fn from(e: redb::DatabaseError) -> Self {
        MorphoError::Storage(e.to_string())
    }
}
impl From<redb::TransactionError> for MorphoError {
    fn from(e: redb::TransactionError) -> Self {
        MorphoError::Storage(e.to_string())
    }
}
impl From<redb::TableError> for MorphoError {
    fn from(e: redb::TableError) -> Self {
        MorphoError::Storage(e.to_string())
    }
}
impl From<redb::StorageError> for MorphoError {
    fn from(e: redb::StorageError) -> Self {
        MorphoError::Storage(e.to_string())
    }
}
impl From<redb::CommitError> for MorphoError {
    fn from(e: redb::CommitError) -> Self {
        MorphoError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MorphoError>;

// ---------------------------------------------------------------------------
// SUT interface
// ---------------------------------------------------------------------------

/// An abnormal SUT outcome: a returned error, a panic, or a timeout.
///
/// Never propagated as an engine error — it is recorded as a failure event
/// for the affected link and the chain continues.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SutError {
    message: String,
}

impl SutError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn timed_out() -> Self {
        Self::new("SUT call timed out")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The system under test: a shared, thread-safe function from input to
/// output. Slow and I/O-bound SUTs are expected; see
/// [`EngineOptions::sut_timeout`].
pub type Sut<T, R> = Arc<dyn Fn(&T) -> std::result::Result<R, SutError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Reporting interface
// ---------------------------------------------------------------------------

/// One observed failure: either invariants that returned false at a link,
/// or an abnormal SUT outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEvent {
    /// Relation at the failing link; `None` when the SUT failed on the
    /// unmodified base input, before any transformation was applied.
    pub relation: Option<String>,
    pub failed_invariants: Vec<String>,
    pub sut_error: Option<String>,
}

/// Progress callbacks consumed by a reporting collaborator.
///
/// Callbacks fire on the writer thread as results drain, so chains arrive
/// in completion order, not generation order.
pub trait Reporter {
    fn chain_started(&mut self, _chain_index: usize) {}
    fn link_tested(&mut self, _success: bool) {}
    fn run_finished(&mut self, _failures: &[FailureEvent]) {}
}

/// Reporter that ignores every callback.
pub struct NullReporter;

impl Reporter for NullReporter {}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker threads executing `(input, chain)` jobs.
    pub workers: usize,
    /// Per-SUT-call timeout. `None` means calls may block indefinitely.
    pub sut_timeout: Option<Duration>,
    /// Bound of the completed-chain channel between workers and the writer.
    pub channel_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            sut_timeout: None,
            channel_capacity: 8,
        }
    }
}

/// Summary of one `execute` call, also handed to
/// [`Reporter::run_finished`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub chains_executed: usize,
    pub links_executed: usize,
    pub failures: Vec<FailureEvent>,
}

/// One `(input, chain)` pair, processed to completion by exactly one worker.
struct Job {
    input_index: usize,
    chain_index: usize,
    input_id: InputId,
    chain_id: ChainId,
}

/// Per-link report for the progress callbacks.
struct LinkReport {
    relation: String,
    failed_invariants: Vec<String>,
    sut_error: Option<String>,
}

impl LinkReport {
    fn success(&self) -> bool {
        self.failed_invariants.is_empty() && self.sut_error.is_none()
    }
}

/// Everything one worker produced for one job, sent to the writer.
struct ChainOutcome {
    chain_index: usize,
    /// `None` when the SUT failed on the base input — there is no baseline
    /// to evaluate invariants against, so nothing is recorded for the chain.
    record: Option<ChainRecord>,
    links: Vec<LinkReport>,
    base_failure: Option<SutError>,
}

/// Orchestrates chain execution against the SUT.
///
/// Workers pull jobs from a shared queue and send completed
/// [`ChainOutcome`]s over a bounded channel to the caller's thread, which
/// owns the only open [`ResultStore`] handle, commits one transaction per
/// chain, and drives the [`Reporter`]. Workers share no mutable state.
pub struct Engine<T, R> {
    store: ResultStore,
    sut: Sut<T, R>,
    options: EngineOptions,
}

impl<T, R> Engine<T, R>
where
    T: Clone + Serialize + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(
        store: ResultStore,
        sut: impl Fn(&T) -> std::result::Result<R, SutError> + Send + Sync + 'static,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            sut: Arc::new(sut),
            options,
        }
    }

    /// Execute every `(input, chain)` pair of the cross product.
    ///
    /// Within one chain, links run strictly in order and every link is
    /// recorded with its zero-based `link_index`; across chains no ordering
    /// is guaranteed. Invariant failures never halt a chain.
    ///
    /// # Errors
    ///
    /// Storage and integrity errors are fatal; chains already committed
    /// before the failure remain recorded.
    pub fn execute(
        &self,
        inputs: &[T],
        chains: &[Chain<T, R>],
        reporter: &mut dyn Reporter,
    ) -> Result<ExecutionSummary> {
        let mut summary = ExecutionSummary::default();
        if inputs.is_empty() || chains.is_empty() {
            tracing::debug!("nothing to execute: empty inputs or chains");
            reporter.run_finished(&summary.failures);
            return Ok(summary);
        }

        // One input_data row per distinct input value, written before any
        // worker starts.
        let mut input_ids = Vec::with_capacity(inputs.len());
        for input in inputs {
            let blob = serde_json::to_vec(input)?;
            input_ids.push(self.store.insert_input(&blob)?);
        }

        let job_count = inputs.len() * chains.len();
        let workers = self.options.workers.clamp(1, job_count);
        tracing::info!(
            inputs = inputs.len(),
            chains = chains.len(),
            jobs = job_count,
            workers,
            "executing metamorphic chains"
        );

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        for chain_index in 0..chains.len() {
            for input_index in 0..inputs.len() {
                job_tx
                    .send(Job {
                        input_index,
                        chain_index,
                        input_id: input_ids[input_index].clone(),
                        chain_id: ChainId::new(),
                    })
                    .map_err(|_| MorphoError::Internal("job queue closed early".to_string()))?;
            }
        }
        drop(job_tx);

        // Shared receiver: faster workers pull more jobs.
        let jobs = Arc::new(Mutex::new(job_rx));
        let (outcome_tx, outcome_rx) =
            mpsc::sync_channel::<ChainOutcome>(self.options.channel_capacity.max(1));

        let shared_inputs: Arc<Vec<T>> = Arc::new(inputs.to_vec());
        let shared_chains: Arc<Vec<Chain<T, R>>> = Arc::new(chains.to_vec());

        let mut handles = Vec::with_capacity(workers);
        for worker_index in 0..workers {
            let jobs = Arc::clone(&jobs);
            let outcome_tx = outcome_tx.clone();
            let shared_inputs = Arc::clone(&shared_inputs);
            let shared_chains = Arc::clone(&shared_chains);
            let sut = Arc::clone(&self.sut);
            let timeout = self.options.sut_timeout;

            let handle = thread::Builder::new()
                .name(format!("morpho-worker-{worker_index}"))
                .spawn(move || loop {
                    let job = {
                        let Ok(guard) = jobs.lock() else { break };
                        match guard.recv() {
                            Ok(job) => job,
                            Err(_) => break,
                        }
                    };
                    let outcome = run_chain(
                        &sut,
                        timeout,
                        &shared_inputs[job.input_index],
                        &shared_chains[job.chain_index],
                        &job,
                    );
                    // The writer hanging up means execution is aborting.
                    if outcome_tx.send(outcome).is_err() {
                        break;
                    }
                })
                .map_err(|e| {
                    MorphoError::Internal(format!("failed to spawn worker thread: {e}"))
                })?;
            handles.push(handle);
        }
        drop(outcome_tx);

        // Single writer: this thread owns the only store handle and commits
        // one transaction per completed chain.
        let mut write_error = None;
        while let Ok(outcome) = outcome_rx.recv() {
            reporter.chain_started(outcome.chain_index);
            for link in &outcome.links {
                reporter.link_tested(link.success());
                summary.links_executed += 1;
                if !link.success() {
                    summary.failures.push(FailureEvent {
                        relation: Some(link.relation.clone()),
                        failed_invariants: link.failed_invariants.clone(),
                        sut_error: link.sut_error.clone(),
                    });
                }
            }
            if let Some(base_failure) = &outcome.base_failure {
                tracing::warn!(error = %base_failure, "SUT failed on base input; chain skipped");
                summary.failures.push(FailureEvent {
                    relation: None,
                    failed_invariants: Vec::new(),
                    sut_error: Some(base_failure.to_string()),
                });
            }
            if let Some(record) = &outcome.record {
                if let Err(e) = self.store.record_chain(record) {
                    write_error = Some(e);
                    break;
                }
                summary.chains_executed += 1;
            }
        }
        // Dropping the receiver unblocks any worker mid-send.
        drop(outcome_rx);

        for handle in handles {
            if handle.join().is_err() {
                write_error.get_or_insert_with(|| {
                    MorphoError::Internal("worker thread panicked".to_string())
                });
            }
        }
        if let Some(e) = write_error {
            return Err(e);
        }

        tracing::info!(
            chains = summary.chains_executed,
            links = summary.links_executed,
            failures = summary.failures.len(),
            "execution complete"
        );
        reporter.run_finished(&summary.failures);
        Ok(summary)
    }

    /// Convert the session's results into the analytical store, consuming
    /// the engine and its write path.
    pub fn into_analytical(self) -> Result<AnalyticalStore> {
        self.store.into_analytical()
    }
}

/// Replay one chain against the SUT.
///
/// The transformed value is threaded forward from link to link; outputs are
/// compared against the previous link's output (the base output for link 0).
/// Invariant failure is observational — data and output both advance
/// regardless, and the chain always runs to completion. A SUT failure at a
/// link records the applied transformation but skips invariant evaluation
/// for that link; later links compare against the last good output.
fn run_chain<T, R>(
    sut: &Sut<T, R>,
    timeout: Option<Duration>,
    input: &T,
    chain: &Chain<T, R>,
    job: &Job,
) -> ChainOutcome
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let mut previous_output = match invoke_sut(sut, timeout, input) {
        Ok(output) => output,
        Err(e) => {
            return ChainOutcome {
                chain_index: job.chain_index,
                record: None,
                links: Vec::new(),
                base_failure: Some(e),
            }
        }
    };

    let mut current_data = input.clone();
    let mut links = Vec::with_capacity(chain.len());
    let mut reports = Vec::with_capacity(chain.len());

    for (index, relation) in chain.iter().enumerate() {
        current_data = relation.apply(&current_data);

        let mut failed_ids = Vec::new();
        let mut failed_names = Vec::new();
        let mut sut_error = None;
        match invoke_sut(sut, timeout, &current_data) {
            Ok(next_output) => {
                for (invariant_id, invariant) in relation.invariants() {
                    if !invariant.holds(&next_output, &previous_output) {
                        failed_ids.push(invariant_id.clone());
                        failed_names.push(invariant.name().to_string());
                    }
                }
                previous_output = next_output;
            }
            Err(e) => sut_error = Some(e),
        }

        links.push(LinkRecord {
            transformation: relation.transformation_id().clone(),
            link_index: index as u32,
            failed_invariants: failed_ids,
        });
        reports.push(LinkReport {
            relation: relation.name().to_string(),
            failed_invariants: failed_names,
            sut_error: sut_error.map(|e| e.to_string()),
        });
    }

    ChainOutcome {
        chain_index: job.chain_index,
        record: Some(ChainRecord {
            chain_id: job.chain_id.clone(),
            input_id: job.input_id.clone(),
            links,
        }),
        links: reports,
        base_failure: None,
    }
}

fn invoke_sut<T, R>(
    sut: &Sut<T, R>,
    timeout: Option<Duration>,
    data: &T,
) -> std::result::Result<R, SutError>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    let Some(limit) = timeout else {
        return call_guarded(sut, data);
    };

    // The call runs on a watchdog thread so a hung SUT cannot hang the
    // worker. A timed-out call leaves the watchdog blocked until the SUT
    // returns; its send then fails silently against the dropped receiver.
    let (tx, rx) = mpsc::sync_channel(1);
    let sut = Arc::clone(sut);
    let data = data.clone();
    let spawned = thread::Builder::new()
        .name("morpho-sut-call".to_string())
        .spawn(move || {
            let _ = tx.send(call_guarded(&sut, &data));
        });
    if spawned.is_err() {
        return Err(SutError::new("failed to spawn SUT watchdog thread"));
    }

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(limit_ms = limit.as_millis() as u64, "SUT call timed out");
            Err(SutError::timed_out())
        }
    }
}

fn call_guarded<T, R>(sut: &Sut<T, R>, data: &T) -> std::result::Result<R, SutError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sut(data))) {
        Ok(result) => result,
        Err(payload) => Err(SutError::new(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("SUT panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("SUT panicked: {message}")
    } else {
        "SUT panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_negate_base() -> KnowledgeBase<i64, i64> {
        let mut base = KnowledgeBase::new();
        base.register(
            Transformation::new("identity", |x: &i64| *x),
            Invariant::new("equals", |c: &i64, p: &i64| c == p),
        )
        .unwrap();
        base.register(
            Transformation::new("negate", |x: &i64| -x),
            Invariant::new("not_equals", |c: &i64, p: &i64| c != p),
        )
        .unwrap();
        base
    }

    fn two_link_chain(base: &KnowledgeBase<i64, i64>) -> Chain<i64, i64> {
        base.relations().cloned().collect()
    }

    fn engine_for(
        base: &KnowledgeBase<i64, i64>,
        sut: impl Fn(&i64) -> std::result::Result<i64, SutError> + Send + Sync + 'static,
    ) -> Engine<i64, i64> {
        let store = ResultStore::create_in_memory(base).unwrap();
        Engine::new(store, sut, EngineOptions::default())
    }

    struct RecordingReporter {
        chains: usize,
        links: Vec<bool>,
        finished: usize,
    }

    impl RecordingReporter {
        fn new() -> Self {
            Self {
                chains: 0,
                links: Vec::new(),
                finished: 0,
            }
        }
    }

    impl Reporter for RecordingReporter {
        fn chain_started(&mut self, _chain_index: usize) {
            self.chains += 1;
        }
        fn link_tested(&mut self, success: bool) {
            self.links.push(success);
        }
        fn run_finished(&mut self, _failures: &[FailureEvent]) {
            self.finished += 1;
        }
    }

    #[test]
    fn successful_relation_chain_records_ordered_links_and_no_failures() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        let engine = engine_for(&base, |x: &i64| Ok(*x));

        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.chains_executed, 1);
        assert_eq!(summary.links_executed, 2);
        assert!(summary.failures.is_empty());

        let results = engine.into_analytical().unwrap();
        let applied = results.applied_transformations();
        let named: Vec<(&str, u32)> = applied
            .iter()
            .map(|a| (a.transformation_name.as_str(), a.link_index))
            .collect();
        assert_eq!(named, vec![("identity", 0), ("negate", 1)]);
        assert_eq!(results.table_counts().failed_invariant, 0);

        // The stored blob round-trips to the original input.
        let input_id: Vec<&str> = results.input_ids().collect();
        assert_eq!(input_id.len(), 1);
        let blob = results.input(input_id[0]).unwrap();
        let restored: i64 = serde_json::from_slice(blob).unwrap();
        assert_eq!(restored, 41);
    }

    #[test]
    fn failing_invariant_is_recorded_against_the_failing_link_only() {
        let mut base = KnowledgeBase::new();
        base.register(
            Transformation::new("identity", |x: &i64| *x),
            Invariant::new("equals", |c: &i64, p: &i64| c == p),
        )
        .unwrap();
        base.register(
            Transformation::new("negate", |x: &i64| -x),
            Invariant::new("equals", |c: &i64, p: &i64| c == p),
        )
        .unwrap();
        let chain = two_link_chain(&base);

        // SUT negates: link 0 passes (-x == -x), link 1 fails (x != -x).
        let engine = engine_for(&base, |x: &i64| Ok(-x));
        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].relation.as_deref(), Some("negate"));

        let results = engine.into_analytical().unwrap();
        let failures = results.failed_invariants();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].transformation_name, "negate");
        assert_eq!(failures[0].invariant_name, "equals");
        assert_eq!(failures[0].link_index, 1);
    }

    #[test]
    fn chain_continues_after_invariant_failure() {
        let mut base = KnowledgeBase::new();
        base.register(
            Transformation::new("negate", |x: &i64| -x),
            Invariant::new("never_holds", |_: &i64, _: &i64| false),
        )
        .unwrap();
        let relation = base.relations().next().unwrap().clone();
        let chain: Chain<i64, i64> = vec![relation.clone(), relation.clone(), relation];

        let engine = engine_for(&base, |x: &i64| Ok(*x));
        let summary = engine.execute(&[5], &[chain], &mut NullReporter).unwrap();

        // Every link ran and every link failed — failure is observational.
        assert_eq!(summary.links_executed, 3);
        assert_eq!(summary.failures.len(), 3);
        let results = engine.into_analytical().unwrap();
        assert_eq!(results.table_counts().applied_transformation, 3);
        assert_eq!(results.table_counts().failed_invariant, 3);
    }

    #[test]
    fn identical_inputs_share_one_input_data_row() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        let engine = engine_for(&base, |x: &i64| Ok(*x));

        engine
            .execute(&[41, 41, 7], &[chain], &mut NullReporter)
            .unwrap();
        let results = engine.into_analytical().unwrap();
        assert_eq!(results.table_counts().input_data, 2);
    }

    #[test]
    fn cross_product_runs_under_parallel_workers() {
        let base = identity_negate_base();
        let chains: Vec<Chain<i64, i64>> = (0..4).map(|_| two_link_chain(&base)).collect();
        let store = ResultStore::create_in_memory(&base).unwrap();
        let engine = Engine::new(
            store,
            |x: &i64| Ok(*x),
            EngineOptions {
                workers: 4,
                ..EngineOptions::default()
            },
        );

        let mut reporter = RecordingReporter::new();
        let summary = engine.execute(&[1, 2, 3], &chains, &mut reporter).unwrap();

        // 3 inputs × 4 chains, 2 links each.
        assert_eq!(summary.chains_executed, 12);
        assert_eq!(summary.links_executed, 24);
        assert_eq!(reporter.chains, 12);
        assert_eq!(reporter.links.len(), 24);
        assert_eq!(reporter.finished, 1);

        let results = engine.into_analytical().unwrap();
        assert_eq!(results.table_counts().applied_transformation, 24);
        // Every (input, chain) pair produced its own relation_chain_id.
        assert_eq!(results.chain_ids().len(), 12);
    }

    #[test]
    fn sut_error_is_recorded_and_the_chain_continues() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        // Fails only on the negated value (link 1 input is -41).
        let engine = engine_for(&base, |x: &i64| {
            if *x < 0 {
                Err(SutError::new("backend unavailable"))
            } else {
                Ok(*x)
            }
        });

        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(
            summary.failures[0].sut_error.as_deref(),
            Some("backend unavailable")
        );

        // The applied transformation is still recorded; no invariant rows
        // exist because invariants were never evaluated for that link.
        let results = engine.into_analytical().unwrap();
        assert_eq!(results.table_counts().applied_transformation, 2);
        assert_eq!(results.table_counts().failed_invariant, 0);
    }

    #[test]
    fn sut_failure_on_base_input_skips_the_chain() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        let engine = engine_for(&base, |_: &i64| {
            Err(SutError::new("always down"))
        });

        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.chains_executed, 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].relation, None);

        let results = engine.into_analytical().unwrap();
        assert_eq!(results.table_counts().applied_transformation, 0);
    }

    #[test]
    fn panicking_sut_is_converted_to_a_failure_event() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        let engine = engine_for(&base, |x: &i64| {
            if *x < 0 {
                panic!("boom");
            }
            Ok(*x)
        });

        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0]
            .sut_error
            .as_deref()
            .unwrap()
            .contains("boom"));
    }

    #[test]
    fn hung_sut_times_out_with_the_defined_failure_record() {
        let base = identity_negate_base();
        let chain = two_link_chain(&base);
        let store = ResultStore::create_in_memory(&base).unwrap();
        let engine = Engine::new(
            store,
            |x: &i64| {
                if *x < 0 {
                    thread::sleep(Duration::from_secs(5));
                }
                Ok(*x)
            },
            EngineOptions {
                workers: 1,
                sut_timeout: Some(Duration::from_millis(50)),
                ..EngineOptions::default()
            },
        );

        let summary = engine
            .execute(&[41], &[chain], &mut NullReporter)
            .unwrap();
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(
            summary.failures[0].sut_error.as_deref(),
            Some("SUT call timed out")
        );
    }

    #[test]
    fn empty_inputs_and_chains_execute_to_an_empty_summary() {
        let base = identity_negate_base();
        let engine = engine_for(&base, |x: &i64| Ok(*x));
        let summary = engine.execute(&[], &[], &mut NullReporter).unwrap();
        assert_eq!(summary.chains_executed, 0);
        assert_eq!(summary.links_executed, 0);
    }
}
