//! Durable recording of chain executions.
//!
//! Two tiers share one six-table schema. [`ResultStore`] is the
//! transactional write path (backed by `redb`): rows land incrementally
//! during execution, one atomic commit per executed chain. After execution
//! finishes the whole schema is bulk-converted into an [`AnalyticalStore`],
//! an in-memory columnar copy built for the scan-heavy aggregate queries the
//! row-oriented write path handles poorly. The redb file is the source of
//! truth until conversion; the store is scoped to one test session and
//! discarded afterwards.
//!
//! Transformed intermediate data is never persisted — only the base input
//! blob and the ordered transformation ids are stored, so any intermediate
//! value can be reconstructed by replaying the chain against the base input.
//!
//! Table and column names are stable: existing analysis tooling joins on
//! `transformation(id, name)`, `invariant(id, name)`,
//! `relation(transformation, invariant)`, `input_data(id, obj)`,
//! `applied_transformation(id, transformation, relation_chain_id,
//! link_index, created_at)` and `failed_invariant(id, invariant,
//! applied_transformation, input_data)`.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::relation::{InvariantId, KnowledgeBase, TransformationId};
use crate::{MorphoError, Result};

/// Rows are JSON-encoded structs keyed by their `id` column.
const TRANSFORMATION: TableDefinition<&str, &str> = TableDefinition::new("transformation");
const INVARIANT: TableDefinition<&str, &str> = TableDefinition::new("invariant");
/// Composite string key: `"{transformation}:{invariant}"`.
const RELATION: TableDefinition<&str, &str> = TableDefinition::new("relation");
/// Raw serialized input blob keyed by input id.
const INPUT_DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("input_data");
const APPLIED_TRANSFORMATION: TableDefinition<&str, &str> =
    TableDefinition::new("applied_transformation");
const FAILED_INVARIANT: TableDefinition<&str, &str> = TableDefinition::new("failed_invariant");

/// Identity of one chain execution: every `(input, chain)` pair gets its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one distinct input value, stored once per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId(pub String);

impl InputId {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl Default for InputId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransformationRow {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InvariantRow {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationRow {
    transformation: String,
    invariant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AppliedTransformationRow {
    id: String,
    transformation: String,
    relation_chain_id: String,
    link_index: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FailedInvariantRow {
    id: String,
    invariant: String,
    applied_transformation: String,
    input_data: String,
}

/// One executed link, ready to be recorded.
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub transformation: TransformationId,
    pub link_index: u32,
    /// Invariants that returned false at this link. Empty means every
    /// invariant passed — passes are implied by the absence of rows.
    pub failed_invariants: Vec<InvariantId>,
}

/// The complete record set for one `(input, chain)` execution.
#[derive(Debug, Clone)]
pub struct ChainRecord {
    pub chain_id: ChainId,
    pub input_id: InputId,
    pub links: Vec<LinkRecord>,
}

/// Row counts for every table in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableCounts {
    pub transformation: u64,
    pub invariant: u64,
    pub relation: u64,
    pub input_data: u64,
    pub applied_transformation: u64,
    pub failed_invariant: u64,
}

/// Transactional (OLTP) record of chain executions.
///
/// A single-writer resource: all writes must go through one owning handle.
/// Each recorded chain commits in one write transaction, so an interrupted
/// run can never leave a `failed_invariant` row referencing a missing
/// `applied_transformation`.
pub struct ResultStore {
    db: Database,
}

impl ResultStore {
    /// Create the store at `path` and seed the static relation graph
    /// (`transformation`, `invariant`, `relation`) from the knowledge base.
    pub fn create<T, R>(path: &Path, knowledge_base: &KnowledgeBase<T, R>) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db, knowledge_base)
    }

    /// In-memory variant (no file I/O); data is lost on drop.
    pub fn create_in_memory<T, R>(knowledge_base: &KnowledgeBase<T, R>) -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db, knowledge_base)
    }

    fn init<T, R>(db: Database, knowledge_base: &KnowledgeBase<T, R>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        {
            let mut transformation_table = write_txn.open_table(TRANSFORMATION)?;
            for (name, id) in knowledge_base.transformation_ids() {
                let row = TransformationRow {
                    id: id.0.clone(),
                    name: name.to_string(),
                };
                transformation_table.insert(id.0.as_str(), serde_json::to_string(&row)?.as_str())?;
            }

            let mut invariant_table = write_txn.open_table(INVARIANT)?;
            for (name, id) in knowledge_base.invariant_ids() {
                let row = InvariantRow {
                    id: id.0.clone(),
                    name: name.to_string(),
                };
                invariant_table.insert(id.0.as_str(), serde_json::to_string(&row)?.as_str())?;
            }

            let mut relation_table = write_txn.open_table(RELATION)?;
            for relation in knowledge_base.relations() {
                for (invariant_id, _) in relation.invariants() {
                    let row = RelationRow {
                        transformation: relation.transformation_id().0.clone(),
                        invariant: invariant_id.0.clone(),
                    };
                    let key = format!("{}:{}", relation.transformation_id(), invariant_id);
                    relation_table.insert(key.as_str(), serde_json::to_string(&row)?.as_str())?;
                }
            }

            write_txn.open_table(INPUT_DATA)?;
            write_txn.open_table(APPLIED_TRANSFORMATION)?;
            write_txn.open_table(FAILED_INVARIANT)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Insert a serialized input value, deduplicating by content: the same
    /// blob is stored once per session no matter how many chains replay it.
    pub fn insert_input(&self, blob: &[u8]) -> Result<InputId> {
        {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(INPUT_DATA)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                if value.value() == blob {
                    return Ok(InputId(key.value().to_string()));
                }
            }
        }

        let id = InputId::new();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(INPUT_DATA)?;
            table.insert(id.0.as_str(), blob)?;
        }
        write_txn.commit()?;
        Ok(id)
    }

    /// Record one executed chain in a single atomic transaction.
    ///
    /// Every reference is validated against the live tables inside the
    /// transaction; a dangling transformation, invariant, or input id means
    /// id generation went wrong upstream and surfaces as
    /// [`MorphoError::StoreIntegrity`] — the transaction rolls back and
    /// nothing from this chain is recorded.
    pub fn record_chain(&self, record: &ChainRecord) -> Result<()> {
        for pair in record.links.windows(2) {
            if pair[1].link_index <= pair[0].link_index {
                return Err(MorphoError::StoreIntegrity(format!(
                    "link_index must be strictly increasing within chain {}: {} then {}",
                    record.chain_id, pair[0].link_index, pair[1].link_index
                )));
            }
        }

        let write_txn = self.db.begin_write()?;
        {
            let transformation_table = write_txn.open_table(TRANSFORMATION)?;
            let invariant_table = write_txn.open_table(INVARIANT)?;
            let input_table = write_txn.open_table(INPUT_DATA)?;

            if input_table.get(record.input_id.0.as_str())?.is_none() {
                return Err(MorphoError::StoreIntegrity(format!(
                    "input_data id {} does not exist",
                    record.input_id
                )));
            }
            for link in &record.links {
                if transformation_table
                    .get(link.transformation.0.as_str())?
                    .is_none()
                {
                    return Err(MorphoError::StoreIntegrity(format!(
                        "transformation id {} does not exist",
                        link.transformation
                    )));
                }
                for invariant in &link.failed_invariants {
                    if invariant_table.get(invariant.0.as_str())?.is_none() {
                        return Err(MorphoError::StoreIntegrity(format!(
                            "invariant id {} does not exist",
                            invariant
                        )));
                    }
                }
            }

            let mut applied_table = write_txn.open_table(APPLIED_TRANSFORMATION)?;
            let mut failed_table = write_txn.open_table(FAILED_INVARIANT)?;
            for link in &record.links {
                let applied_id = Ulid::new().to_string();
                let row = AppliedTransformationRow {
                    id: applied_id.clone(),
                    transformation: link.transformation.0.clone(),
                    relation_chain_id: record.chain_id.0.clone(),
                    link_index: link.link_index,
                    created_at: Utc::now(),
                };
                applied_table.insert(applied_id.as_str(), serde_json::to_string(&row)?.as_str())?;

                for invariant in &link.failed_invariants {
                    let failed_id = Ulid::new().to_string();
                    let row = FailedInvariantRow {
                        id: failed_id.clone(),
                        invariant: invariant.0.clone(),
                        applied_transformation: applied_id.clone(),
                        input_data: record.input_id.0.clone(),
                    };
                    failed_table.insert(failed_id.as_str(), serde_json::to_string(&row)?.as_str())?;
                }
            }
        }
        write_txn.commit()?;

        tracing::debug!(
            chain = %record.chain_id,
            links = record.links.len(),
            "recorded chain execution"
        );
        Ok(())
    }

    /// Row counts for all six tables.
    pub fn table_counts(&self) -> Result<TableCounts> {
        let read_txn = self.db.begin_read()?;
        Ok(TableCounts {
            transformation: count_rows(&read_txn.open_table(TRANSFORMATION)?)?,
            invariant: count_rows(&read_txn.open_table(INVARIANT)?)?,
            relation: count_rows(&read_txn.open_table(RELATION)?)?,
            input_data: count_rows(&read_txn.open_table(INPUT_DATA)?)?,
            applied_transformation: count_rows(&read_txn.open_table(APPLIED_TRANSFORMATION)?)?,
            failed_invariant: count_rows(&read_txn.open_table(FAILED_INVARIANT)?)?,
        })
    }

    /// Bulk-convert the whole schema into the read-optimized analytical
    /// store, consuming the write path. Referential integrity is re-checked
    /// during conversion.
    pub fn into_analytical(self) -> Result<AnalyticalStore> {
        let read_txn = self.db.begin_read()?;

        let mut analytical = AnalyticalStore::default();

        let table = read_txn.open_table(TRANSFORMATION)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: TransformationRow = serde_json::from_str(value.value())?;
            analytical
                .transformation_index
                .insert(row.id.clone(), analytical.transformation_ids.len());
            analytical.transformation_ids.push(row.id);
            analytical.transformation_names.push(row.name);
        }

        let table = read_txn.open_table(INVARIANT)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: InvariantRow = serde_json::from_str(value.value())?;
            analytical
                .invariant_index
                .insert(row.id.clone(), analytical.invariant_ids.len());
            analytical.invariant_ids.push(row.id);
            analytical.invariant_names.push(row.name);
        }

        let table = read_txn.open_table(RELATION)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: RelationRow = serde_json::from_str(value.value())?;
            if !analytical.transformation_index.contains_key(&row.transformation) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "relation row references missing transformation {}",
                    row.transformation
                )));
            }
            if !analytical.invariant_index.contains_key(&row.invariant) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "relation row references missing invariant {}",
                    row.invariant
                )));
            }
            analytical.relation_transformations.push(row.transformation);
            analytical.relation_invariants.push(row.invariant);
        }

        let table = read_txn.open_table(INPUT_DATA)?;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let id = key.value().to_string();
            analytical
                .input_index
                .insert(id.clone(), analytical.input_ids.len());
            analytical.input_ids.push(id);
            analytical.input_blobs.push(value.value().to_vec());
        }

        let table = read_txn.open_table(APPLIED_TRANSFORMATION)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: AppliedTransformationRow = serde_json::from_str(value.value())?;
            if !analytical.transformation_index.contains_key(&row.transformation) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "applied_transformation {} references missing transformation {}",
                    row.id, row.transformation
                )));
            }
            analytical
                .applied_index
                .insert(row.id.clone(), analytical.applied_ids.len());
            analytical.applied_ids.push(row.id);
            analytical.applied_transformations.push(row.transformation);
            analytical.applied_chain_ids.push(row.relation_chain_id);
            analytical.applied_link_indexes.push(row.link_index);
            analytical.applied_created_at.push(row.created_at);
        }

        let table = read_txn.open_table(FAILED_INVARIANT)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let row: FailedInvariantRow = serde_json::from_str(value.value())?;
            if !analytical.invariant_index.contains_key(&row.invariant) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "failed_invariant {} references missing invariant {}",
                    row.id, row.invariant
                )));
            }
            if !analytical.applied_index.contains_key(&row.applied_transformation) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "failed_invariant {} references missing applied_transformation {}",
                    row.id, row.applied_transformation
                )));
            }
            if !analytical.input_index.contains_key(&row.input_data) {
                return Err(MorphoError::StoreIntegrity(format!(
                    "failed_invariant {} references missing input_data {}",
                    row.id, row.input_data
                )));
            }
            analytical.failed_ids.push(row.id);
            analytical.failed_invariant_ids.push(row.invariant);
            analytical.failed_applied.push(row.applied_transformation);
            analytical.failed_inputs.push(row.input_data);
        }

        let counts = analytical.table_counts();
        tracing::info!(
            applied = counts.applied_transformation,
            failed = counts.failed_invariant,
            inputs = counts.input_data,
            "converted result store to analytical store"
        );
        Ok(analytical)
    }
}

/// One `applied_transformation` row joined with its transformation name,
/// for per-chain ordering queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedView {
    pub chain_id: String,
    pub link_index: u32,
    pub transformation_name: String,
    pub created_at: DateTime<Utc>,
}

/// One `failed_invariant` row joined across the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureView {
    pub chain_id: String,
    pub link_index: u32,
    pub transformation_name: String,
    pub invariant_name: String,
    pub input_id: String,
}

/// All invariant failures of one applied transformation, grouped for
/// terminal reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGroup {
    pub relation: String,
    pub invariants: Vec<String>,
}

/// Read-optimized columnar copy of the schema.
///
/// Column vectors plus id→row indexes make the aggregate joins cheap:
/// grouping millions of `applied_transformation` / `failed_invariant` rows
/// is a sequential scan here, where the row-oriented write path would pay a
/// random lookup per row.
#[derive(Debug, Default)]
pub struct AnalyticalStore {
    transformation_ids: Vec<String>,
    transformation_names: Vec<String>,
    transformation_index: HashMap<String, usize>,
    invariant_ids: Vec<String>,
    invariant_names: Vec<String>,
    invariant_index: HashMap<String, usize>,
    relation_transformations: Vec<String>,
    relation_invariants: Vec<String>,
    input_ids: Vec<String>,
    input_blobs: Vec<Vec<u8>>,
    input_index: HashMap<String, usize>,
    applied_ids: Vec<String>,
    applied_transformations: Vec<String>,
    applied_chain_ids: Vec<String>,
    applied_link_indexes: Vec<u32>,
    applied_created_at: Vec<DateTime<Utc>>,
    applied_index: HashMap<String, usize>,
    failed_ids: Vec<String>,
    failed_invariant_ids: Vec<String>,
    failed_applied: Vec<String>,
    failed_inputs: Vec<String>,
}

impl AnalyticalStore {
    pub fn table_counts(&self) -> TableCounts {
        TableCounts {
            transformation: self.transformation_ids.len() as u64,
            invariant: self.invariant_ids.len() as u64,
            relation: self.relation_transformations.len() as u64,
            input_data: self.input_ids.len() as u64,
            applied_transformation: self.applied_ids.len() as u64,
            failed_invariant: self.failed_ids.len() as u64,
        }
    }

    /// Applied transformations joined with their names, ordered by chain
    /// then link index.
    pub fn applied_transformations(&self) -> Vec<AppliedView> {
        let mut views: Vec<AppliedView> = (0..self.applied_ids.len())
            .map(|row| AppliedView {
                chain_id: self.applied_chain_ids[row].clone(),
                link_index: self.applied_link_indexes[row],
                transformation_name: self.transformation_name_of(&self.applied_transformations[row]),
                created_at: self.applied_created_at[row],
            })
            .collect();
        views.sort_by(|a, b| {
            a.chain_id
                .cmp(&b.chain_id)
                .then(a.link_index.cmp(&b.link_index))
        });
        views
    }

    /// Failed invariants joined across applied transformations and names,
    /// ordered by chain then link index.
    pub fn failed_invariants(&self) -> Vec<FailureView> {
        let mut views: Vec<FailureView> = (0..self.failed_ids.len())
            .map(|row| {
                let applied_row = self.applied_index[&self.failed_applied[row]];
                FailureView {
                    chain_id: self.applied_chain_ids[applied_row].clone(),
                    link_index: self.applied_link_indexes[applied_row],
                    transformation_name: self
                        .transformation_name_of(&self.applied_transformations[applied_row]),
                    invariant_name: self.invariant_name_of(&self.failed_invariant_ids[row]),
                    input_id: self.failed_inputs[row].clone(),
                }
            })
            .collect();
        views.sort_by(|a, b| {
            a.chain_id
                .cmp(&b.chain_id)
                .then(a.link_index.cmp(&b.link_index))
                .then(a.invariant_name.cmp(&b.invariant_name))
        });
        views
    }

    /// Failures grouped per applied transformation: one
    /// `(relation, failed invariant names)` tuple per failing link, ordered
    /// by chain then link index.
    pub fn failure_summary(&self) -> Vec<FailureGroup> {
        let mut grouped: HashMap<&str, Vec<usize>> = HashMap::new();
        for (row, applied_id) in self.failed_applied.iter().enumerate() {
            grouped.entry(applied_id.as_str()).or_default().push(row);
        }

        let mut order: Vec<&str> = grouped.keys().copied().collect();
        order.sort_by_key(|applied_id| {
            let applied_row = self.applied_index[*applied_id];
            (
                self.applied_chain_ids[applied_row].clone(),
                self.applied_link_indexes[applied_row],
            )
        });

        order
            .into_iter()
            .map(|applied_id| {
                let applied_row = self.applied_index[applied_id];
                let mut invariants: Vec<String> = grouped[applied_id]
                    .iter()
                    .map(|&row| self.invariant_name_of(&self.failed_invariant_ids[row]))
                    .collect();
                invariants.sort();
                FailureGroup {
                    relation: self.transformation_name_of(&self.applied_transformations[applied_row]),
                    invariants,
                }
            })
            .collect()
    }

    /// The declared relation graph as `(transformation, invariant)` name
    /// pairs.
    pub fn relation_pairs(&self) -> Vec<(String, String)> {
        self.relation_transformations
            .iter()
            .zip(&self.relation_invariants)
            .map(|(transformation, invariant)| {
                (
                    self.transformation_name_of(transformation),
                    self.invariant_name_of(invariant),
                )
            })
            .collect()
    }

    /// The serialized blob of a stored input.
    pub fn input(&self, id: &str) -> Option<&[u8]> {
        self.input_index
            .get(id)
            .map(|&row| self.input_blobs[row].as_slice())
    }

    pub fn input_ids(&self) -> impl Iterator<Item = &str> {
        self.input_ids.iter().map(String::as_str)
    }

    /// Distinct chain ids observed in `applied_transformation`, sorted.
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.applied_chain_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }

    fn transformation_name_of(&self, id: &str) -> String {
        self.transformation_names[self.transformation_index[id]].clone()
    }

    fn invariant_name_of(&self, id: &str) -> String {
        self.invariant_names[self.invariant_index[id]].clone()
    }
}

fn count_rows<K, V>(table: &redb::ReadOnlyTable<K, V>) -> Result<u64>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    let mut rows = 0;
    for entry in table.iter()? {
        entry?;
        rows += 1;
    }
    Ok(rows)
}
