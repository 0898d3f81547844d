//! Migration orchestration.
//!
//! One pass takes the set of changed source filenames, resolves every
//! relation they participate in, loads fresh snapshots of both sides,
//! reconciles and classifies, and applies the resulting operations to
//! each destiny. Operations execute in delete → update → insert order so
//! earlier deletes never shift the positional index a later operation in
//! the same batch addresses; destinies are independent of each other.

use crate::backend::{open_source, Backend};
use crate::config::Config;
use crate::diff;
use anyhow::Context;
use dbfxsql_core::{Condition, EngineKind, Operation, Operator, Relation, Row, SyncTable, ROW_NUMBER};

/// One origin fanned out to every destiny it must drive. Relations that
/// share the same origin source and table are merged into a single group
/// with concatenated field/destiny lists.
struct SyncGroup {
    origin_source: String,
    origin_table: String,
    origin_kind: EngineKind,
    /// Per destiny: the origin-side field list paired with the destiny
    /// table's metadata.
    pairs: Vec<(Vec<String>, SyncTable)>,
}

/// The startup filename set: only explicitly-prioritized, present
/// sources drive the initial alignment, so an engine with no files yet
/// does not wipe out data already present on the other side.
pub fn initial_filenames(config: &Config) -> Vec<String> {
    config.prioritized_files()
}

/// Run one migration pass for the given changed filenames.
///
/// With `isolate_failures` (continuous mode) a failure while applying
/// one relation's operations is reported and the remaining relations
/// still run; the next triggering event naturally retries, because the
/// next diff recomputes residuals from current state. Without it
/// (one-shot mode) the first failure aborts the pass.
pub async fn migrate(
    config: &Config,
    filenames: &[String],
    notify: bool,
    isolate_failures: bool,
) -> anyhow::Result<()> {
    for group in build_groups(config, filenames) {
        let outcome = migrate_group(config, &group, notify).await;

        match outcome {
            Ok(()) => {}
            Err(error) if isolate_failures => {
                tracing::error!(
                    origin = %group.origin_source,
                    "failed to synchronize relation: {error:#}"
                );
            }
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

fn build_groups(config: &Config, filenames: &[String]) -> Vec<SyncGroup> {
    let mut groups: Vec<SyncGroup> = Vec::new();

    let mut seen = Vec::new();
    for filename in filenames {
        if seen.contains(filename) {
            continue;
        }
        seen.push(filename.clone());

        for relation in &config.relations {
            if !relation.involves(filename) {
                continue;
            }

            let Some(origin_at) = relation.sources.iter().position(|s| s == filename) else {
                continue;
            };
            let Some((origin_kind, _)) = config.engine_for(filename) else {
                continue;
            };

            let origin_table = relation.tables[origin_at].clone();
            let origin_fields = lowercased(&relation.fields[origin_at]);

            let pairs = destiny_pairs(config, relation, origin_at, &origin_fields);
            if pairs.is_empty() {
                continue;
            }

            match groups.iter_mut().find(|group| {
                group.origin_source == *filename && group.origin_table == origin_table
            }) {
                Some(group) => group.pairs.extend(pairs),
                None => groups.push(SyncGroup {
                    origin_source: filename.clone(),
                    origin_table,
                    origin_kind,
                    pairs,
                }),
            }
        }
    }

    groups
}

fn destiny_pairs(
    config: &Config,
    relation: &Relation,
    origin_at: usize,
    origin_fields: &[String],
) -> Vec<(Vec<String>, SyncTable)> {
    let mut pairs = Vec::new();

    for at in 0..relation.sources.len() {
        if at == origin_at {
            continue;
        }
        let Some((kind, _)) = config.engine_for(&relation.sources[at]) else {
            continue;
        };

        pairs.push((
            origin_fields.to_vec(),
            SyncTable {
                engine: kind,
                source: relation.sources[at].clone(),
                table: relation.tables[at].clone(),
                fields: lowercased(&relation.fields[at]),
                rows: Vec::new(),
            },
        ));
    }

    pairs
}

async fn migrate_group(config: &Config, group: &SyncGroup, notify: bool) -> anyhow::Result<()> {
    let origin_backend = open_source(config, &group.origin_source, &group.origin_table)?;
    let origin_rows = origin_backend
        .read_all()
        .await
        .with_context(|| format!("failed to read origin '{}'", group.origin_source))?;

    let origin = SyncTable::new(
        group.origin_kind,
        group.origin_source.clone(),
        group.origin_table.clone(),
        Vec::new(),
        origin_rows,
    );

    for (origin_fields, destiny_meta) in &group.pairs {
        let destiny_backend = open_source(config, &destiny_meta.source, &destiny_meta.table)?;
        let destiny_rows = destiny_backend
            .read_where(None)
            .await
            .with_context(|| format!("failed to read destiny '{}'", destiny_meta.source))?;

        let destiny = SyncTable::new(
            destiny_meta.engine,
            destiny_meta.source.clone(),
            destiny_meta.table.clone(),
            destiny_meta.fields.clone(),
            destiny_rows,
        );

        let (residual_origin, residual_destiny) =
            diff::reconcile_tables(&origin, origin_fields, &destiny);
        let operations = diff::classify(&residual_origin, &residual_destiny);

        if operations.is_empty() {
            continue;
        }

        tracing::debug!(
            origin = %origin.source,
            destiny = %destiny.source,
            operations = operations.len(),
            "applying reconciliation operations"
        );

        apply(destiny_backend.as_ref(), &destiny, operations, notify)
            .await
            .with_context(|| {
                format!(
                    "failed to apply operations from '{}' to '{}'",
                    origin.source, destiny.source
                )
            })?;
    }

    Ok(())
}

/// Apply one destiny's operation list in delete → update → insert order.
/// When a destiny receives more than one operation of a kind, the
/// adapter is invoked once with the whole batch instead of once per row.
async fn apply(
    backend: &dyn Backend,
    destiny: &SyncTable,
    operations: Vec<Operation>,
    notify: bool,
) -> anyhow::Result<()> {
    let mut deletes = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();

    for operation in operations {
        if notify {
            announce(destiny, &operation);
        }

        match operation {
            Operation::Delete { index } => deletes.push(positional(index)),
            Operation::Update { index, fields } => updates.push((fields, positional(index))),
            Operation::Insert { fields } => inserts.push(fields),
        }
    }

    // Deletes already arrive highest-position-first from the classifier.
    match deletes.len() {
        0 => {}
        1 => backend.delete(&deletes[0]).await?,
        _ => backend.bulk_delete(deletes).await?,
    }

    match updates.len() {
        0 => {}
        1 => {
            let (fields, condition) = updates.remove(0);
            backend.update(fields, &condition).await?;
        }
        _ => backend.bulk_update(updates).await?,
    }

    match inserts.len() {
        0 => {}
        1 => backend.insert(inserts.remove(0)).await?,
        _ => backend.bulk_insert(inserts).await?,
    }

    Ok(())
}

fn positional(index: usize) -> Condition {
    Condition::new(ROW_NUMBER, Operator::Eq, index.to_string())
}

fn announce(destiny: &SyncTable, operation: &Operation) {
    let target = if destiny.table.is_empty() {
        destiny.source.clone()
    } else {
        format!("{} > {}", destiny.source, destiny.table)
    };

    match operation {
        Operation::Insert { fields } => {
            tracing::info!("{target}: insert row {}", render(fields));
        }
        Operation::Update { index, fields } => {
            tracing::info!(
                "{target}: update row_number {index} with {}",
                render(fields)
            );
        }
        Operation::Delete { index } => {
            tracing::info!("{target}: delete row_number {index}");
        }
    }
}

fn render(fields: &Row) -> String {
    let mut pairs: Vec<String> = fields
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    pairs.sort();

    format!("{{{}}}", pairs.join(", "))
}

fn lowercased(fields: &[String]) -> Vec<String> {
    fields.iter().map(|field| field.to_lowercase()).collect()
}
