//! Row reconciliation and operation classification.
//!
//! Rows have no stable cross-engine identity, so "sameness" is defined
//! purely by equal mapped field values in the normalized domain. The
//! reconciler is deliberately a greedy, order-preserving, at-most-one-
//! match pass — not a general set diff — and the classifier treats the
//! leftover rows as two queues reconciled positionally.

use dbfxsql_core::{Operation, Row, SyncTable};

/// A row that found no counterpart on the other side, tagged with its
/// 1-based position in its table's current ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Residual {
    pub index: usize,
    pub fields: Row,
}

/// Match two ordered row sequences under a positional field
/// correspondence and return the unmatched rows of each side.
///
/// For each origin row in order, the destiny pool is scanned from the
/// front; the first pool entry whose mapped values all equal the origin
/// row's is consumed. A destiny row can satisfy only one origin row.
pub fn reconcile(
    origin_rows: &[Row],
    destiny_rows: &[Row],
    field_map: &[(String, String)],
) -> (Vec<Residual>, Vec<Residual>) {
    let mut residual_origin = Vec::new();
    let mut pool: Vec<Residual> = destiny_rows
        .iter()
        .enumerate()
        .map(|(at, row)| Residual {
            index: at + 1,
            fields: row.clone(),
        })
        .collect();

    for (at, origin_row) in origin_rows.iter().enumerate() {
        let matched = pool.iter().position(|candidate| {
            field_map.iter().all(|(origin_field, destiny_field)| {
                origin_row.get(origin_field) == candidate.fields.get(destiny_field)
            })
        });

        match matched {
            Some(found) => {
                pool.remove(found);
            }
            None => residual_origin.push(Residual {
                index: at + 1,
                fields: origin_row.clone(),
            }),
        }
    }

    (residual_origin, pool)
}

/// Reconcile one (origin, destiny) table pair of a relation.
///
/// Residual origin rows come back restricted to the relation's declared
/// field subset and renamed onto the destiny's field names, directly
/// usable as write payloads against the destiny.
pub fn reconcile_tables(
    origin: &SyncTable,
    origin_fields: &[String],
    destiny: &SyncTable,
) -> (Vec<Residual>, Vec<Residual>) {
    let field_map: Vec<(String, String)> = origin_fields
        .iter()
        .zip(&destiny.fields)
        .map(|(origin_field, destiny_field)| (origin_field.clone(), destiny_field.clone()))
        .collect();

    let (residual_origin, residual_destiny) = reconcile(&origin.rows, &destiny.rows, &field_map);

    let residual_origin = residual_origin
        .into_iter()
        .map(|residual| Residual {
            index: residual.index,
            fields: field_map
                .iter()
                .filter_map(|(origin_field, destiny_field)| {
                    residual
                        .fields
                        .get(origin_field)
                        .map(|value| (destiny_field.clone(), value.clone()))
                })
                .collect(),
        })
        .collect();

    (residual_origin, residual_destiny)
}

/// Turn the residual rows of one reconciliation into ordered operations:
/// deletes (highest position first, so earlier deletes never shift the
/// address of a later one), then updates, then inserts.
///
/// The overlap of the two residual queues is treated as same-row edits;
/// origin surplus is pure insert, destiny surplus is pure delete. An
/// update carries only the fields that actually changed, and a pair with
/// no changed fields yields no operation.
pub fn classify(residual_origin: &[Residual], residual_destiny: &[Residual]) -> Vec<Operation> {
    let m = residual_destiny.len();
    let n = residual_origin.len();

    let mut operations = Vec::new();

    for residual in residual_destiny.iter().skip(n).rev() {
        operations.push(Operation::Delete {
            index: residual.index,
        });
    }

    for (origin, destiny) in residual_origin.iter().zip(residual_destiny) {
        let changed: Row = origin
            .fields
            .iter()
            .filter(|(field, value)| destiny.fields.get(*field) != Some(value))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();

        if !changed.is_empty() {
            operations.push(Operation::Update {
                index: destiny.index,
                fields: changed,
            });
        }
    }

    for residual in residual_origin.iter().skip(m) {
        operations.push(Operation::Insert {
            fields: residual.fields.clone(),
        });
    }

    operations
}
