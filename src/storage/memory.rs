// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory [`LocalStore`] that evaluates queries directly against the AST.
//! Used for tests and throwaway sessions; nothing survives the process.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use crate::metrics::LatencyTimer;
use crate::query::evaluator::{compare_values, evaluate, matches};
use crate::query::{QueryDescription, QueryError, SortDirection};
use super::traits::{row_id, LocalStore, QueryResult, Row, StorageError, TableDefinition};

struct MemoryTable {
    definition: TableDefinition,
    rows: BTreeMap<String, Row>,
}

pub struct MemoryStore {
    tables: DashMap<String, MemoryTable>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Rows currently stored in `table` (0 if undefined).
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Drop every row of every table, keeping definitions.
    pub fn clear(&self) {
        for mut table in self.tables.iter_mut() {
            table.rows.clear();
        }
    }

    fn select(&self, query: &QueryDescription) -> Result<(Vec<Row>, u64), StorageError> {
        let table = self
            .tables
            .get(&query.table_name)
            .ok_or_else(|| StorageError::UndefinedTable(query.table_name.clone()))?;

        let mut rows = Vec::new();
        for row in table.rows.values() {
            let keep = match &query.filter {
                Some(filter) => matches(filter, row)?,
                None => true,
            };
            if keep {
                rows.push(row.clone());
            }
        }
        drop(table);
        let total = rows.len() as u64;

        if !query.ordering.is_empty() {
            let mut keyed = rows
                .into_iter()
                .map(|row| {
                    let keys = query
                        .ordering
                        .iter()
                        .map(|o| evaluate(&o.expression, &row))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok((keys, row))
                })
                .collect::<Result<Vec<_>, QueryError>>()?;
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), ordering) in a.iter().zip(b.iter()).zip(query.ordering.iter()) {
                    let ord = match ordering.direction {
                        SortDirection::Ascending => compare_values(x, y),
                        SortDirection::Descending => compare_values(y, x),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let rows = match (query.skip, query.take) {
            (Some(_), None) => return Err(QueryError::SkipWithoutTake.into()),
            (skip, Some(take)) => rows
                .into_iter()
                .skip(skip.unwrap_or(0) as usize)
                .take(take as usize)
                .collect(),
            (None, None) => rows,
        };
        Ok((rows, total))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn define_table(&self, definition: TableDefinition) -> Result<(), StorageError> {
        match self.tables.entry(definition.name.clone()) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().definition.columns.extend(definition.columns);
            }
            Entry::Vacant(slot) => {
                slot.insert(MemoryTable {
                    definition,
                    rows: BTreeMap::new(),
                });
            }
        }
        Ok(())
    }

    async fn read(&self, query: &QueryDescription) -> Result<QueryResult, StorageError> {
        let _timer = LatencyTimer::new("memory", "read");
        let (rows, total) = self.select(query)?;
        let rows = if query.selection.is_empty() {
            rows
        } else {
            rows.into_iter()
                .map(|row| {
                    query
                        .selection
                        .iter()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect()
        };
        Ok(QueryResult {
            rows,
            total_count: query.include_total_count.then_some(total),
        })
    }

    async fn upsert(&self, table: &str, rows: &[Row], from_server: bool) -> Result<(), StorageError> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UndefinedTable(table.to_string()))?;

        // Validate everything first so a bad row leaves the table untouched.
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row_id(row).ok_or_else(|| StorageError::InvalidRow {
                table: table.to_string(),
                reason: "missing string 'id'".into(),
            })?;
            let mut filtered = Row::new();
            for (column, value) in row {
                if entry.definition.columns.contains_key(column) {
                    filtered.insert(column.clone(), value.clone());
                } else if !from_server {
                    return Err(StorageError::UndefinedColumn {
                        table: table.to_string(),
                        column: column.clone(),
                    });
                }
            }
            prepared.push((id.to_string(), filtered));
        }

        for (id, row) in prepared {
            entry.rows.entry(id).or_default().extend(row);
        }
        Ok(())
    }

    async fn delete(&self, query: &QueryDescription) -> Result<u64, StorageError> {
        let mut ids_only = query.clone();
        ids_only.include_total_count = false;
        let (rows, _) = self.select(&ids_only)?;
        let ids: Vec<String> = rows.iter().filter_map(row_id).map(String::from).collect();
        self.delete_ids(&query.table_name, &ids).await
    }

    async fn delete_ids(&self, table: &str, ids: &[String]) -> Result<u64, StorageError> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::UndefinedTable(table.to_string()))?;
        Ok(ids.iter().filter(|id| entry.rows.remove(*id).is_some()).count() as u64)
    }

    async fn lookup(&self, table: &str, id: &str) -> Result<Option<Row>, StorageError> {
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| StorageError::UndefinedTable(table.to_string()))?;
        Ok(entry.rows.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::ColumnType;
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn store_with_people() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .define_table(
                TableDefinition::new("people")
                    .column("name", ColumnType::Text)
                    .column("age", ColumnType::Integer),
            )
            .await
            .unwrap();
        store
            .upsert(
                "people",
                &[
                    row(json!({"id": "a", "name": "Alice", "age": 31})),
                    row(json!({"id": "b", "name": "Bob", "age": 25})),
                    row(json!({"id": "c", "name": "Carol", "age": 40})),
                ],
                false,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty("people"));
        assert_eq!(store.len("people"), 0);
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let store = store_with_people().await;
        assert_eq!(store.len("people"), 3);
        let alice = store.lookup("people", "a").await.unwrap().unwrap();
        assert_eq!(alice["name"], "Alice");
        assert!(store.lookup("people", "zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_merges_columns() {
        let store = store_with_people().await;
        store
            .upsert("people", &[row(json!({"id": "a", "age": 32}))], false)
            .await
            .unwrap();
        let alice = store.lookup("people", "a").await.unwrap().unwrap();
        assert_eq!(alice["name"], "Alice");
        assert_eq!(alice["age"], 32);
    }

    #[tokio::test]
    async fn test_unknown_column_rejected_unless_from_server() {
        let store = store_with_people().await;
        let extra = row(json!({"id": "d", "name": "Dan", "shoeSize": 44}));

        let err = store.upsert("people", &[extra.clone()], false).await.unwrap_err();
        assert!(matches!(err, StorageError::UndefinedColumn { .. }));
        assert_eq!(store.len("people"), 3);

        store.upsert("people", &[extra], true).await.unwrap();
        let dan = store.lookup("people", "d").await.unwrap().unwrap();
        assert!(dan.get("shoeSize").is_none());
    }

    #[tokio::test]
    async fn test_undefined_table() {
        let store = MemoryStore::new();
        let err = store.lookup("nope", "1").await.unwrap_err();
        assert!(matches!(err, StorageError::UndefinedTable(_)));
    }

    #[tokio::test]
    async fn test_read_filter_order_page() {
        let store = store_with_people().await;
        let query = QueryDescription::parse(
            "people",
            "$filter=age gt 20&$orderby=age desc&$skip=1&$top=1&$inlinecount=allpages",
        )
        .unwrap();
        let result = store.read(&query).await.unwrap();
        assert_eq!(result.total_count, Some(3));
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_read_selection() {
        let store = store_with_people().await;
        let query = QueryDescription::new("people").select(["name"]).order_by("name");
        let result = store.read(&query).await.unwrap();
        assert_eq!(result.rows[0], row(json!({"name": "Alice"})));
        assert_eq!(result.total_count, None);
    }

    #[tokio::test]
    async fn test_delete_by_query_and_ids() {
        let store = store_with_people().await;
        let query = QueryDescription::parse("people", "$filter=age lt 35").unwrap();
        assert_eq!(store.delete(&query).await.unwrap(), 2);
        assert_eq!(store.len("people"), 1);

        assert_eq!(store.delete_ids("people", &["c".into(), "x".into()]).await.unwrap(), 1);
        assert!(store.is_empty("people"));
    }

    #[tokio::test]
    async fn test_skip_without_take_is_error() {
        let store = store_with_people().await;
        let query = QueryDescription::new("people").skip(1);
        assert!(matches!(
            store.read(&query).await,
            Err(StorageError::Query(QueryError::SkipWithoutTake))
        ));
    }
}
