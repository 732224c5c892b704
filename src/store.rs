use serde_json::Value;

use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Clients,
    TimeEntries,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::TimeEntries => "time_entries",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

/// Equality filters, ordering and a row limit over one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub filters: Vec<(&'static str, String)>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.filters.push((column, value.into()));
        self
    }

    pub fn order(mut self, column: &'static str, ascending: bool) -> Self {
        self.order = Some(Order { column, ascending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query string parameters.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(column, value)| (column.to_string(), format!("eq.{value}")))
            .collect();
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{direction}", order.column)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// Generic row store over the backend tables. Rows travel as JSON objects and
/// are typed by the data access layer.
pub trait TableStore {
    fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RemoteError>;

    fn insert(&self, table: Table, row: Value) -> Result<Value, RemoteError>;

    fn update(&self, table: Table, query: &Query, patch: Value) -> Result<Vec<Value>, RemoteError>;

    fn delete(&self, table: Table, query: &Query) -> Result<(), RemoteError>;
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// In-process table store with PostgREST-like semantics for tests.
    #[derive(Default)]
    pub struct MemoryStore {
        tables: RefCell<HashMap<Table, Vec<Value>>>,
        next_id: Cell<u64>,
        calls: RefCell<Vec<String>>,
        fail_on: RefCell<Option<(String, RemoteError)>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next call whose log line starts with `prefix` fail.
        pub fn fail_next(&self, prefix: &str, error: RemoteError) {
            *self.fail_on.borrow_mut() = Some((prefix.to_string(), error));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        pub fn rows(&self, table: Table) -> Vec<Value> {
            self.tables.borrow().get(&table).cloned().unwrap_or_default()
        }

        fn record(&self, call: String) -> Result<(), RemoteError> {
            let failure = {
                let mut fail_on = self.fail_on.borrow_mut();
                match fail_on.as_ref() {
                    Some((prefix, _)) if call.starts_with(prefix.as_str()) => fail_on.take(),
                    _ => None,
                }
            };
            self.calls.borrow_mut().push(call);
            match failure {
                Some((_, error)) => Err(error),
                None => Ok(()),
            }
        }

        fn matches(row: &Value, query: &Query) -> bool {
            query.filters.iter().all(|(column, value)| match row.get(*column) {
                Some(Value::String(text)) => text == value,
                Some(Value::Bool(flag)) => flag.to_string() == *value,
                Some(Value::Number(number)) => number.to_string() == *value,
                _ => false,
            })
        }
    }

    impl TableStore for MemoryStore {
        fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, RemoteError> {
            self.record(format!("select {}", table.as_str()))?;
            let mut rows: Vec<Value> = self
                .rows(table)
                .into_iter()
                .filter(|row| Self::matches(row, query))
                .collect();
            if let Some(order) = &query.order {
                rows.sort_by(|a, b| {
                    let left = a.get(order.column).and_then(Value::as_str).unwrap_or_default();
                    let right = b.get(order.column).and_then(Value::as_str).unwrap_or_default();
                    if order.ascending {
                        left.cmp(right)
                    } else {
                        right.cmp(left)
                    }
                });
            }
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            Ok(rows)
        }

        fn insert(&self, table: Table, mut row: Value) -> Result<Value, RemoteError> {
            self.record(format!("insert {}", table.as_str()))?;
            let id = self.next_id.get() + 1;
            self.next_id.set(id);
            let stamp = format!("2026-01-01T{:02}:{:02}:{:02}+00:00", id / 3600 % 24, id / 60 % 60, id % 60);
            if let Value::Object(object) = &mut row {
                object.insert("id".to_string(), Value::String(format!("{}-{id:06}", table.as_str())));
                object.insert("created_at".to_string(), Value::String(stamp.clone()));
                object.insert("updated_at".to_string(), Value::String(stamp));
                if table == Table::Clients {
                    object.entry("archived").or_insert(Value::Bool(false));
                } else {
                    object.entry("end_time").or_insert(Value::Null);
                    object.entry("notes").or_insert(Value::Null);
                }
            }
            self.tables
                .borrow_mut()
                .entry(table)
                .or_default()
                .push(row.clone());
            Ok(row)
        }

        fn update(&self, table: Table, query: &Query, patch: Value) -> Result<Vec<Value>, RemoteError> {
            self.record(format!("update {}", table.as_str()))?;
            let mut tables = self.tables.borrow_mut();
            let rows = tables.entry(table).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|row| Self::matches(row, query)) {
                if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &patch) {
                    for (key, value) in changes {
                        target.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
            Ok(updated)
        }

        fn delete(&self, table: Table, query: &Query) -> Result<(), RemoteError> {
            self.record(format!("delete {}", table.as_str()))?;
            let mut tables = self.tables.borrow_mut();
            if let Some(rows) = tables.get_mut(&table) {
                rows.retain(|row| !Self::matches(row, query));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_renders_postgrest_params() {
        let query = Query::new()
            .eq("user_id", "abc")
            .order("created_at", false)
            .limit(1000);
        assert_eq!(
            query.to_params(),
            vec![
                ("user_id".to_string(), "eq.abc".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "1000".to_string()),
            ]
        );
    }

    #[test]
    fn table_names_match_backend() {
        assert_eq!(Table::Clients.as_str(), "clients");
        assert_eq!(Table::TimeEntries.as_str(), "time_entries");
    }
}
