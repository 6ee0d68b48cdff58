//! Scripted in-memory backend for unit tests
//!
//! Statements are answered by the first rule whose pattern occurs in the SQL
//! text. Every statement, its parameters and connection open/close events are
//! recorded so tests can assert on what reached the backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Connection, ConnectionSource, ResultRow, TableMetadata};
use crate::error::{FeatureStoreError, Result};
use crate::types::{Value, ValueType};

#[derive(Debug, Clone)]
enum Outcome {
    Rows(Vec<Vec<Value>>),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, Outcome)>,
    tables: Vec<TableMetadata>,
    statements: Vec<(String, Vec<Value>)>,
    auto_commit: Vec<bool>,
    opened: usize,
    closed: usize,
    cursors: usize,
    describes: usize,
    fail_acquire: bool,
}

impl Script {
    fn answer(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match self.rules.iter().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, Outcome::Rows(rows))) => Ok(rows.clone()),
            Some((_, Outcome::Fail(message))) => Err(FeatureStoreError::Connection(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// Connection source answering from a script
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedSource {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_table(self, table: TableMetadata) -> Self {
        self.script.lock().unwrap().tables.push(table);
        self
    }

    /// Answer statements containing `pattern` with `rows`
    pub(crate) fn on(self, pattern: &str, rows: Vec<Vec<Value>>) -> Self {
        self.script
            .lock()
            .unwrap()
            .rules
            .push((pattern.to_string(), Outcome::Rows(rows)));
        self
    }

    /// Fail statements containing `pattern`
    pub(crate) fn fail_on(self, pattern: &str, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .rules
            .push((pattern.to_string(), Outcome::Fail(message.to_string())));
        self
    }

    pub(crate) fn fail_acquire(self) -> Self {
        self.script.lock().unwrap().fail_acquire = true;
        self
    }

    /// SQL text of every statement, in execution order
    pub(crate) fn statements(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    /// Parameters of the first statement containing `pattern`
    pub(crate) fn params_of(&self, pattern: &str) -> Option<Vec<Value>> {
        self.script
            .lock()
            .unwrap()
            .statements
            .iter()
            .find(|(sql, _)| sql.contains(pattern))
            .map(|(_, params)| params.clone())
    }

    pub(crate) fn auto_commit_log(&self) -> Vec<bool> {
        self.script.lock().unwrap().auto_commit.clone()
    }

    pub(crate) fn opened(&self) -> usize {
        self.script.lock().unwrap().opened
    }

    pub(crate) fn closed(&self) -> usize {
        self.script.lock().unwrap().closed
    }

    /// Number of cursors opened
    pub(crate) fn cursors(&self) -> usize {
        self.script.lock().unwrap().cursors
    }

    pub(crate) fn describes(&self) -> usize {
        self.script.lock().unwrap().describes
    }
}

#[async_trait]
impl ConnectionSource for ScriptedSource {
    type Connection = ScriptedConnection;

    async fn acquire(&self) -> Result<ScriptedConnection> {
        let mut script = self.script.lock().unwrap();
        if script.fail_acquire {
            return Err(FeatureStoreError::Connection("connection refused".to_string()));
        }
        script.opened += 1;
        Ok(ScriptedConnection {
            script: Arc::clone(&self.script),
            cursors: HashMap::new(),
        })
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
    cursors: HashMap<String, VecDeque<Vec<Value>>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    type Row = MemoryRow;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let rows = self.script.lock().unwrap().answer(sql, params)?;
        Ok(rows.len() as u64)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<MemoryRow>> {
        let rows = self.script.lock().unwrap().answer(sql, params)?;
        Ok(rows.into_iter().map(MemoryRow).collect())
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.script.lock().unwrap().auto_commit.push(enabled);
        Ok(())
    }

    async fn open_cursor(&mut self, name: &str, sql: &str, params: &[Value]) -> Result<()> {
        let rows = {
            let mut script = self.script.lock().unwrap();
            script.cursors += 1;
            script.answer(sql, params)?
        };
        self.cursors.insert(name.to_string(), rows.into());
        Ok(())
    }

    async fn fetch(&mut self, name: &str, max_rows: i64) -> Result<Vec<MemoryRow>> {
        let cursor = self
            .cursors
            .get_mut(name)
            .ok_or_else(|| FeatureStoreError::Connection(format!("no cursor {}", name)))?;
        let take = if max_rows > 0 {
            (max_rows as usize).min(cursor.len())
        } else {
            cursor.len()
        };
        Ok(cursor.drain(..take).map(MemoryRow).collect())
    }

    async fn close_cursor(&mut self, name: &str) -> Result<()> {
        self.cursors.remove(name);
        Ok(())
    }

    async fn describe_tables(&mut self, _namespace: Option<&str>) -> Result<Vec<TableMetadata>> {
        let mut script = self.script.lock().unwrap();
        script.describes += 1;
        Ok(script.tables.clone())
    }

    async fn close(self) -> Result<()> {
        self.script.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// A row of plain values, converted to the requested type on read
#[derive(Debug, Clone)]
pub(crate) struct MemoryRow(pub Vec<Value>);

impl ResultRow for MemoryRow {
    fn column_count(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize, value_type: &ValueType) -> Result<Value> {
        match self.0.get(index) {
            Some(Value::Null) => Ok(Value::Null),
            Some(value) => value.convert_to(value_type),
            None => Err(FeatureStoreError::decoding(format!(
                "column {} out of range",
                index
            ))),
        }
    }
}
