//! Scripted in-memory session for protocol tests

use std::collections::{HashMap, VecDeque};

use super::{Dialect, QueryResult, SqlSession, WriteError, WriteResult};
use crate::batch::Value;

/// Records every statement and answers from a script instead of a database
///
/// `information_schema` lookups are answered from `tables` (keyed by table
/// name), and `ALTER TABLE ... ADD COLUMN` statements extend that map, so
/// schema drift behaves like a real catalog. Affected counts come from the
/// first rule whose pattern is a substring of the statement.
pub(crate) struct ScriptedSession {
    pub dialect: Dialect,
    pub statements: Vec<String>,
    pub params: Vec<Vec<Value>>,
    pub tables: HashMap<String, Vec<String>>,
    pub affected: Vec<(&'static str, u64)>,
    pub query_results: VecDeque<QueryResult>,
    pub fail_on: Option<String>,
}

impl ScriptedSession {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Vec::new(),
            params: Vec::new(),
            tables: HashMap::new(),
            affected: Vec::new(),
            query_results: VecDeque::new(),
            fail_on: None,
        }
    }

    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        self.tables.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn affects(mut self, pattern: &'static str, rows: u64) -> Self {
        self.affected.push((pattern, rows));
        self
    }

    pub fn returns(mut self, result: QueryResult) -> Self {
        self.query_results.push_back(result);
        self
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on = Some(pattern.to_string());
        self
    }

    /// Number of recorded statements starting with `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.statements
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    fn record(&mut self, sql: &str, params: &[Value]) -> WriteResult<()> {
        self.statements.push(sql.to_string());
        self.params.push(params.to_vec());
        match &self.fail_on {
            Some(pattern) if sql.contains(pattern.as_str()) => {
                Err(WriteError::sql(sql, "scripted failure"))
            }
            _ => Ok(()),
        }
    }
}

/// Quoted identifiers in order of appearance
fn quoted_idents(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

impl SqlSession for ScriptedSession {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64> {
        self.record(sql, params)?;

        if sql.starts_with("ALTER TABLE") && sql.contains("ADD COLUMN") {
            let idents = quoted_idents(sql);
            if let [_, table, column, ..] = idents.as_slice() {
                self.tables
                    .entry(table.clone())
                    .or_default()
                    .push(column.clone());
            }
        }

        Ok(self
            .affected
            .iter()
            .find(|(pattern, _)| sql.contains(pattern))
            .map(|(_, rows)| *rows)
            .unwrap_or(0))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult> {
        self.record(sql, params)?;

        if sql.contains("information_schema.columns") {
            let table = match params.get(1) {
                Some(Value::Text(t)) => t.clone(),
                _ => String::new(),
            };
            let rows = self
                .tables
                .get(&table)
                .map(|columns| {
                    columns
                        .iter()
                        .map(|c| serde_json::json!({ "column_name": c }))
                        .collect()
                })
                .unwrap_or_default();
            return Ok(QueryResult::new(vec!["column_name".to_string()], rows));
        }

        Ok(self.query_results.pop_front().unwrap_or_default())
    }

    fn begin(&mut self) -> WriteResult<()> {
        self.record("BEGIN", &[])
    }

    fn commit(&mut self) -> WriteResult<()> {
        self.record("COMMIT", &[])
    }

    fn rollback(&mut self) -> WriteResult<()> {
        self.record("ROLLBACK", &[])
    }
}
