//! In-memory driver for tests.
//!
//! Evaluates the statement shapes the query builder emits: selects filtered
//! by `col = ?`, `col IS NULL` and `col IN (?, ...)` predicates joined with
//! `AND`, inserts
//! (including `DEFAULT VALUES`), updates and deletes by predicate, with
//! `RETURNING` and literal default expressions. Anything else is a driver
//! error. Every statement is recorded as received.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::db::{BindType, Driver, Row, Value};
use crate::errors::{DbError, IntegrityKind};

static SELECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^SELECT (?P<cols>.+?) FROM (?P<table>\w+)(?: WHERE (?P<filter>.+?))?(?P<limit> LIMIT 1)?$")
        .expect("select regex")
});

static INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^INSERT INTO (?P<table>\w+) (?:\((?P<cols>[^)]*)\) VALUES \((?P<vals>.*?)\)|DEFAULT VALUES)(?: RETURNING (?P<ret>.+))?$")
        .expect("insert regex")
});

static UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^UPDATE (?P<table>\w+) SET (?P<sets>.+?) WHERE (?P<filter>.+?)(?: RETURNING (?P<ret>.+))?$")
        .expect("update regex")
});

static DELETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^DELETE FROM (?P<table>\w+)(?: WHERE (?P<filter>.+))?$").expect("delete regex")
});

static EQ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+) = \?$").expect("eq regex"));

static IS_NULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\w+) IS NULL$").expect("is null regex"));

static IN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+) IN \((?P<items>(?:\?|NULL)(?:, (?:\?|NULL))*)\)$").expect("in regex")
});

#[derive(Debug, Default)]
struct Table {
    primary_key: String,
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    statements: Vec<(String, Vec<Value>)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(String, Value),
    IsNull(String),
    In(String, Vec<Value>),
}

impl Predicate {
    fn matches(&self, row: &Row) -> bool {
        let cell = |c: &str| row.get(c).cloned().unwrap_or_default();
        match self {
            Predicate::Eq(c, v) => !v.is_null() && cell(c) == *v,
            Predicate::IsNull(c) => cell(c).is_null(),
            Predicate::In(c, vs) => {
                let cell = cell(c);
                vs.iter().any(|v| !v.is_null() && *v == cell)
            }
        }
    }
}

/// Consumes positional arguments in placeholder order.
struct Args<'a> {
    values: std::slice::Iter<'a, Value>,
}

impl Args<'_> {
    fn next(&mut self) -> Result<Value, DbError> {
        self.values
            .next()
            .cloned()
            .ok_or_else(|| DbError::Bind("not enough arguments for placeholders".to_string()))
    }

    fn finish(mut self) -> Result<(), DbError> {
        match self.values.next() {
            None => Ok(()),
            Some(_) => Err(DbError::Bind("too many arguments for placeholders".to_string())),
        }
    }
}

fn unsupported(sql: &str) -> DbError {
    DbError::Driver(format!("unsupported statement: {}", sql))
}

/// Splits on top-level `,` only, so `coalesce(a, b)` stays one item.
fn split_list(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in list.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(list[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let last = list[start..].trim();
    if !last.is_empty() {
        items.push(last);
    }
    items
}

fn unqualified(column: &str) -> &str {
    column.rsplit('.').next().unwrap_or(column)
}

/// Literal SQL expressions accepted as column defaults.
fn literal(expr: &str) -> Result<Value, DbError> {
    let lowered = expr.to_ascii_lowercase();
    match lowered.as_str() {
        "now()" | "current_timestamp" | "localtimestamp" => return Ok(Value::Timestamp(Utc::now())),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = expr.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    if expr.len() >= 2 && expr.starts_with('\'') && expr.ends_with('\'') {
        return Ok(Value::Text(expr[1..expr.len() - 1].replace("''", "'")));
    }
    Err(DbError::Driver(format!("unsupported expression: {}", expr)))
}

fn value_of(expr: &str, args: &mut Args<'_>) -> Result<Value, DbError> {
    if expr == "?" { args.next() } else { literal(expr) }
}

fn predicates(filter: Option<&str>, args: &mut Args<'_>) -> Result<Vec<Predicate>, DbError> {
    let Some(filter) = filter else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for part in filter.split(" AND ") {
        if let Some(caps) = EQ_RE.captures(part) {
            out.push(Predicate::Eq(caps[1].to_string(), args.next()?));
        } else if let Some(caps) = IS_NULL_RE.captures(part) {
            out.push(Predicate::IsNull(caps[1].to_string()));
        } else if let Some(caps) = IN_RE.captures(part) {
            let values = caps["items"]
                .split(", ")
                .map(|item| value_of(item, args))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(Predicate::In(caps[1].to_string(), values));
        } else {
            return Err(DbError::Driver(format!("unsupported predicate: {}", part)));
        }
    }
    Ok(out)
}

fn project(row: &Row, columns: &[&str]) -> Row {
    columns
        .iter()
        .map(|c| {
            let name = unqualified(c);
            (name.to_string(), row.get(name).cloned().unwrap_or_default())
        })
        .collect()
}

/// Driver over in-memory tables. Placeholders are `?`.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    name: String,
    state: Mutex<State>,
    fail_ping: AtomicBool,
    fail_close: AtomicBool,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver carrying a name, handy to tell connections apart.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a table whose integer primary key is assigned on insert.
    pub fn with_table(self, table: &str, primary_key: &str) -> Self {
        self.state.lock().tables.insert(
            table.to_string(),
            Table {
                primary_key: primary_key.to_string(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
        self
    }

    pub fn failing_ping(self) -> Self {
        self.fail_ping.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_close(self) -> Self {
        self.fail_close.store(true, Ordering::SeqCst);
        self
    }

    /// Inserts a row as-is, bypassing statement evaluation and recording.
    pub fn seed(&self, table: &str, row: Row) -> Result<(), DbError> {
        let mut state = self.state.lock();
        let table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::Driver(format!("relation {} does not exist", table)))?;
        insert_row(table, row)?;
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Statements received so far, with their arguments.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.state.lock().statements.clear();
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn run(&self, sql: &str, args: &[Value]) -> Result<(Vec<Row>, u64), DbError> {
        let mut state = self.state.lock();
        state.statements.push((sql.to_string(), args.to_vec()));
        let mut args = Args {
            values: args.iter(),
        };

        if let Some(caps) = SELECT_RE.captures(sql) {
            let columns = split_list(&caps["cols"]);
            let filter = predicates(caps.name("filter").map(|m| m.as_str()), &mut args)?;
            args.finish()?;
            let table = table_ref(&state, &caps["table"])?;
            let mut rows = table
                .rows
                .iter()
                .filter(|row| filter.iter().all(|p| p.matches(row)))
                .map(|row| project(row, &columns))
                .collect::<Vec<_>>();
            if caps.name("limit").is_some() {
                rows.truncate(1);
            }
            let count = rows.len() as u64;
            return Ok((rows, count));
        }

        if let Some(caps) = INSERT_RE.captures(sql) {
            let mut row = Row::new();
            if let (Some(cols), Some(vals)) = (caps.name("cols"), caps.name("vals")) {
                let cols = split_list(cols.as_str());
                let vals = split_list(vals.as_str());
                if cols.len() != vals.len() {
                    return Err(unsupported(sql));
                }
                for (col, val) in cols.into_iter().zip(vals) {
                    row.insert(col.to_string(), value_of(val, &mut args)?);
                }
            }
            args.finish()?;
            let returning = caps.name("ret").map(|m| split_list(m.as_str()));
            let table = table_mut(&mut state, &caps["table"])?;
            let stored = insert_row(table, row)?;
            let rows = returning
                .map(|cols| vec![project(&stored, &cols)])
                .unwrap_or_default();
            return Ok((rows, 1));
        }

        if let Some(caps) = UPDATE_RE.captures(sql) {
            let mut sets = Vec::new();
            for assignment in split_list(&caps["sets"]) {
                let (col, expr) = assignment
                    .split_once(" = ")
                    .ok_or_else(|| unsupported(sql))?;
                sets.push((col.trim().to_string(), value_of(expr.trim(), &mut args)?));
            }
            let filter = predicates(caps.name("filter").map(|m| m.as_str()), &mut args)?;
            args.finish()?;
            let returning = caps.name("ret").map(|m| split_list(m.as_str()));
            let table = table_mut(&mut state, &caps["table"])?;
            let mut rows = Vec::new();
            let mut count = 0;
            for row in table
                .rows
                .iter_mut()
                .filter(|row| filter.iter().all(|p| p.matches(row)))
            {
                for (col, value) in &sets {
                    row.insert(col.clone(), value.clone());
                }
                if let Some(cols) = &returning {
                    rows.push(project(row, cols));
                }
                count += 1;
            }
            return Ok((rows, count));
        }

        if let Some(caps) = DELETE_RE.captures(sql) {
            let filter = predicates(caps.name("filter").map(|m| m.as_str()), &mut args)?;
            args.finish()?;
            let table = table_mut(&mut state, &caps["table"])?;
            let before = table.rows.len();
            table.rows.retain(|row| !filter.iter().all(|p| p.matches(row)));
            return Ok((Vec::new(), (before - table.rows.len()) as u64));
        }

        Err(unsupported(sql))
    }
}

fn table_ref<'s>(state: &'s State, name: &str) -> Result<&'s Table, DbError> {
    state
        .tables
        .get(name)
        .ok_or_else(|| DbError::Driver(format!("relation {} does not exist", name)))
}

fn table_mut<'s>(state: &'s mut State, name: &str) -> Result<&'s mut Table, DbError> {
    state
        .tables
        .get_mut(name)
        .ok_or_else(|| DbError::Driver(format!("relation {} does not exist", name)))
}

/// Assigns the serial key when absent and rejects duplicate keys.
fn insert_row(table: &mut Table, mut row: Row) -> Result<Row, DbError> {
    let pk = table.primary_key.clone();
    match row.get(&pk).cloned().unwrap_or_default() {
        Value::Null => {
            row.insert(pk.clone(), Value::Int(table.next_id));
            table.next_id += 1;
        }
        Value::Int(id) => table.next_id = table.next_id.max(id + 1),
        _ => {}
    }

    let key = row.get(&pk).cloned().unwrap_or_default();
    if table.rows.iter().any(|r| r.get(&pk) == Some(&key)) {
        return Err(DbError::Integrity {
            kind: IntegrityKind::Unique,
            constraint: Some(format!("{}_pkey", pk)),
            source: None,
        });
    }

    table.rows.push(row.clone());
    Ok(row)
}

impl Driver for MemoryDriver {
    fn bind_type(&self) -> BindType {
        BindType::Question
    }

    async fn fetch_one(&self, sql: &str, args: &[Value]) -> Result<Row, DbError> {
        let (rows, _) = self.run(sql, args)?;
        rows.into_iter().next().ok_or(DbError::DoesNotExist)
    }

    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError> {
        let (rows, _) = self.run(sql, args)?;
        Ok(rows)
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let (_, count) = self.run(sql, args)?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::Temporary);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::Driver(format!("{} failed to close", self.name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_respects_parentheses() {
        assert_eq!(
            split_list("a, coalesce(b, c), now()"),
            vec!["a", "coalesce(b, c)", "now()"]
        );
    }

    #[test]
    fn literal_defaults() {
        assert_eq!(literal("42").unwrap(), Value::Int(42));
        assert_eq!(literal("'it''s'").unwrap(), Value::Text("it's".into()));
        assert!(matches!(literal("NOW()").unwrap(), Value::Timestamp(_)));
        assert!(literal("gen_random_uuid()").is_err());
    }

    #[tokio::test]
    async fn evaluates_builder_statements() {
        let db = MemoryDriver::new().with_table("users", "id");
        let row = db
            .fetch_one(
                "INSERT INTO users (username, is_active) VALUES (?, true) RETURNING id, is_active",
                &[Value::from("jdoe")],
            )
            .await
            .unwrap();
        assert_eq!(row["id"], Value::Int(1));
        assert_eq!(row["is_active"], Value::Bool(true));

        let rows = db
            .fetch_all(
                "SELECT users.id, users.username FROM users WHERE id IN (?, ?)",
                &[Value::Int(1), Value::Int(2)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], Value::from("jdoe"));

        let affected = db
            .execute("DELETE FROM users WHERE id = ?", &[Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(affected, 1);
        assert!(db.rows("users").is_empty());
        assert_eq!(db.statements().len(), 3);
    }

    #[tokio::test]
    async fn null_never_equals_null() {
        let db = MemoryDriver::new().with_table("users", "id");
        db.execute(
            "INSERT INTO users (username, avatar_id) VALUES (?, NULL)",
            &[Value::from("ann")],
        )
        .await
        .unwrap();
        db.execute(
            "INSERT INTO users (username, avatar_id) VALUES (?, ?)",
            &[Value::from("bob"), Value::Int(4)],
        )
        .await
        .unwrap();

        let rows = db
            .fetch_all("SELECT username FROM users WHERE avatar_id IS NULL", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], Value::from("ann"));

        let rows = db
            .fetch_all(
                "SELECT username FROM users WHERE avatar_id IN (NULL, ?)",
                &[Value::Int(4)],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], Value::from("bob"));
    }
}
