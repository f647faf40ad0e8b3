use std::fmt;

use crate::db::interfaces::DynEntity;
use crate::db::schema::Schema;
use crate::db::value::{Params, Value};
use crate::errors::{Error, Result};

/// Placeholder style understood by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindType {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Dollar,
}

/// A statement as it was issued: positional SQL (before rebinding), its
/// arguments, the named parameters it was compiled from and whether it
/// fetches a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub query: String,
    pub args: Vec<Value>,
    pub params: Params,
    pub fetch_one: bool,
}

pub type Queries = Vec<Query>;

impl Query {
    /// Compiles `sql` containing `:name` placeholders against `params`.
    pub fn named(sql: &str, params: Params, fetch_one: bool) -> Result<Self> {
        let (query, args) = compile_named(sql, &params)?;
        Ok(Self {
            query,
            args,
            params,
            fetch_one,
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query)?;
        if !self.args.is_empty() {
            write!(f, " -- args: ")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
        }
        Ok(())
    }
}

/// Replaces `:name` placeholders by `?` and collects the matching arguments in
/// order. List values expand to `?, ?, ...`. Postgres `::` casts and quoted
/// literals are left alone.
///
/// `NULL` values are written inline and never bound: an untyped bound NULL
/// cannot be assigned to or compared with an arbitrary column type.
pub fn compile_named(sql: &str, params: &Params) -> Result<(String, Vec<Value>)> {
    let mut out = String::with_capacity(sql.len());
    let mut args = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                out.push(ch);
            }
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                out.push_str("::");
            }
            ':' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                    continue;
                }
                let value = params.get(&name).ok_or_else(|| {
                    Error::configuration(format!("missing value for named parameter :{}", name))
                })?;
                match value {
                    Value::List(items) if items.is_empty() => {
                        return Err(Error::configuration(format!(
                            "empty list bound to :{}",
                            name
                        )));
                    }
                    Value::List(items) => {
                        for (i, item) in items.iter().enumerate() {
                            if i > 0 {
                                out.push_str(", ");
                            }
                            push_arg(&mut out, &mut args, item);
                        }
                    }
                    other => push_arg(&mut out, &mut args, other),
                }
            }
            _ => out.push(ch),
        }
    }

    Ok((out, args))
}

fn push_arg(out: &mut String, args: &mut Vec<Value>, value: &Value) {
    if value.is_null() {
        out.push_str("NULL");
    } else {
        out.push('?');
        args.push(value.clone());
    }
}

/// Rewrites `?` placeholders into the driver's bind style.
pub fn rebind(bind_type: BindType, sql: &str) -> String {
    if bind_type == BindType::Question {
        return sql.to_string();
    }

    let mut param_index = 1;
    let mut result = String::with_capacity(sql.len() + 8);
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match (quote, ch) {
            (Some(q), c) => {
                result.push(c);
                if c == q {
                    quote = None;
                }
            }
            (None, '\'' | '"') => {
                quote = Some(ch);
                result.push(ch);
            }
            (None, '?') => {
                result.push('$');
                result.push_str(&param_index.to_string());
                param_index += 1;
            }
            (None, c) => result.push(c),
        }
    }
    result
}

/// Naive statement builder. Fragments are appended verbatim.
#[derive(Debug, Default)]
pub struct Statement {
    sql: String,
    where_done: bool,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, sql_fragment: &str) -> Self {
        if !self.sql.is_empty() {
            self.sql.push(' ');
        }
        self.sql.push_str(sql_fragment);
        self
    }

    pub fn filter(mut self, condition: &str) -> Self {
        if !self.where_done {
            self.sql.push_str(" WHERE ");
            self.where_done = true;
        } else {
            self.sql.push_str(" AND ");
        }
        self.sql.push_str(condition);
        self
    }

    pub fn returning(self, columns: &[&str]) -> Self {
        if columns.is_empty() {
            return self;
        }
        let list = columns.join(", ");
        self.push("RETURNING").push(&list)
    }

    pub fn build(self) -> String {
        self.sql
    }
}

fn check_param_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::configuration(format!(
            "'{}' is not a valid parameter name",
            name
        )));
    }
    Ok(())
}

/// `SELECT <qualified columns> FROM table WHERE p1 = :p1 AND ...`, with
/// `LIMIT 1` when a single row is expected. List values become `IN` lists,
/// `NULL` values become `IS NULL`.
pub fn where_query(schema: &Schema, params: Params, fetch_one: bool) -> Result<Query> {
    let mut stmt = Statement::new()
        .push("SELECT")
        .push(&schema.column_paths())
        .push("FROM")
        .push(schema.table_name);

    for (name, value) in &params {
        check_param_name(name)?;
        stmt = match value {
            Value::Null => stmt.filter(&format!("{} IS NULL", name)),
            Value::List(_) => stmt.filter(&format!("{} IN (:{})", name, name)),
            _ => stmt.filter(&format!("{} = :{}", name, name)),
        };
    }

    if fetch_one {
        stmt = stmt.push("LIMIT 1");
    }

    Query::named(&stmt.build(), params, fetch_one)
}

/// Named SQL of an insert-or-update plus the columns read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStatement {
    pub sql: String,
    pub returning: Vec<String>,
    pub is_insert: bool,
}

/// Builds `INSERT` for a zero primary key, `UPDATE ... WHERE pk = :pk`
/// otherwise. Ignored columns are never written; defaulted columns are
/// written as their literal expression. Both are read back.
///
/// An entity with no writable column has nothing to update: the update path
/// only reads the ignored columns back with a `SELECT`.
pub fn save_statement(schema: &Schema, instance: &dyn DynEntity) -> SaveStatement {
    let mut columns = Vec::new();
    let mut values = Vec::new();
    let mut returning = Vec::new();

    for field in schema.fields.values() {
        let column = field.column.name.as_str();
        if field.ignored || field.default.is_some() {
            returning.push(column);
        }
        if field.ignored {
            continue;
        }
        columns.push(column);
        match field.default {
            Some(expr) => values.push(expr.to_string()),
            None => values.push(format!(":{}", column)),
        }
    }

    let pk = &schema.primary_key.column.name;
    let is_insert = instance.primary_key().is_zero();

    let stmt = if is_insert {
        let stmt = Statement::new().push("INSERT INTO").push(schema.table_name);
        if columns.is_empty() {
            stmt.push("DEFAULT VALUES")
        } else {
            stmt.push(&format!("({})", columns.join(", ")))
                .push("VALUES")
                .push(&format!("({})", values.join(", ")))
        }
    } else if columns.is_empty() {
        let sql = Statement::new()
            .push("SELECT")
            .push(&returning.join(", "))
            .push("FROM")
            .push(schema.table_name)
            .filter(&format!("{} = :{}", pk, pk))
            .push("LIMIT 1")
            .build();
        return SaveStatement {
            sql,
            returning: returning.into_iter().map(str::to_string).collect(),
            is_insert,
        };
    } else {
        let updates = columns
            .iter()
            .zip(&values)
            .map(|(c, v)| format!("{} = {}", c, v))
            .collect::<Vec<_>>()
            .join(", ");
        Statement::new()
            .push("UPDATE")
            .push(schema.table_name)
            .push("SET")
            .push(&updates)
            .filter(&format!("{} = :{}", pk, pk))
    };

    SaveStatement {
        sql: stmt.returning(&returning).build(),
        returning: returning.into_iter().map(str::to_string).collect(),
        is_insert,
    }
}

pub fn delete_statement(schema: &Schema) -> String {
    let pk = &schema.primary_key.column.name;
    Statement::new()
        .push("DELETE FROM")
        .push(schema.table_name)
        .filter(&format!("{} = :{}", pk, pk))
        .build()
}

/// `UPDATE table SET col = :col WHERE pk = :pk` for the timestamp field.
/// Returns the statement and the column to bind the timestamp to.
pub fn soft_delete_statement(schema: &Schema, field: &str) -> Result<(String, String)> {
    let column = schema.column(field).ok_or_else(|| {
        Error::configuration(format!("{} has no field named {}", schema.type_name, field))
    })?;
    let pk = &schema.primary_key.column.name;
    let sql = Statement::new()
        .push("UPDATE")
        .push(schema.table_name)
        .push("SET")
        .push(&format!("{} = :{}", column.name, column.name))
        .filter(&format!("{} = :{}", pk, pk))
        .build();
    Ok((sql, column.name.clone()))
}
