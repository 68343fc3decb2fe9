// SQLite store rooted at a volume directory.
//
// Database ids are relative paths like `my-app/db.sqlite` resolved under
// the volume root. Connections are opened per call: the broker holds no
// long-lived handles, so it never blocks the single writer.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Number, Value};

use tablecast_common::protocol::ws::Row;

use super::StoreAdapter;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    root: PathBuf,
}

impl SqliteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a logical id under the volume root, rejecting escapes.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if path.is_absolute()
            || path.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            bail!("path `{relative}` escapes the volume root");
        }
        Ok(self.root.join(path))
    }

    fn open(&self, db_path: &str) -> Result<Connection> {
        let path = self.resolve(db_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory `{}`", parent.display())
            })?;
        }
        Connection::open(&path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))
    }
}

impl StoreAdapter for SqliteStore {
    fn query(&self, db_path: &str, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.open(db_path)?;
        let mut stmt = conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare query against `{db_path}`"))?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|name| name.to_string()).collect();

        let params: Vec<rusqlite::types::Value> =
            params.iter().map(json_to_sql).collect::<Result<_>>()?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .with_context(|| format!("failed to execute query against `{db_path}`"))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().context("failed to step query results")? {
            let mut object = Row::new();
            for (index, name) in column_names.iter().enumerate() {
                let value = row.get_ref(index).context("failed to read result column")?;
                object.insert(name.clone(), sql_to_json(value));
            }
            out.push(object);
        }
        Ok(out)
    }

    fn run(&self, db_path: &str, sql: &str) -> Result<()> {
        let conn = self.open(db_path)?;
        conn.execute_batch(sql)
            .with_context(|| format!("failed to execute statements against `{db_path}`"))
    }

    fn watch_path(&self, db_path: &str) -> Result<PathBuf> {
        self.resolve(db_path)
    }

    fn read_file(&self, file_path: &str) -> Result<String> {
        let path = self.resolve(file_path)?;
        fs::read_to_string(&path)
            .with_context(|| format!("failed to read volume file `{}`", path.display()))
    }

    fn write_file(&self, file_path: &str, content: &str) -> Result<()> {
        let path = self.resolve(file_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create volume directory `{}`", parent.display())
            })?;
        }
        fs::write(&path, content)
            .with_context(|| format!("failed to write volume file `{}`", path.display()))
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Number(v.into()),
        ValueRef::Real(v) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

fn json_to_sql(value: &Value) -> Result<rusqlite::types::Value> {
    use rusqlite::types::Value as SqlValue;
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                SqlValue::Integer(v)
            } else if let Some(v) = n.as_f64() {
                SqlValue::Real(v)
            } else {
                bail!("unsupported numeric parameter `{n}`")
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => bail!("unsupported parameter type `{other}`"),
    })
}
