// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `table` service: column-typed row stores shared between the steps of
//! an activity thread.
//!
//! | Type | Storage |
//! |------|---------|
//! | `memory_table` | in-process rows |
//! | `csv_table` | CSV file at `meta.path`, with a title row unless `meta.has_title` is false |
//!
//! Actions (the table is referenced by `args.table`):
//!
//! | Action | Arguments | Data |
//! |--------|-----------|------|
//! | `declare` | `columns`, `meta` | |
//! | `append` | `rows` (lists or maps) | `{count}` |
//! | `to_list` | `row_style` (`map`/`list`), `columns` | `{list}` |
//! | `to_messages` | `message_type`, `message_bus`, `columns`, `batch_size`, `sleep` | `{count}` |
//! | `drop` | | |
//!
//! Rows are stored padded or truncated to the column count.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::bus::MessageBusManager;
use courier_core::message::{Message, RawMessage, now_millis};
use courier_core::resource::{FnReleaseHandler, ResourceTracer};
use courier_core::{RequestHandler, ServiceError, ServiceRequestMessage, ServiceResult};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::resource_ref::{ResourceRef, full_name};

/// Rows per bus write when `batch_size` is not given.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Table store types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// `memory_table`
    Memory,
    /// `csv_table`
    Csv,
}

impl TableKind {
    /// All supported types.
    pub const ALL: [TableKind; 2] = [TableKind::Memory, TableKind::Csv];

    /// Resolve a type string.
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "memory_table" => Ok(TableKind::Memory),
            "csv_table" => Ok(TableKind::Csv),
            other => Err(StoreError::UnknownType {
                family: "table",
                kind: other.to_string(),
            }),
        }
    }

    /// The type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Memory => "memory_table",
            TableKind::Csv => "csv_table",
        }
    }
}

/// Column definition: a bare name or `{name, title?}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "ColumnDef")]
pub struct Column {
    /// Key used in row maps.
    pub name: String,
    /// Display title, written as the CSV title row.
    pub title: String,
}

impl Column {
    /// Column whose title is its name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnDef {
    Name(String),
    Full { name: String, title: Option<String> },
}

impl From<ColumnDef> for Column {
    fn from(def: ColumnDef) -> Self {
        match def {
            ColumnDef::Name(name) => Column::named(name),
            ColumnDef::Full { name, title } => Column {
                title: title.unwrap_or_else(|| name.clone()),
                name,
            },
        }
    }
}

/// How `to_list` renders rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStyle {
    /// Positional values.
    List,
    /// Column name to value.
    Map,
}

impl RowStyle {
    /// Resolve a style string.
    pub fn parse(style: &str) -> Result<Self> {
        match style {
            "list" => Ok(RowStyle::List),
            "map" => Ok(RowStyle::Map),
            other => Err(StoreError::InvalidRowStyle(other.to_string())),
        }
    }
}

/// Columns and rows read out of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    /// Table columns.
    pub columns: Vec<Column>,
    /// Rows, each with one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    /// Project every row onto `names`, or onto all columns when `names` is
    /// empty. Returns the projected column names and rows.
    pub fn view(&self, names: &[String]) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        if names.is_empty() {
            let names = self.columns.iter().map(|c| c.name.clone()).collect();
            return Ok((names, self.rows.clone()));
        }

        let indices = names
            .iter()
            .map(|name| {
                self.columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| StoreError::UnknownColumn(name.clone()))
            })
            .collect::<Result<Vec<usize>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok((names.to_vec(), rows))
    }
}

fn row_map(names: &[String], row: Vec<Value>) -> Map<String, Value> {
    names.iter().cloned().zip(row).collect()
}

fn normalize_row(columns: &[Column], row: &Value) -> Result<Vec<Value>> {
    match row {
        Value::Array(values) => Ok((0..columns.len())
            .map(|i| values.get(i).cloned().unwrap_or(Value::Null))
            .collect()),
        Value::Object(values) => Ok(columns
            .iter()
            .map(|c| values.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect()),
        _ => Err(StoreError::invalid_args("rows must be lists or maps")),
    }
}

#[derive(Debug, Clone)]
struct CsvTable {
    columns: Vec<Column>,
    path: PathBuf,
    has_title: bool,
}

impl CsvTable {
    /// Attach to `path`, creating the file (with its title row) when absent.
    /// Without declared columns they are taken from the existing title row.
    fn open(path: PathBuf, columns: Vec<Column>, has_title: bool) -> Result<Self> {
        if path.exists() {
            let columns = if columns.is_empty() {
                if !has_title {
                    return Err(StoreError::invalid_args(
                        "csv_table without columns needs a title row",
                    ));
                }
                read_title_row(&path)?
            } else {
                columns
            };
            return Ok(Self {
                columns,
                path,
                has_title,
            });
        }

        if columns.is_empty() {
            return Err(StoreError::invalid_args("csv_table requires columns"));
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        if has_title {
            writer.write_record(columns.iter().map(|c| c.title.as_str()))?;
        }
        writer.flush()?;
        Ok(Self {
            columns,
            path,
            has_title,
        })
    }

    fn append(&self, rows: &[Vec<Value>]) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        for row in rows {
            writer.write_record(row.iter().map(value_to_string))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn rows(&self) -> Result<Vec<Vec<Value>>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(self.has_title)
            .flexible(true)
            .from_path(&self.path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if is_empty_record(&record) {
                continue;
            }
            rows.push(
                (0..self.columns.len())
                    .map(|i| {
                        record
                            .get(i)
                            .map(|s| Value::String(s.to_string()))
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            );
        }
        Ok(rows)
    }
}

fn read_title_row(path: &Path) -> Result<Vec<Column>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    Ok(reader
        .headers()?
        .iter()
        .filter(|title| !title.trim().is_empty())
        .map(Column::named)
        .collect())
}

fn is_empty_record(record: &csv::StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty())
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run blocking file work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

#[derive(Debug)]
enum TableStore {
    Memory {
        columns: Vec<Column>,
        rows: Vec<Vec<Value>>,
    },
    Csv(CsvTable),
}

/// Registered tables, keyed by type and full name.
#[derive(Debug, Default)]
pub struct TableRegistry {
    tables: Mutex<HashMap<(TableKind, String), TableStore>>,
}

impl TableRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing an existing one of the same name.
    pub async fn declare(
        &self,
        kind: TableKind,
        key: &str,
        columns: Vec<Column>,
        reference: &ResourceRef,
    ) -> Result<()> {
        let store = match kind {
            TableKind::Memory => {
                if columns.is_empty() {
                    return Err(StoreError::invalid_args("memory_table requires columns"));
                }
                TableStore::Memory {
                    columns,
                    rows: Vec::new(),
                }
            }
            TableKind::Csv => {
                let path = reference
                    .meta_str("path")
                    .map(PathBuf::from)
                    .ok_or_else(|| StoreError::invalid_args("csv_table requires meta.path"))?;
                let has_title = reference
                    .meta
                    .get("has_title")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                TableStore::Csv(blocking(move || CsvTable::open(path, columns, has_title)).await?)
            }
        };
        self.tables.lock().await.insert((kind, key.to_string()), store);
        Ok(())
    }

    /// Append rows given as lists or maps. Returns the number appended.
    pub async fn append(&self, kind: TableKind, key: &str, rows: &[Value]) -> Result<usize> {
        let csv = {
            let mut tables = self.tables.lock().await;
            match tables.get_mut(&(kind, key.to_string())) {
                Some(TableStore::Memory { columns, rows: stored }) => {
                    let normalized = rows
                        .iter()
                        .map(|row| normalize_row(columns, row))
                        .collect::<Result<Vec<_>>>()?;
                    stored.extend(normalized);
                    return Ok(rows.len());
                }
                Some(TableStore::Csv(csv)) => csv.clone(),
                None => return Err(not_found(kind, key)),
            }
        };

        let normalized = rows
            .iter()
            .map(|row| normalize_row(&csv.columns, row))
            .collect::<Result<Vec<_>>>()?;
        let count = normalized.len();
        blocking(move || csv.append(&normalized)).await?;
        Ok(count)
    }

    /// Read the whole table.
    pub async fn snapshot(&self, kind: TableKind, key: &str) -> Result<TableSnapshot> {
        let csv = match self.tables.lock().await.get(&(kind, key.to_string())) {
            Some(TableStore::Memory { columns, rows }) => {
                return Ok(TableSnapshot {
                    columns: columns.clone(),
                    rows: rows.clone(),
                });
            }
            Some(TableStore::Csv(csv)) => csv.clone(),
            None => return Err(not_found(kind, key)),
        };

        let columns = csv.columns.clone();
        let rows = blocking(move || csv.rows()).await?;
        Ok(TableSnapshot { columns, rows })
    }

    /// Forget a table. A CSV table's file is left in place.
    pub async fn drop_table(&self, kind: TableKind, key: &str) -> Result<()> {
        self.tables
            .lock()
            .await
            .remove(&(kind, key.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found(kind, key))
    }

    /// Whether a table is registered.
    pub async fn contains(&self, kind: TableKind, key: &str) -> bool {
        self.tables.lock().await.contains_key(&(kind, key.to_string()))
    }
}

fn not_found(kind: TableKind, key: &str) -> StoreError {
    StoreError::NotFound {
        kind: kind.as_str().to_string(),
        name: key.to_string(),
    }
}

/// Let the tracer drop temporary tables when their activity thread ends.
pub async fn register_release_handlers(tables: &Arc<TableRegistry>, tracer: &ResourceTracer) {
    for kind in TableKind::ALL {
        let tables = tables.clone();
        let handler = FnReleaseHandler::new(move |activity_id, domain_id: String, name: String| {
            let tables = tables.clone();
            async move {
                tables
                    .drop_table(kind, &full_name(activity_id, &domain_id, &name))
                    .await
                    .map_err(anyhow::Error::from)
            }
        });
        tracer.register_handler(kind.as_str(), Arc::new(handler)).await;
    }
}

/// Handler behind the `table` service.
pub struct TableService {
    tables: Arc<TableRegistry>,
    tracer: Arc<ResourceTracer>,
    buses: Arc<MessageBusManager>,
}

impl TableService {
    /// Build over shared registries. `buses` resolves `to_messages` targets.
    pub fn new(
        tables: Arc<TableRegistry>,
        tracer: Arc<ResourceTracer>,
        buses: Arc<MessageBusManager>,
    ) -> Self {
        Self {
            tables,
            tracer,
            buses,
        }
    }

    async fn dispatch(&self, request: &ServiceRequestMessage) -> Result<ServiceResult> {
        let reference = ResourceRef::from_request(request, "table")?;
        let kind = TableKind::parse(&reference.kind)?;
        let key = full_name(request.activity_id(), request.domain_id(), &reference.name);

        match request.action() {
            "declare" => {
                let columns: Vec<Column> = optional_arg(request, "columns")?;
                self.tables.declare(kind, &key, columns, &reference).await?;
                if reference.tmp {
                    self.tracer
                        .trace(request.activity_id(), request.domain_id(), kind.as_str(), &reference.name)
                        .await;
                }
                debug!(table = %key, kind = kind.as_str(), tmp = reference.tmp, "Declared table");
                Ok(ServiceResult::ok())
            }
            "append" => {
                let rows: Vec<Value> = optional_arg(request, "rows")?;
                let count = self.tables.append(kind, &key, &rows).await?;
                Ok(ServiceResult::ok_with(json!({ "count": count })))
            }
            "to_list" => self.to_list(request, kind, &key).await,
            "to_messages" => self.to_messages(request, kind, &key).await,
            "drop" => {
                self.tables.drop_table(kind, &key).await?;
                Ok(ServiceResult::ok())
            }
            other => Err(StoreError::UnknownAction(other.to_string())),
        }
    }

    async fn to_list(&self, request: &ServiceRequestMessage, kind: TableKind, key: &str) -> Result<ServiceResult> {
        let style = match request.arg("row_style") {
            None | Some(Value::Null) => RowStyle::Map,
            Some(Value::String(s)) => RowStyle::parse(s)?,
            Some(other) => return Err(StoreError::InvalidRowStyle(other.to_string())),
        };
        let view: Vec<String> = optional_arg(request, "columns")?;

        let snapshot = self.tables.snapshot(kind, key).await?;
        let (names, rows) = snapshot.view(&view)?;
        let list: Vec<Value> = rows
            .into_iter()
            .map(|row| match style {
                RowStyle::List => Value::Array(row),
                RowStyle::Map => Value::Object(row_map(&names, row)),
            })
            .collect();
        Ok(ServiceResult::ok_with(json!({ "list": list })))
    }

    async fn to_messages(
        &self,
        request: &ServiceRequestMessage,
        kind: TableKind,
        key: &str,
    ) -> Result<ServiceResult> {
        let message_type = required_str(request, "message_type")?;
        let bus_name = required_str(request, "message_bus")?;
        let view: Vec<String> = optional_arg(request, "columns")?;
        let batch_size = request
            .arg("batch_size")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).max(1))
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let pause = request
            .arg("sleep")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);

        let snapshot = self.tables.snapshot(kind, key).await?;
        let (names, rows) = snapshot.view(&view)?;
        let bus = self
            .buses
            .get_message_bus(bus_name)
            .await
            .map_err(|_| StoreError::BusNotFound(bus_name.to_string()))?;

        let total = rows.len();
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let time = now_millis();
            let batch: Vec<Message> = rows
                .by_ref()
                .take(batch_size)
                .map(|row| Message::Other(RawMessage::new(message_type, "", "", row_map(&names, row), time)))
                .collect();
            bus.write(&batch).await?;
            debug!(table = %key, bus = %bus_name, count = batch.len(), "Wrote table rows as messages");

            if let Some(pause) = pause {
                if rows.peek().is_some() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        info!(table = %key, bus = %bus_name, count = total, "Table converted to messages");
        Ok(ServiceResult::ok_with(json!({ "count": total })))
    }
}

fn required_str<'a>(request: &'a ServiceRequestMessage, name: &str) -> Result<&'a str> {
    request
        .arg(name)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::invalid_args(format!("'{}' must be a string", name)))
}

fn optional_arg<T: serde::de::DeserializeOwned + Default>(
    request: &ServiceRequestMessage,
    name: &str,
) -> Result<T> {
    match request.arg(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => T::deserialize(value)
            .map_err(|e| StoreError::invalid_args(format!("invalid '{}': {}", name, e))),
    }
}

#[async_trait]
impl RequestHandler for TableService {
    async fn handle(&self, request: &ServiceRequestMessage) -> std::result::Result<ServiceResult, ServiceError> {
        Ok(self.dispatch(request).await.unwrap_or_else(ServiceResult::from))
    }
}
