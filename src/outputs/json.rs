//! Incremental JSON array store.
//!
//! Every finalized listing is appended as soon as it is ready, so a crash
//! loses at most the listing in flight. Each append re-reads the whole file,
//! appends in memory and atomically replaces the file (temp file + rename).
//!
//! # Concurrency
//!
//! All page workers share one [`JsonStore`]. The read-modify-write cycle is
//! serialized by an async mutex; without it two workers could read the same
//! snapshot and overwrite each other's additions.
//!
//! # Recovery
//!
//! A missing or empty file is an empty store. Unparsable content (e.g. from a
//! crash in an older, non-atomic writer) or a document that is not an array is
//! logged and treated as empty; it is overwritten on the next successful
//! append. A well-formed array is always preserved, including entries in an
//! older record layout.

use crate::error::StoreError;
use crate::models::ListingRecord;
use crate::utils::looks_truncated;
use serde::Serialize;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Append-only store of [`ListingRecord`]s in a single JSON array file.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, returning the number of records now stored.
    ///
    /// Takes the record by value: once handed over it is never mutated.
    ///
    /// # Errors
    ///
    /// [`StoreError`] if the new file cannot be serialized, written or renamed
    /// into place. The previous file content is left intact in that case.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), reference = %record.reference()))]
    pub async fn append(&self, record: ListingRecord) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.load_entries().await;
        entries.push(serde_json::to_value(&record)?);
        self.replace(&entries).await?;

        debug!(total = entries.len(), "Appended record");
        Ok(entries.len())
    }

    /// Read every stored record. Never fails: absent or corrupt content is empty.
    ///
    /// Entries written by other tools that do not carry every field are kept
    /// in the file but not returned here.
    pub async fn load(&self) -> Vec<ListingRecord> {
        let entries = self.load_entries().await;
        let total = entries.len();
        let records: Vec<ListingRecord> = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();
        if records.len() < total {
            debug!(total, readable = records.len(), "Some stored entries are in a foreign format");
        }
        records
    }

    /// Raw array entries. Only unparsable JSON or a non-array document counts as corrupt.
    async fn load_entries(&self) -> Vec<Value> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "Could not read store; treating as empty");
                return Vec::new();
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Array(entries)) => entries,
            Ok(other) => {
                warn!(
                    kind = json_kind(&other),
                    "Store does not hold a JSON array; treating as empty, it will be overwritten"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(
                    error = %e,
                    truncated = looks_truncated(&e),
                    bytes = bytes.len(),
                    "Store content is malformed; treating as empty, it will be overwritten"
                );
                Vec::new()
            }
        }
    }

    async fn replace(&self, entries: &[Value]) -> Result<(), StoreError> {
        let body = to_pretty_json(entries)?;
        let tmp = self.tmp_path();

        fs::write(&tmp, &body).await?;
        // rename() replaces the target atomically on the same filesystem.
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Log how many records a previous run left behind.
    pub async fn report_existing(&self) {
        let existing = self.load_entries().await.len();
        info!(path = %self.path.display(), existing, "Opened listing store");
    }
}

/// Serialize with a 4-space indent, keeping non-ASCII text verbatim.
fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
