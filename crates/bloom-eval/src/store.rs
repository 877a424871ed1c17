//! Durable store implementations.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::schema::Schema;
use crate::sink::DurableStore;
use crate::value::{Tuple, Value};

/// In-memory store. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Rc<RefCell<FxHashMap<String, IndexSet<Tuple>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table before handing the store to an engine.
    pub fn with_rows(self, collection: &str, rows: impl IntoIterator<Item = Tuple>) -> Self {
        self.tables
            .borrow_mut()
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, collection: &str) -> Vec<Tuple> {
        self.tables
            .borrow()
            .get(collection)
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl DurableStore for MemoryStore {
    fn load(&mut self, collection: &str, _schema: &Schema) -> Result<Vec<Tuple>, BoxError> {
        Ok(self.rows(collection))
    }

    fn persist(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        self.tables
            .borrow_mut()
            .entry(collection.to_string())
            .or_default()
            .insert(tuple.to_vec());
        Ok(())
    }

    fn retract(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        if let Some(rows) = self.tables.borrow_mut().get_mut(collection) {
            rows.shift_remove(tuple);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum Op {
    #[serde(rename = "+")]
    Persist,
    #[serde(rename = "-")]
    Retract,
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    op: Op,
    tuple: Tuple,
}

/// File-backed store: one append-only JSON-lines log per collection.
///
/// Each line records either a persisted or a retracted tuple; loading replays
/// the log in order.
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    files: FxHashMap<String, File>,
}

impl JsonlStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(JsonlStore {
            dir,
            files: FxHashMap::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    fn append(&mut self, collection: &str, op: Op, tuple: &[Value]) -> Result<(), BoxError> {
        if !self.files.contains_key(collection) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path(collection))?;
            self.files.insert(collection.to_string(), file);
        }
        let Some(file) = self.files.get_mut(collection) else {
            return Ok(());
        };
        let record = Record {
            op,
            tuple: tuple.to_vec(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl DurableStore for JsonlStore {
    fn load(&mut self, collection: &str, _schema: &Schema) -> Result<Vec<Tuple>, BoxError> {
        let path = self.log_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut rows: IndexSet<Tuple> = IndexSet::new();
        for (lineno, line) in BufReader::new(File::open(&path)?).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line)
                .map_err(|e| format!("{}:{}: {e}", path.display(), lineno + 1))?;
            match record.op {
                Op::Persist => {
                    rows.insert(record.tuple);
                }
                Op::Retract => {
                    rows.shift_remove(&record.tuple);
                }
            }
        }
        tracing::debug!(collection, rows = rows.len(), path = %path.display(), "replayed store log");
        Ok(rows.into_iter().collect())
    }

    fn persist(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        self.append(collection, Op::Persist, tuple)
    }

    fn retract(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        self.append(collection, Op::Retract, tuple)
    }
}
