//! Collection storage.
//!
//! A collection holds a set of tuples with per-column hash indices for joins,
//! plus the two staging buffers that take effect at the next tick boundary.

use std::fmt;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::schema::Schema;
use crate::sink::Collaborators;
use crate::value::{Tuple, Value};

/// How a collection's content behaves across tick boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Persistence {
    /// Cleared at the start of every tick.
    Scratch,
    /// Persists across ticks.
    Table,
    /// A table whose accepted and removed tuples are mirrored to the store.
    DurableTable,
    /// Write-only; tuples are forwarded to the stream sink and not retained.
    StreamSink,
}

impl Persistence {
    pub fn keyword(self) -> &'static str {
        match self {
            Persistence::Scratch => "scratch",
            Persistence::Table => "table",
            Persistence::DurableTable => "sqltable",
            Persistence::StreamSink => "stream",
        }
    }

    /// Whether rules may read this collection.
    pub fn is_readable(self) -> bool {
        self != Persistence::StreamSink
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Storage for a single collection.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    schema: Schema,
    persistence: Persistence,
    /// All tuples, stored as a Vec for index-based access.
    tuples: Vec<Tuple>,
    /// Deduplication set.
    seen: FxHashSet<Tuple>,
    /// Indices of tuples added in the current pass.
    delta: Vec<usize>,
    /// Indices of tuples added in the previous pass (for semi-naive).
    recent: Vec<usize>,
    recent_set: FxHashSet<usize>,
    /// Per-column index: (column, value) → tuple indices.
    indices: Vec<FxHashMap<Value, Vec<usize>>>,
    /// Key prefix → tuple index, maintained for keyed schemas only.
    key_index: FxHashMap<Vec<Value>, usize>,
    pending_next: IndexSet<Tuple>,
    pending_retract: IndexSet<Tuple>,
    /// Tuples a stream sink already forwarded this tick.
    emitted: FxHashSet<Tuple>,
}

impl Collection {
    pub fn new(name: impl Into<String>, schema: Schema, persistence: Persistence) -> Self {
        let arity = schema.arity();
        Collection {
            name: name.into(),
            schema,
            persistence,
            tuples: Vec::new(),
            seen: FxHashSet::default(),
            delta: Vec::new(),
            recent: Vec::new(),
            recent_set: FxHashSet::default(),
            indices: (0..arity).map(|_| FxHashMap::default()).collect(),
            key_index: FxHashMap::default(),
            pending_next: IndexSet::new(),
            pending_retract: IndexSet::new(),
            emitted: FxHashSet::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn contains(&self, tuple: &[Value]) -> bool {
        self.seen.contains(tuple)
    }

    /// Iterate over current content in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    /// Snapshot of current content. Staged deltas are not included.
    pub fn contents(&self) -> Vec<Tuple> {
        self.tuples.clone()
    }

    /// Tuples staged to be merged at the next tick boundary.
    pub fn pending_next(&self) -> impl Iterator<Item = &Tuple> {
        self.pending_next.iter()
    }

    /// Tuples staged to be removed at the next tick boundary.
    pub fn pending_retract(&self) -> impl Iterator<Item = &Tuple> {
        self.pending_retract.iter()
    }

    /// Merge tuples into the collection immediately.
    ///
    /// Tables union the tuples into their content and return how many were
    /// new; merging a tuple already present is a no-op. Durable tables persist
    /// each new tuple before accepting it. Stream sinks forward each tuple to
    /// the sink once per tick and return how many were forwarded.
    ///
    /// The batch is validated as a whole before anything is applied.
    pub fn merge_now(
        &mut self,
        tuples: impl IntoIterator<Item = Tuple>,
        io: &mut Collaborators,
    ) -> Result<usize> {
        let batch = self.validate_batch(tuples, None)?;
        if self.persistence == Persistence::StreamSink {
            return self.forward(batch, io);
        }
        let mut added = 0;
        for tuple in batch {
            if self.seen.contains(&tuple) {
                continue;
            }
            if self.persistence == Persistence::DurableTable {
                io.persist(&self.name, &tuple)?;
            }
            self.insert(tuple);
            added += 1;
        }
        Ok(added)
    }

    /// Stage tuples to be merged at the start of the next tick.
    pub fn stage_merge(&mut self, tuples: impl IntoIterator<Item = Tuple>) -> Result<()> {
        for tuple in tuples {
            self.check(&tuple)?;
            self.pending_next.insert(tuple);
        }
        Ok(())
    }

    /// Stage a replacement: every tuple currently in the collection is removed
    /// at the start of the next tick unless the staged batches resupply it.
    pub fn stage_retract_then_merge(&mut self, tuples: impl IntoIterator<Item = Tuple>) -> Result<()> {
        let tuples: Vec<Tuple> = tuples.into_iter().collect();
        for tuple in &tuples {
            self.check(tuple)?;
        }
        self.pending_retract.extend(self.tuples.iter().cloned());
        self.pending_next.extend(tuples);
        Ok(())
    }

    /// Apply the tick boundary: clear scratch content, remove retracted tuples
    /// that are not resupplied, merge staged tuples, and empty both buffers.
    ///
    /// The staged batch is checked before anything changes, and the store is
    /// written before memory. On error the buffers and content are left as
    /// they were, so the boundary can be retried.
    pub fn advance_tick(&mut self, io: &mut Collaborators) -> Result<()> {
        let (removed, incoming) = self.prepare_boundary()?;

        if self.persistence == Persistence::StreamSink {
            self.emitted.clear();
            self.forward(incoming, io)?;
            self.clear_staged();
            return Ok(());
        }

        if self.persistence == Persistence::DurableTable {
            for tuple in self.tuples.iter().filter(|t| removed.contains(*t)) {
                io.retract(&self.name, tuple)?;
            }
            for tuple in incoming.iter().filter(|t| !self.seen.contains(*t)) {
                io.persist(&self.name, tuple)?;
            }
        }

        if !removed.is_empty() {
            let kept: Vec<Tuple> = std::mem::take(&mut self.tuples)
                .into_iter()
                .filter(|t| !removed.contains(t))
                .collect();
            self.rebuild(kept);
        }
        for tuple in incoming {
            self.insert(tuple);
        }

        self.clear_staged();
        self.delta.clear();
        self.clear_recent();
        Ok(())
    }

    /// Check that the staged batch can be applied at the next boundary.
    pub fn check_boundary(&self) -> Result<()> {
        self.prepare_boundary().map(drop)
    }

    /// Drop both staging buffers, returning the tuples that were staged to
    /// be merged.
    pub fn discard_staged(&mut self) -> Vec<Tuple> {
        self.pending_retract.clear();
        std::mem::take(&mut self.pending_next).into_iter().collect()
    }

    fn clear_staged(&mut self) {
        self.pending_next.clear();
        self.pending_retract.clear();
    }

    /// The tuples the boundary removes and the validated batch it merges.
    fn prepare_boundary(&self) -> Result<(FxHashSet<Tuple>, Vec<Tuple>)> {
        let staged = self.pending_next.iter().cloned();
        if self.persistence == Persistence::StreamSink {
            return Ok((FxHashSet::default(), staged.collect()));
        }
        let removed: FxHashSet<Tuple> = if self.persistence == Persistence::Scratch {
            self.tuples.iter().cloned().collect()
        } else {
            self.pending_retract
                .iter()
                .filter(|t| !self.pending_next.contains(*t) && self.seen.contains(*t))
                .cloned()
                .collect()
        };
        let incoming = self.validate_batch(staged, Some(&removed))?;
        Ok((removed, incoming))
    }

    /// Forget which tuples a stream sink already forwarded, so the next push
    /// of any tuple reaches the sink again.
    pub(crate) fn reset_emitted(&mut self) {
        self.emitted.clear();
    }

    /// Load tuples without mirroring them to the store.
    pub(crate) fn hydrate(&mut self, tuples: Vec<Tuple>) -> Result<usize> {
        let batch = self.validate_batch(tuples, None)?;
        let before = self.tuples.len();
        for tuple in batch {
            self.insert(tuple);
        }
        self.delta.clear();
        Ok(self.tuples.len() - before)
    }

    fn check(&self, tuple: &[Value]) -> Result<()> {
        self.schema
            .check(tuple)
            .map_err(|e| EvalError::schema(&self.name, e))
    }

    /// Check schema conformance and key uniqueness of a batch against the
    /// current content (ignoring tuples in `removed`) and within the batch.
    /// Returns the batch with duplicates collapsed.
    fn validate_batch(
        &self,
        tuples: impl IntoIterator<Item = Tuple>,
        removed: Option<&FxHashSet<Tuple>>,
    ) -> Result<Vec<Tuple>> {
        let mut batch: IndexSet<Tuple> = IndexSet::new();
        for tuple in tuples {
            self.check(&tuple)?;
            batch.insert(tuple);
        }
        if !self.schema.is_keyed() || self.persistence == Persistence::StreamSink {
            return Ok(batch.into_iter().collect());
        }

        let mut batch_keys: FxHashMap<&[Value], &Tuple> = FxHashMap::default();
        for tuple in &batch {
            let key = self.schema.key(tuple);
            if let Some(&idx) = self.key_index.get(key) {
                let existing = &self.tuples[idx];
                let still_present = removed.is_none_or(|r| !r.contains(existing));
                if still_present && existing != tuple {
                    return Err(self.key_conflict(key, existing, tuple));
                }
            }
            if let Some(other) = batch_keys.insert(key, tuple)
                && other != tuple
            {
                return Err(self.key_conflict(key, other, tuple));
            }
        }
        Ok(batch.into_iter().collect())
    }

    fn key_conflict(&self, key: &[Value], existing: &[Value], incoming: &[Value]) -> EvalError {
        EvalError::KeyConflict {
            collection: self.name.clone(),
            key: key.to_vec(),
            existing: existing.to_vec(),
            incoming: incoming.to_vec(),
        }
    }

    fn forward(&mut self, batch: Vec<Tuple>, io: &mut Collaborators) -> Result<usize> {
        let mut forwarded = 0;
        for tuple in batch {
            if self.emitted.contains(&tuple) {
                continue;
            }
            io.emit(&self.name, &tuple)?;
            self.emitted.insert(tuple);
            forwarded += 1;
        }
        Ok(forwarded)
    }

    /// Insert a validated tuple. Returns true if it was new.
    fn insert(&mut self, tuple: Tuple) -> bool {
        if !self.seen.insert(tuple.clone()) {
            return false;
        }
        let idx = self.tuples.len();
        for (col, val) in tuple.iter().enumerate() {
            self.indices[col].entry(val.clone()).or_default().push(idx);
        }
        if self.schema.is_keyed() {
            self.key_index.insert(self.schema.key(&tuple).to_vec(), idx);
        }
        self.tuples.push(tuple);
        self.delta.push(idx);
        true
    }

    /// Reset storage to exactly `tuples`.
    fn rebuild(&mut self, tuples: Vec<Tuple>) {
        self.seen.clear();
        self.key_index.clear();
        for index in &mut self.indices {
            index.clear();
        }
        self.delta.clear();
        self.clear_recent();
        for tuple in tuples {
            self.insert(tuple);
        }
    }

    // ─── Semi-naive bookkeeping ─────────────────────────────────────

    /// Iterate over tuples added in the previous pass.
    pub fn iter_recent(&self) -> impl Iterator<Item = &Tuple> {
        self.recent.iter().map(|&i| &self.tuples[i])
    }

    pub fn has_recent(&self) -> bool {
        !self.recent.is_empty()
    }

    /// Look up tuples matching a value in the given column.
    pub fn lookup(&self, col: usize, value: &Value) -> &[usize] {
        self.indices
            .get(col)
            .and_then(|idx| idx.get(value))
            .map_or(&[], Vec::as_slice)
    }

    /// Get a tuple by the index [`Collection::lookup`] reports.
    pub fn get(&self, idx: usize) -> Option<&Tuple> {
        self.tuples.get(idx)
    }

    pub fn is_recent(&self, idx: usize) -> bool {
        self.recent_set.contains(&idx)
    }

    /// Move delta to recent, clear delta. Returns true if there were changes.
    pub(crate) fn advance(&mut self) -> bool {
        let had_delta = !self.delta.is_empty();
        self.recent = std::mem::take(&mut self.delta);
        self.recent_set = self.recent.iter().copied().collect();
        had_delta
    }

    pub(crate) fn clear_recent(&mut self) {
        self.recent.clear();
        self.recent_set.clear();
    }
}
