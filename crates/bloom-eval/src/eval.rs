//! Tick-driven fixpoint engine.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::collection::{Collection, Persistence};
use crate::error::{EvalError, Result};
use crate::program::Program;
use crate::rule::{Rule, TemporalOp};
use crate::sink::Collaborators;
use crate::value::Tuple;

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixpoint passes allowed per tick before it is abandoned. `None`
    /// disables the cutoff.
    pub max_iterations: Option<usize>,
    /// Compute per-collection diffs for every [`TickReport`].
    pub track_changes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iterations: Some(100_000),
            track_changes: true,
        }
    }
}

/// Tuples that entered or left one collection during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    pub collection: String,
    pub added: Vec<Tuple>,
    pub removed: Vec<Tuple>,
}

/// Summary of one completed tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Fixpoint passes run across all strata.
    pub iterations: usize,
    /// Collections whose content differs from the end of the previous tick.
    /// Empty when change tracking is off.
    pub changes: Vec<CollectionChange>,
    /// Tuples forwarded to the stream sink.
    pub emitted: usize,
}

impl TickReport {
    pub fn change(&self, collection: &str) -> Option<&CollectionChange> {
        self.changes.iter().find(|c| c.collection == collection)
    }

    /// No collection changed and nothing was emitted.
    pub fn is_quiet(&self) -> bool {
        self.changes.is_empty() && self.emitted == 0
    }
}

/// Owns a program's collections and drives its clock.
#[derive(Debug)]
pub struct Engine {
    program: Program,
    collections: Vec<Collection>,
    io: Collaborators,
    config: EngineConfig,
    tick: u64,
}

impl Engine {
    /// Engine with default configuration, no durable store, and stream sinks
    /// writing to stdout.
    pub fn new(program: Program) -> Result<Self> {
        Engine::with_collaborators(program, EngineConfig::default(), Collaborators::default())
    }

    /// Build an engine, hydrating durable tables from the store and staging
    /// bootstrap rows for tick 0.
    pub fn with_collaborators(
        program: Program,
        config: EngineConfig,
        mut io: Collaborators,
    ) -> Result<Self> {
        let mut collections: Vec<Collection> = program
            .collections()
            .iter()
            .map(|d| Collection::new(d.name.clone(), d.schema.clone(), d.persistence))
            .collect();

        for collection in &mut collections {
            if collection.persistence() != Persistence::DurableTable {
                continue;
            }
            if io.has_store() {
                let rows = io.load(collection.name(), collection.schema())?;
                let loaded = collection.hydrate(rows)?;
                info!(collection = collection.name(), rows = loaded, "hydrated durable table");
            } else {
                warn!(
                    collection = collection.name(),
                    "durable table has no store attached; contents are kept in memory only"
                );
            }
        }

        for (id, rows) in program.bootstrap_rows() {
            collections[id.index()].stage_merge(rows.iter().cloned())?;
        }

        Ok(Engine {
            program,
            collections,
            io,
            config,
            tick: 0,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number the next tick will carry; equal to the ticks that got past
    /// their boundary so far.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.program
            .collection_id(name)
            .map(|id| &self.collections[id.index()])
            .ok_or_else(|| EvalError::UnknownCollection(name.to_string()))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    /// Snapshot of a collection's current content.
    pub fn contents(&self, name: &str) -> Result<Vec<Tuple>> {
        Ok(self.collection(name)?.contents())
    }

    /// Merge tuples into a collection immediately. Returns how many were new
    /// (or, for stream sinks, forwarded).
    pub fn insert(&mut self, name: &str, tuples: impl IntoIterator<Item = Tuple>) -> Result<usize> {
        let idx = self.index(name)?;
        let collection = &mut self.collections[idx];
        // Between ticks a stream forwards every push.
        collection.reset_emitted();
        collection.merge_now(tuples, &mut self.io)
    }

    /// Stage tuples for the next tick.
    pub fn stage_merge(&mut self, name: &str, tuples: impl IntoIterator<Item = Tuple>) -> Result<()> {
        let idx = self.index(name)?;
        self.collections[idx].stage_merge(tuples)
    }

    /// Stage `tuples` as the collection's entire content for the next tick.
    pub fn stage_replace(&mut self, name: &str, tuples: impl IntoIterator<Item = Tuple>) -> Result<()> {
        let idx = self.index(name)?;
        self.collections[idx].stage_retract_then_merge(tuples)
    }

    /// Drop everything staged for a collection, returning the tuples that
    /// were staged to be merged. Lets a host recover from a rejected tick
    /// boundary.
    pub fn discard_staged(&mut self, name: &str) -> Result<Vec<Tuple>> {
        let idx = self.index(name)?;
        Ok(self.collections[idx].discard_staged())
    }

    /// Whether any collection has staged tuples waiting for the next tick.
    pub fn has_pending(&self) -> bool {
        self.collections
            .iter()
            .any(|c| c.pending_next().next().is_some() || c.pending_retract().next().is_some())
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.program
            .collection_id(name)
            .map(|id| id.index())
            .ok_or_else(|| EvalError::UnknownCollection(name.to_string()))
    }

    /// Run one tick.
    ///
    /// Applies staged deltas, evaluates merge-now rules stratum by stratum to
    /// a fixpoint, then stages the output of next-tick rules. If the
    /// iteration cutoff is hit the tick is abandoned with
    /// [`EvalError::NonTerminatingFixpoint`]; merges already applied stay.
    ///
    /// A staged batch that breaks a key, or a store or sink failure while
    /// applying it, rejects the boundary instead: no rule runs, the tick
    /// number is not used up, and the staged tuples stay where they were.
    pub fn tick(&mut self) -> Result<TickReport> {
        let tick = self.tick;
        let _span = tracing::debug_span!("tick", tick).entered();

        for collection in &self.collections {
            collection.check_boundary()?;
        }

        let before = self.config.track_changes.then(|| self.snapshot());
        self.io.take_emitted();

        // Collections backed by a collaborator go first; once they are
        // through, the rest cannot fail.
        let (external, local): (Vec<usize>, Vec<usize>) =
            (0..self.collections.len()).partition(|&i| {
                matches!(
                    self.collections[i].persistence(),
                    Persistence::DurableTable | Persistence::StreamSink
                )
            });
        for i in external.into_iter().chain(local) {
            if let Err(e) = self.collections[i].advance_tick(&mut self.io) {
                warn!(
                    collection = self.collections[i].name(),
                    error = %e,
                    "tick boundary rejected"
                );
                return Err(e);
            }
        }
        self.tick += 1;

        let mut iterations = 0;
        for stratum in self.program.strata() {
            let rules: Vec<&Rule> = stratum.iter().map(|&i| &self.program.rules()[i]).collect();
            run_stratum(
                &rules,
                &mut self.collections,
                &mut self.io,
                tick,
                &mut iterations,
                self.config.max_iterations,
            )?;
        }

        for &i in self.program.deferred() {
            stage_deferred(&self.program.rules()[i], &mut self.collections)?;
        }

        let changes = match before {
            Some(before) => self.diff(before),
            None => Vec::new(),
        };
        let emitted = self.io.take_emitted();
        debug!(iterations, changed = changes.len(), emitted, "tick complete");

        Ok(TickReport {
            tick,
            iterations,
            changes,
            emitted,
        })
    }

    /// Run `n` ticks.
    pub fn run(&mut self, n: usize) -> Result<Vec<TickReport>> {
        (0..n).map(|_| self.tick()).collect()
    }

    /// Tick until a tick leaves both content and staged tuples exactly as it
    /// found them, or `limit` ticks ran. From that point every further tick
    /// would repeat the last one.
    pub fn run_until_stable(&mut self, limit: usize) -> Result<Vec<TickReport>> {
        let mut reports = Vec::new();
        let mut state = self.state();
        for _ in 0..limit {
            reports.push(self.tick()?);
            let next = self.state();
            if next == state {
                break;
            }
            state = next;
        }
        Ok(reports)
    }

    fn state(&self) -> Vec<[FxHashSet<Tuple>; 3]> {
        self.collections
            .iter()
            .map(|c| {
                [
                    c.iter().cloned().collect(),
                    c.pending_next().cloned().collect(),
                    c.pending_retract().cloned().collect(),
                ]
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<Vec<Tuple>> {
        self.collections.iter().map(Collection::contents).collect()
    }

    fn diff(&self, before: Vec<Vec<Tuple>>) -> Vec<CollectionChange> {
        let mut changes = Vec::new();
        for (collection, before) in self.collections.iter().zip(before) {
            if collection.persistence() == Persistence::StreamSink {
                continue;
            }
            let old: FxHashSet<&Tuple> = before.iter().collect();
            let added: Vec<Tuple> = collection
                .iter()
                .filter(|t| !old.contains(t))
                .cloned()
                .collect();
            let removed: Vec<Tuple> = before
                .iter()
                .filter(|t| !collection.contains(t))
                .cloned()
                .collect();
            if !added.is_empty() || !removed.is_empty() {
                changes.push(CollectionChange {
                    collection: collection.name().to_string(),
                    added,
                    removed,
                });
            }
        }
        changes
    }
}

/// Evaluate one stratum to a fixpoint.
///
/// The first pass reads every source in full. Later passes are semi-naive:
/// each rule is re-evaluated once per source position that gained tuples in
/// the previous pass, with that position restricted to those tuples.
fn run_stratum(
    rules: &[&Rule],
    collections: &mut [Collection],
    io: &mut Collaborators,
    tick: u64,
    iterations: &mut usize,
    max_iterations: Option<usize>,
) -> Result<()> {
    let recursive = rules.iter().any(|r| r.is_recursive());
    let mut full = true;
    loop {
        if let Some(max) = max_iterations
            && *iterations >= max
        {
            return Err(EvalError::NonTerminatingFixpoint {
                tick,
                iterations: *iterations,
            });
        }
        *iterations += 1;

        for rule in rules {
            if full {
                fire(rule, None, collections, io)?;
                continue;
            }
            for (pos, source) in rule.sources().into_iter().enumerate() {
                if collections[source.index()].has_recent() {
                    fire(rule, Some(pos), collections, io)?;
                }
            }
        }

        let mut changed = false;
        for collection in collections.iter_mut() {
            changed |= collection.advance();
        }
        trace!(pass = *iterations, changed, "fixpoint pass");
        if !changed || !recursive {
            break;
        }
        full = false;
    }

    for collection in collections.iter_mut() {
        collection.clear_recent();
    }
    Ok(())
}

fn fire(
    rule: &Rule,
    recent: Option<usize>,
    collections: &mut [Collection],
    io: &mut Collaborators,
) -> Result<()> {
    let out = rule.plan.evaluate(collections, recent);
    if out.is_empty() {
        return Ok(());
    }
    let produced = out.len();
    let added = collections[rule.target().index()]
        .merge_now(out, io)
        .map_err(|e| e.in_rule(rule.label()))?;
    trace!(rule = rule.label(), produced, added, "rule fired");
    Ok(())
}

fn stage_deferred(rule: &Rule, collections: &mut [Collection]) -> Result<()> {
    let out = rule.plan.evaluate(collections, None);
    let target = &mut collections[rule.target().index()];
    let staged = out.len();
    let result = match rule.op() {
        TemporalOp::MergeRetractNextTick => target.stage_retract_then_merge(out),
        _ => target.stage_merge(out),
    };
    result.map_err(|e| e.in_rule(rule.label()))?;
    trace!(rule = rule.label(), staged, "staged for next tick");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Operator;
    use crate::program::ProgramBuilder;
    use crate::schema::{FieldType, Schema};
    use crate::sink::CollectSink;
    use crate::store::MemoryStore;
    use crate::value::Value;

    fn engine(b: ProgramBuilder) -> (Engine, CollectSink) {
        let sink = CollectSink::new();
        let engine = Engine::with_collaborators(
            b.build(),
            EngineConfig::default(),
            Collaborators::new(sink.clone()),
        )
        .unwrap();
        (engine, sink)
    }

    fn sorted(mut tuples: Vec<Tuple>) -> Vec<Tuple> {
        tuples.sort();
        tuples
    }

    fn int(x: i64) -> Tuple {
        vec![Value::from(x)]
    }

    #[test]
    fn test_transitive_closure_in_one_tick() {
        let s = Schema::new([("from", FieldType::Int), ("to", FieldType::Int)]);
        let mut b = ProgramBuilder::new();
        b.table("edge", s.clone()).unwrap();
        b.scratch("path", s).unwrap();
        b.rule("path", TemporalOp::MergeNow, Operator::scan("edge")).unwrap();
        b.rule(
            "path",
            TemporalOp::MergeNow,
            Operator::join("path", "edge", |p, e| {
                (p[1] == e[0]).then(|| vec![p[0].clone(), e[1].clone()])
            })
            .on([(1, 0)]),
        )
        .unwrap();
        let (mut engine, _) = engine(b);
        engine
            .insert(
                "edge",
                (1..5).map(|i| vec![Value::from(i), Value::from(i + 1)]),
            )
            .unwrap();

        let report = engine.tick().unwrap();
        assert_eq!(engine.contents("path").unwrap().len(), 10);
        assert!(report.iterations > 1);

        // Scratch content is re-derived every tick.
        engine.tick().unwrap();
        assert_eq!(engine.contents("path").unwrap().len(), 10);
    }

    #[test]
    fn test_ephemeral_scratch_without_rules() {
        let mut b = ProgramBuilder::new();
        b.scratch("tmp", Schema::new([("x", FieldType::Int)])).unwrap();
        let (mut engine, _) = engine(b);
        engine.insert("tmp", [int(1), int(2)]).unwrap();
        assert_eq!(engine.contents("tmp").unwrap().len(), 2);
        engine.tick().unwrap();
        assert!(engine.contents("tmp").unwrap().is_empty());
    }

    #[test]
    fn test_next_tick_visibility() {
        let mut b = ProgramBuilder::new();
        let s = Schema::new([("x", FieldType::Int)]);
        b.table("src", s.clone()).unwrap();
        b.table("dst", s).unwrap();
        b.rule("dst", TemporalOp::MergeNextTick, Operator::scan("src")).unwrap();
        let (mut engine, _) = engine(b);

        engine.insert("src", [int(1)]).unwrap();
        engine.tick().unwrap();
        assert!(engine.contents("dst").unwrap().is_empty());
        assert!(engine.has_pending());

        let report = engine.tick().unwrap();
        assert_eq!(engine.contents("dst").unwrap(), vec![int(1)]);
        assert_eq!(report.change("dst").unwrap().added, vec![int(1)]);
    }

    #[test]
    fn test_next_tick_self_recursion_advances_one_step_per_tick() {
        let mut b = ProgramBuilder::new();
        b.table("counter", Schema::new([("n", FieldType::Int)])).unwrap();
        b.bootstrap("counter", [int(0)]).unwrap();
        b.rule(
            "counter",
            TemporalOp::MergeRetractNextTick,
            Operator::map("counter", |t| Some(vec![Value::from(t[0].as_int()? + 1)])),
        )
        .unwrap();
        let (mut engine, _) = engine(b);

        engine.run(3).unwrap();
        assert_eq!(engine.contents("counter").unwrap(), vec![int(2)]);
        assert_eq!(engine.current_tick(), 3);
    }

    #[test]
    fn test_non_terminating_fixpoint() {
        let mut b = ProgramBuilder::new();
        b.table("counter", Schema::new([("n", FieldType::Int)])).unwrap();
        b.rule(
            "counter",
            TemporalOp::MergeNow,
            Operator::map("counter", |t| Some(vec![Value::from(t[0].as_int()? + 1)])),
        )
        .unwrap();
        let config = EngineConfig {
            max_iterations: Some(50),
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_collaborators(
            b.build(),
            config,
            Collaborators::new(CollectSink::new()),
        )
        .unwrap();
        engine.insert("counter", [int(0)]).unwrap();

        let err = engine.tick().unwrap_err();
        assert!(matches!(
            err,
            EvalError::NonTerminatingFixpoint { tick: 0, iterations: 50 }
        ));
        // Merges applied before the cutoff stay.
        assert!(engine.contents("counter").unwrap().len() > 1);
        assert_eq!(engine.current_tick(), 1);
    }

    #[test]
    fn test_closure_output_schema_mismatch_names_rule() {
        let mut b = ProgramBuilder::new();
        b.table("src", Schema::new([("x", FieldType::Int)])).unwrap();
        b.table("dst", Schema::new([("s", FieldType::Str)])).unwrap();
        b.labeled_rule("bad", "dst", TemporalOp::MergeNow, Operator::scan("src"))
            .unwrap();
        let (mut engine, _) = engine(b);
        engine.insert("src", [int(1)]).unwrap();
        let err = engine.tick().unwrap_err();
        assert!(matches!(
            err,
            EvalError::SchemaMismatch { ref collection, ref rule, .. }
                if collection == "dst" && rule.as_deref() == Some("bad")
        ));
    }

    #[test]
    fn test_stream_sink_emits_once_per_tick() {
        let mut b = ProgramBuilder::new();
        let s = Schema::new([("line", FieldType::Str)]);
        b.table("a", s.clone()).unwrap();
        b.table("b", s.clone()).unwrap();
        b.stream("stdio", s).unwrap();
        b.rule("stdio", TemporalOp::MergeNow, Operator::scan("a")).unwrap();
        b.rule("stdio", TemporalOp::MergeNow, Operator::scan("b")).unwrap();
        let (mut engine, sink) = engine(b);
        engine.insert("a", [vec![Value::from("hi")]]).unwrap();
        engine.insert("b", [vec![Value::from("hi")]]).unwrap();

        let report = engine.tick().unwrap();
        assert_eq!(report.emitted, 1);
        engine.tick().unwrap();
        assert_eq!(sink.lines(), vec!["hi", "hi"]);
        assert!(engine.contents("stdio").unwrap().is_empty());
    }

    #[test]
    fn test_bootstrap_appears_in_tick_zero() {
        let mut b = ProgramBuilder::new();
        b.table("seed", Schema::new([("x", FieldType::Int)])).unwrap();
        b.bootstrap("seed", [int(7)]).unwrap();
        let (mut engine, _) = engine(b);
        assert!(engine.contents("seed").unwrap().is_empty());
        let report = engine.tick().unwrap();
        assert_eq!(report.tick, 0);
        assert_eq!(engine.contents("seed").unwrap(), vec![int(7)]);
    }

    #[test]
    fn test_durable_table_hydrates_and_persists() {
        let store = MemoryStore::new().with_rows("log", [int(1)]);
        let mut b = ProgramBuilder::new();
        b.durable_table("log", Schema::new([("x", FieldType::Int)])).unwrap();
        b.table("src", Schema::new([("x", FieldType::Int)])).unwrap();
        b.rule("log", TemporalOp::MergeNow, Operator::scan("src")).unwrap();
        let io = Collaborators::new(CollectSink::new()).with_store(store.clone());
        let mut engine = Engine::with_collaborators(b.build(), EngineConfig::default(), io).unwrap();

        assert_eq!(engine.contents("log").unwrap(), vec![int(1)]);
        engine.insert("src", [int(2)]).unwrap();
        engine.tick().unwrap();
        assert_eq!(sorted(store.rows("log")), vec![int(1), int(2)]);
    }

    #[test]
    fn test_reachability_converges() {
        let nodes = Schema::keyed([("name", FieldType::Str)], [("reachable", FieldType::Bool)]);
        let edges = Schema::new([("from", FieldType::Str), ("to", FieldType::Str)]);
        let mut b = ProgramBuilder::new();
        b.table("nodes", nodes).unwrap();
        b.table("edges", edges).unwrap();
        b.table("reach", Schema::new([("name", FieldType::Str)])).unwrap();
        b.rule(
            "reach",
            TemporalOp::MergeNow,
            Operator::map("nodes", |n| (n[1] == Value::Bool(true)).then(|| vec![n[0].clone()])),
        )
        .unwrap();
        b.rule(
            "reach",
            TemporalOp::MergeNextTick,
            Operator::join("reach", "edges", |r, e| (r[0] == e[0]).then(|| vec![e[1].clone()]))
                .on([(0, 0)]),
        )
        .unwrap();
        let (mut engine, _) = engine(b);
        engine
            .insert(
                "nodes",
                [
                    vec![Value::from("a"), Value::from(true)],
                    vec![Value::from("b"), Value::from(false)],
                    vec![Value::from("c"), Value::from(false)],
                ],
            )
            .unwrap();
        engine
            .insert(
                "edges",
                [
                    vec![Value::from("a"), Value::from("b")],
                    vec![Value::from("b"), Value::from("c")],
                ],
            )
            .unwrap();

        let reports = engine.run_until_stable(10).unwrap();
        assert!(reports.len() < 10);
        assert!(reports.last().unwrap().is_quiet());
        assert_eq!(
            sorted(engine.contents("reach").unwrap()),
            vec![
                vec![Value::from("a")],
                vec![Value::from("b")],
                vec![Value::from("c")]
            ]
        );
    }

    #[test]
    fn test_tick_report_tracks_removals() {
        let mut b = ProgramBuilder::new();
        b.table("t", Schema::new([("x", FieldType::Int)])).unwrap();
        let (mut engine, _) = engine(b);
        engine.insert("t", [int(1), int(2)]).unwrap();
        engine.tick().unwrap();
        engine.stage_replace("t", [int(2), int(3)]).unwrap();
        let report = engine.tick().unwrap();
        let change = report.change("t").unwrap();
        assert_eq!(change.added, vec![int(3)]);
        assert_eq!(change.removed, vec![int(1)]);
    }

    #[test]
    fn test_rejected_boundary_keeps_every_staged_batch() {
        let mut b = ProgramBuilder::new();
        b.table("kv", Schema::keyed([("k", FieldType::Str)], [("v", FieldType::Int)]))
            .unwrap();
        b.table("zz", Schema::new([("x", FieldType::Int)])).unwrap();
        let (mut engine, _) = engine(b);
        let kv = |k: &str, v: i64| vec![Value::from(k), Value::from(v)];

        engine.insert("kv", [kv("a", 1)]).unwrap();
        engine.stage_merge("kv", [kv("a", 2), kv("b", 3)]).unwrap();
        engine.stage_merge("zz", [int(9)]).unwrap();

        let err = engine.tick().unwrap_err();
        assert!(matches!(err, EvalError::KeyConflict { ref collection, .. } if collection == "kv"));
        assert_eq!(engine.current_tick(), 0);
        assert_eq!(engine.contents("kv").unwrap(), vec![kv("a", 1)]);
        assert!(engine.contents("zz").unwrap().is_empty());
        let kv_staged: Vec<Tuple> = engine
            .collection("kv")
            .unwrap()
            .pending_next()
            .cloned()
            .collect();
        assert_eq!(kv_staged, vec![kv("a", 2), kv("b", 3)]);
        assert!(engine.has_pending());

        // Drop the conflicting row and keep the rest.
        let staged = engine.discard_staged("kv").unwrap();
        engine
            .stage_merge("kv", staged.into_iter().filter(|t| t[0] != Value::from("a")))
            .unwrap();
        let report = engine.tick().unwrap();
        assert_eq!(report.tick, 0);
        assert_eq!(sorted(engine.contents("kv").unwrap()), vec![kv("a", 1), kv("b", 3)]);
        assert_eq!(engine.contents("zz").unwrap(), vec![int(9)]);
    }

    #[test]
    fn test_stream_forwards_host_push_after_rule_emission() {
        let mut b = ProgramBuilder::new();
        let line = Schema::new([("line", FieldType::Str)]);
        b.table("a", line.clone()).unwrap();
        b.stream("out", line).unwrap();
        b.rule("out", TemporalOp::MergeNow, Operator::scan("a")).unwrap();
        let (mut engine, sink) = engine(b);

        engine.insert("a", [vec![Value::from("hi")]]).unwrap();
        engine.tick().unwrap();
        assert_eq!(sink.lines(), vec!["hi"]);

        assert_eq!(engine.insert("out", [vec![Value::from("hi")]]).unwrap(), 1);
        assert_eq!(engine.insert("out", [vec![Value::from("hi")]]).unwrap(), 1);
        assert_eq!(sink.lines(), vec!["hi", "hi", "hi"]);
    }

    #[test]
    fn test_unknown_collection_on_direct_calls() {
        let (mut engine, _) = engine(ProgramBuilder::new());
        assert!(matches!(
            engine.insert("ghost", [int(1)]),
            Err(EvalError::UnknownCollection(_))
        ));
        assert!(engine.contents("ghost").is_err());
    }
}
