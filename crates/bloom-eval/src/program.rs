//! Program construction and rule stratification.

use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use crate::collection::Persistence;
use crate::error::{EvalError, Result};
use crate::operator::{Operator, Plan};
use crate::rule::{Rule, TemporalOp};
use crate::schema::{Schema, SchemaError};
use crate::value::Tuple;

/// Index of a collection within its program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId(usize);

impl CollectionId {
    pub(crate) fn new(index: usize) -> Self {
        CollectionId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A declared collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDecl {
    pub name: String,
    pub schema: Schema,
    pub persistence: Persistence,
}

/// Accumulates declarations and rules, then freezes them into a [`Program`].
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    collections: Vec<CollectionDecl>,
    by_name: FxHashMap<String, CollectionId>,
    rules: Vec<Rule>,
    bootstrap: Vec<(CollectionId, Vec<Tuple>)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a collection. Names must be unique within a program.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        schema: Schema,
        persistence: Persistence,
    ) -> Result<CollectionId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(EvalError::DuplicateCollection(name));
        }
        let id = CollectionId::new(self.collections.len());
        self.by_name.insert(name.clone(), id);
        self.collections.push(CollectionDecl {
            name,
            schema,
            persistence,
        });
        Ok(id)
    }

    pub fn scratch(&mut self, name: impl Into<String>, schema: Schema) -> Result<CollectionId> {
        self.declare(name, schema, Persistence::Scratch)
    }

    pub fn table(&mut self, name: impl Into<String>, schema: Schema) -> Result<CollectionId> {
        self.declare(name, schema, Persistence::Table)
    }

    pub fn durable_table(&mut self, name: impl Into<String>, schema: Schema) -> Result<CollectionId> {
        self.declare(name, schema, Persistence::DurableTable)
    }

    pub fn stream(&mut self, name: impl Into<String>, schema: Schema) -> Result<CollectionId> {
        self.declare(name, schema, Persistence::StreamSink)
    }

    pub fn lookup(&self, name: &str) -> Option<&CollectionDecl> {
        self.by_name.get(name).map(|id| &self.collections[id.index()])
    }

    /// Add a rule with a generated label.
    pub fn rule(&mut self, target: &str, op: TemporalOp, operator: Operator) -> Result<()> {
        let label = format!("{target} {op} rule#{}", self.rules.len());
        self.labeled_rule(label, target, op, operator)
    }

    /// Add a rule. The label appears in logs and in errors raised while the
    /// rule fires.
    pub fn labeled_rule(
        &mut self,
        label: impl Into<String>,
        target: &str,
        op: TemporalOp,
        operator: Operator,
    ) -> Result<()> {
        let label = label.into();
        let target_id = self.resolve(target)?;
        let plan = self.plan(target_id, operator).map_err(|e| e.in_rule(&label))?;
        tracing::trace!(rule = %label, ?plan, "registered rule");
        self.rules.push(Rule {
            target: target_id,
            target_name: target.to_string(),
            op,
            plan,
            label,
            recursive: false,
        });
        Ok(())
    }

    /// Rows staged into `collection` so they appear in tick 0.
    pub fn bootstrap(&mut self, collection: &str, rows: impl IntoIterator<Item = Tuple>) -> Result<()> {
        let id = self.resolve(collection)?;
        let rows: Vec<Tuple> = rows.into_iter().collect();
        let decl = &self.collections[id.index()];
        for row in &rows {
            decl.schema
                .check(row)
                .map_err(|e| EvalError::schema(&decl.name, e))?;
        }
        self.bootstrap.push((id, rows));
        Ok(())
    }

    pub fn build(mut self) -> Program {
        let (strata, deferred) = stratify(&mut self.rules);
        tracing::debug!(
            collections = self.collections.len(),
            rules = self.rules.len(),
            strata = strata.len(),
            "built program"
        );
        Program {
            collections: self.collections,
            by_name: self.by_name,
            rules: self.rules,
            strata,
            deferred,
            bootstrap: self.bootstrap,
        }
    }

    fn resolve(&self, name: &str) -> Result<CollectionId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::UnknownCollection(name.to_string()))
    }

    fn readable(&self, name: &str) -> Result<CollectionId> {
        let id = self.resolve(name)?;
        if !self.collections[id.index()].persistence.is_readable() {
            return Err(EvalError::WriteOnlySource(name.to_string()));
        }
        Ok(id)
    }

    fn plan(&self, target: CollectionId, operator: Operator) -> Result<Plan> {
        match operator {
            Operator::Map { source, transform } => Ok(Plan::Map {
                source: self.readable(&source)?,
                transform,
            }),
            Operator::Join {
                left,
                right,
                keys,
                combine,
            } => {
                let left_id = self.readable(&left)?;
                let right_id = self.readable(&right)?;
                let left_schema = &self.collections[left_id.index()].schema;
                let right_schema = &self.collections[right_id.index()].schema;
                for &(l, r) in &keys {
                    let compatible = match (left_schema.field(l), right_schema.field(r)) {
                        (Some(lf), Some(rf)) => lf.ty == rf.ty,
                        _ => false,
                    };
                    if !compatible {
                        return Err(EvalError::schema(
                            &left,
                            SchemaError::JoinKey { left: l, right: r },
                        ));
                    }
                }
                Ok(Plan::Join {
                    left: left_id,
                    right: right_id,
                    keys,
                    combine,
                })
            }
            Operator::Values(rows) => {
                let decl = &self.collections[target.index()];
                for row in &rows {
                    decl.schema
                        .check(row)
                        .map_err(|e| EvalError::schema(&decl.name, e))?;
                }
                Ok(Plan::Values(rows))
            }
        }
    }
}

/// Group merge-now rules into strongly connected components of the
/// producer → consumer graph, in dependency order, and flag recursive rules.
/// Returns the strata and the indices of the deferred rules.
fn stratify(rules: &mut [Rule]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut graph = DiGraph::<usize, ()>::new();
    let mut deferred = Vec::new();
    let mut nodes: Vec<(usize, NodeIndex)> = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        if rule.op.is_deferred() {
            deferred.push(i);
        } else {
            nodes.push((i, graph.add_node(i)));
        }
    }

    let mut producers: FxHashMap<CollectionId, Vec<NodeIndex>> = FxHashMap::default();
    for &(i, node) in &nodes {
        producers.entry(rules[i].target).or_default().push(node);
    }
    for &(i, consumer) in &nodes {
        for source in rules[i].plan.sources() {
            for &producer in producers.get(&source).into_iter().flatten() {
                graph.update_edge(producer, consumer, ());
            }
        }
    }

    // tarjan_scc yields components in reverse topological order.
    let mut sccs = tarjan_scc(&graph);
    sccs.reverse();

    let mut strata = Vec::with_capacity(sccs.len());
    for scc in sccs {
        let recursive = scc.len() > 1 || graph.find_edge(scc[0], scc[0]).is_some();
        let mut members: Vec<usize> = scc.iter().map(|&n| graph[n]).collect();
        members.sort_unstable();
        if recursive {
            for &i in &members {
                rules[i].recursive = true;
            }
        }
        strata.push(members);
    }
    (strata, deferred)
}

/// An immutable set of collections and rules.
#[derive(Debug)]
pub struct Program {
    collections: Vec<CollectionDecl>,
    by_name: FxHashMap<String, CollectionId>,
    rules: Vec<Rule>,
    strata: Vec<Vec<usize>>,
    deferred: Vec<usize>,
    bootstrap: Vec<(CollectionId, Vec<Tuple>)>,
}

impl Program {
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::new()
    }

    pub fn collections(&self) -> &[CollectionDecl] {
        &self.collections
    }

    pub fn collection_id(&self, name: &str) -> Option<CollectionId> {
        self.by_name.get(name).copied()
    }

    pub fn decl(&self, id: CollectionId) -> &CollectionDecl {
        &self.collections[id.index()]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Merge-now rule indices grouped by stratum, dependencies first.
    pub fn strata(&self) -> &[Vec<usize>] {
        &self.strata
    }

    /// Indices of next-tick rules.
    pub fn deferred(&self) -> &[usize] {
        &self.deferred
    }

    pub fn recursive_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.recursive)
    }

    pub(crate) fn bootstrap_rows(&self) -> &[(CollectionId, Vec<Tuple>)] {
        &self.bootstrap
    }
}
