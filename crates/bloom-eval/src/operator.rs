//! Relational operator expressions.
//!
//! An [`Operator`] names its sources; [`ProgramBuilder`](crate::ProgramBuilder)
//! resolves it into a plan over collection ids, which is what the scheduler
//! evaluates.

use std::fmt;
use std::rc::Rc;

use crate::collection::Collection;
use crate::program::CollectionId;
use crate::value::{Tuple, Value};

/// Row-at-a-time transform. `None` drops the row.
pub type MapFn = Rc<dyn Fn(&[Value]) -> Option<Tuple>>;

/// Pairwise combine for joins. `None` drops the pair.
pub type PairFn = Rc<dyn Fn(&[Value], &[Value]) -> Option<Tuple>>;

/// A relational expression over named collections.
#[derive(Clone)]
pub enum Operator {
    /// `{ f(t) | t ∈ source, f(t) defined }`
    Map { source: String, transform: MapFn },
    /// `{ g(a, b) | a ∈ left, b ∈ right, g(a, b) defined }`
    ///
    /// `keys` lists `(left column, right column)` pairs that `combine` only
    /// accepts when equal. They let evaluation probe the right side's column
    /// index instead of scanning the cross product; output is the same.
    Join {
        left: String,
        right: String,
        keys: Vec<(usize, usize)>,
        combine: PairFn,
    },
    /// A constant set of rows.
    Values(Vec<Tuple>),
}

impl Operator {
    /// Every tuple of `source`, unchanged.
    pub fn scan(source: impl Into<String>) -> Self {
        Operator::map(source, |t| Some(t.to_vec()))
    }

    pub fn map(source: impl Into<String>, f: impl Fn(&[Value]) -> Option<Tuple> + 'static) -> Self {
        Operator::Map {
            source: source.into(),
            transform: Rc::new(f),
        }
    }

    /// Tuples of `source` satisfying `pred`.
    pub fn filter(source: impl Into<String>, pred: impl Fn(&[Value]) -> bool + 'static) -> Self {
        Operator::map(source, move |t| pred(t).then(|| t.to_vec()))
    }

    pub fn join(
        left: impl Into<String>,
        right: impl Into<String>,
        combine: impl Fn(&[Value], &[Value]) -> Option<Tuple> + 'static,
    ) -> Self {
        Operator::Join {
            left: left.into(),
            right: right.into(),
            keys: Vec::new(),
            combine: Rc::new(combine),
        }
    }

    /// Add equality hints to a join. Has no effect on other operators.
    pub fn on(mut self, pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        if let Operator::Join { keys, .. } = &mut self {
            keys.extend(pairs);
        }
        self
    }

    pub fn values(rows: impl IntoIterator<Item = Tuple>) -> Self {
        Operator::Values(rows.into_iter().collect())
    }

    /// Names of the collections this expression reads.
    pub fn sources(&self) -> Vec<&str> {
        match self {
            Operator::Map { source, .. } => vec![source.as_str()],
            Operator::Join { left, right, .. } => vec![left.as_str(), right.as_str()],
            Operator::Values(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Map { source, .. } => write!(f, "{source}.map(..)"),
            Operator::Join {
                left, right, keys, ..
            } => {
                write!(f, "({left} * {right}).pairs(..)")?;
                if !keys.is_empty() {
                    write!(f, " on {keys:?}")?;
                }
                Ok(())
            }
            Operator::Values(rows) => write!(f, "{rows:?}"),
        }
    }
}

/// An operator with its sources resolved.
#[derive(Clone)]
pub(crate) enum Plan {
    Map {
        source: CollectionId,
        transform: MapFn,
    },
    Join {
        left: CollectionId,
        right: CollectionId,
        keys: Vec<(usize, usize)>,
        combine: PairFn,
    },
    Values(Vec<Tuple>),
}

impl Plan {
    /// Source collections, by position.
    pub(crate) fn sources(&self) -> Vec<CollectionId> {
        match self {
            Plan::Map { source, .. } => vec![*source],
            Plan::Join { left, right, .. } => vec![*left, *right],
            Plan::Values(_) => Vec::new(),
        }
    }

    /// Evaluate against current content.
    ///
    /// With `recent = Some(pos)`, the source at position `pos` contributes
    /// only the tuples added in the previous pass; all other sources are read
    /// in full.
    pub(crate) fn evaluate(&self, collections: &[Collection], recent: Option<usize>) -> Vec<Tuple> {
        match self {
            Plan::Map { source, transform } => {
                let source = &collections[source.index()];
                if recent == Some(0) {
                    source.iter_recent().filter_map(|t| transform(t.as_slice())).collect()
                } else {
                    source.iter().filter_map(|t| transform(t.as_slice())).collect()
                }
            }
            Plan::Join {
                left,
                right,
                keys,
                combine,
            } => {
                let left = &collections[left.index()];
                let right = &collections[right.index()];
                let lefts: Box<dyn Iterator<Item = &Tuple>> = if recent == Some(0) {
                    Box::new(left.iter_recent())
                } else {
                    Box::new(left.iter())
                };
                let right_recent = recent == Some(1);

                let mut out = Vec::new();
                for a in lefts {
                    match keys.split_first() {
                        Some((&(lcol, rcol), rest)) => {
                            for &idx in right.lookup(rcol, &a[lcol]) {
                                if right_recent && !right.is_recent(idx) {
                                    continue;
                                }
                                let Some(b) = right.get(idx) else {
                                    continue;
                                };
                                if rest.iter().all(|&(l, r)| a[l] == b[r])
                                    && let Some(t) = combine(a.as_slice(), b.as_slice())
                                {
                                    out.push(t);
                                }
                            }
                        }
                        None if right_recent => {
                            out.extend(right.iter_recent().filter_map(|b| combine(a.as_slice(), b.as_slice())));
                        }
                        None => {
                            out.extend(right.iter().filter_map(|b| combine(a.as_slice(), b.as_slice())));
                        }
                    }
                }
                out
            }
            // Constant rows carry no delta.
            Plan::Values(rows) if recent.is_none() => rows.clone(),
            Plan::Values(_) => Vec::new(),
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Map { source, .. } => write!(f, "Map({source:?})"),
            Plan::Join {
                left, right, keys, ..
            } => write!(f, "Join({left:?}, {right:?}, {keys:?})"),
            Plan::Values(rows) => write!(f, "Values({})", rows.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Persistence;
    use crate::schema::{FieldType, Schema};
    use crate::sink::{CollectSink, Collaborators};

    fn fixture() -> Vec<Collection> {
        let mut io = Collaborators::new(CollectSink::new());
        let mut a = Collection::new("a", Schema::new([("x", FieldType::Int)]), Persistence::Table);
        let mut b = Collection::new(
            "b",
            Schema::new([("x", FieldType::Int), ("y", FieldType::Str)]),
            Persistence::Table,
        );
        a.merge_now(vec![vec![Value::from(1)], vec![Value::from(2)]], &mut io)
            .unwrap();
        b.merge_now(
            vec![
                vec![Value::from(1), Value::from("z")],
                vec![Value::from(3), Value::from("w")],
            ],
            &mut io,
        )
        .unwrap();
        vec![a, b]
    }

    fn project_y() -> PairFn {
        Rc::new(|a: &[Value], b: &[Value]| (a[0] == b[0]).then(|| vec![b[1].clone()]))
    }

    #[test]
    fn test_map_filters_undefined() {
        let collections = fixture();
        let plan = Plan::Map {
            source: CollectionId::new(0),
            transform: Rc::new(|t| {
                let x = t[0].as_int()?;
                (x > 1).then(|| vec![Value::from(x * 10)])
            }),
        };
        assert_eq!(plan.evaluate(&collections, None), vec![vec![Value::from(20)]]);
    }

    #[test]
    fn test_join_cross_product() {
        let collections = fixture();
        let plan = Plan::Join {
            left: CollectionId::new(0),
            right: CollectionId::new(1),
            keys: Vec::new(),
            combine: project_y(),
        };
        assert_eq!(plan.evaluate(&collections, None), vec![vec![Value::from("z")]]);
    }

    #[test]
    fn test_join_with_key_hint_matches_cross_product() {
        let collections = fixture();
        let scan = Plan::Join {
            left: CollectionId::new(0),
            right: CollectionId::new(1),
            keys: Vec::new(),
            combine: project_y(),
        };
        let keyed = Plan::Join {
            left: CollectionId::new(0),
            right: CollectionId::new(1),
            keys: vec![(0, 0)],
            combine: project_y(),
        };
        assert_eq!(
            scan.evaluate(&collections, None),
            keyed.evaluate(&collections, None)
        );
    }

    #[test]
    fn test_recent_restricts_one_side() {
        let mut collections = fixture();
        let mut io = Collaborators::new(CollectSink::new());
        collections[0].advance();
        collections[1].advance();
        collections[0]
            .merge_now(vec![vec![Value::from(3)]], &mut io)
            .unwrap();
        collections[0].advance();
        collections[1].advance();

        let plan = Plan::Join {
            left: CollectionId::new(0),
            right: CollectionId::new(1),
            keys: vec![(0, 0)],
            combine: project_y(),
        };
        assert_eq!(plan.evaluate(&collections, Some(0)), vec![vec![Value::from("w")]]);
        assert!(plan.evaluate(&collections, Some(1)).is_empty());
    }

    #[test]
    fn test_values_only_on_full_pass() {
        let plan = Plan::Values(vec![vec![Value::from(1)]]);
        assert_eq!(plan.evaluate(&[], None).len(), 1);
        assert!(plan.evaluate(&[], Some(0)).is_empty());
    }

    #[test]
    fn test_operator_sources() {
        let op = Operator::join("a", "b", |_, _| None).on([(0, 0)]);
        assert_eq!(op.sources(), vec!["a", "b"]);
        assert_eq!(format!("{op:?}"), "(a * b).pairs(..) on [(0, 0)]");
        assert!(Operator::values([]).sources().is_empty());
    }
}
