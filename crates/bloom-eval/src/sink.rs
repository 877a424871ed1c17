//! External collaborators: durable stores and stream sinks.
//!
//! The engine talks to the outside world only through these two traits.
//! Durable tables mirror every accepted or removed tuple into a
//! [`DurableStore`]; stream sink collections forward every tuple pushed to
//! them into a [`StreamSink`]. Failures are surfaced as
//! [`EvalError::ExternalIo`] and never retried.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::error::{BoxError, EvalError};
use crate::schema::Schema;
use crate::value::{Tuple, Value};

/// Backing store for durable tables.
pub trait DurableStore {
    /// Initial content of a collection, read once when the engine starts.
    fn load(&mut self, collection: &str, schema: &Schema) -> Result<Vec<Tuple>, BoxError>;

    /// Record a tuple newly accepted into a collection.
    fn persist(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError>;

    /// Record the removal of a tuple from a collection.
    fn retract(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError>;
}

/// Destination for stream sink collections.
pub trait StreamSink {
    fn emit(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError>;
}

/// Render a tuple as one output line.
///
/// One-column tuples print the bare value; wider tuples join their fields
/// with `", "`.
pub fn format_line(tuple: &[Value]) -> String {
    match tuple {
        [single] => single.to_string(),
        fields => fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// Line-oriented sink writing to any [`io::Write`].
pub struct WriterSink<W> {
    writer: W,
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        WriterSink {
            writer: io::stdout(),
        }
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StreamSink for WriterSink<W> {
    fn emit(&mut self, _collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        writeln!(self.writer, "{}", format_line(tuple))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink that keeps every emitted tuple in memory.
///
/// Clones share the same buffer, so a test can keep one handle while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectSink {
    emitted: Rc<RefCell<Vec<(String, Tuple)>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far, in order.
    pub fn emitted(&self) -> Vec<(String, Tuple)> {
        self.emitted.borrow().clone()
    }

    /// Emitted tuples rendered with [`format_line`].
    pub fn lines(&self) -> Vec<String> {
        self.emitted
            .borrow()
            .iter()
            .map(|(_, tuple)| format_line(tuple))
            .collect()
    }

    /// Drain the buffer.
    pub fn take(&self) -> Vec<(String, Tuple)> {
        std::mem::take(&mut *self.emitted.borrow_mut())
    }
}

impl StreamSink for CollectSink {
    fn emit(&mut self, collection: &str, tuple: &[Value]) -> Result<(), BoxError> {
        self.emitted
            .borrow_mut()
            .push((collection.to_string(), tuple.to_vec()));
        Ok(())
    }
}

/// The collaborators an engine is wired to.
pub struct Collaborators {
    store: Option<Box<dyn DurableStore>>,
    sink: Box<dyn StreamSink>,
    emitted: usize,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators::new(WriterSink::stdout())
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("has_store", &self.store.is_some())
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl Collaborators {
    /// Collaborators with the given sink and no durable store.
    pub fn new(sink: impl StreamSink + 'static) -> Self {
        Collaborators {
            store: None,
            sink: Box::new(sink),
            emitted: 0,
        }
    }

    pub fn with_store(mut self, store: impl DurableStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_sink(mut self, sink: impl StreamSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub(crate) fn load(&mut self, collection: &str, schema: &Schema) -> Result<Vec<Tuple>, EvalError> {
        match &mut self.store {
            Some(store) => store
                .load(collection, schema)
                .map_err(|e| EvalError::external(collection, e)),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn persist(&mut self, collection: &str, tuple: &[Value]) -> Result<(), EvalError> {
        match &mut self.store {
            Some(store) => store
                .persist(collection, tuple)
                .map_err(|e| EvalError::external(collection, e)),
            None => Ok(()),
        }
    }

    pub(crate) fn retract(&mut self, collection: &str, tuple: &[Value]) -> Result<(), EvalError> {
        match &mut self.store {
            Some(store) => store
                .retract(collection, tuple)
                .map_err(|e| EvalError::external(collection, e)),
            None => Ok(()),
        }
    }

    pub(crate) fn emit(&mut self, collection: &str, tuple: &[Value]) -> Result<(), EvalError> {
        self.sink
            .emit(collection, tuple)
            .map_err(|e| EvalError::external(collection, e))?;
        self.emitted += 1;
        Ok(())
    }

    /// Reset the per-tick emission counter, returning its previous value.
    pub(crate) fn take_emitted(&mut self) -> usize {
        std::mem::take(&mut self.emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(&[Value::from("Hello george")]), "Hello george");
        assert_eq!(
            format_line(&[Value::from("a"), Value::from(true)]),
            "a, true"
        );
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.emit("stdio", &[Value::from("hello world!")]).unwrap();
        sink.emit("stdio", &[Value::from(1), Value::from(2)]).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "hello world!\n1, 2\n");
    }

    #[test]
    fn test_collect_sink_shares_buffer() {
        let sink = CollectSink::new();
        let mut io = Collaborators::new(sink.clone());
        io.emit("out", &[Value::from(7)]).unwrap();
        assert_eq!(sink.emitted(), vec![("out".to_string(), vec![Value::from(7)])]);
        assert_eq!(io.take_emitted(), 1);
        assert_eq!(io.take_emitted(), 0);
    }

    struct FailingSink;

    impl StreamSink for FailingSink {
        fn emit(&mut self, _: &str, _: &[Value]) -> Result<(), BoxError> {
            Err("console closed".into())
        }
    }

    #[test]
    fn test_sink_failure_is_external_io() {
        let mut io = Collaborators::new(FailingSink);
        let err = io.emit("stdio", &[Value::from("x")]).unwrap_err();
        assert!(matches!(err, EvalError::ExternalIo { ref collection, .. } if collection == "stdio"));
    }
}
