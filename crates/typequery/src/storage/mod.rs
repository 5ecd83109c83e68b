//! The storage collaborator that executes compiled statements.
//!
//! [`Storage`] unifies a plain connection and a transaction, the same way a
//! repository accepts either. Statements arrive with `?` placeholders and
//! [`Value`] parameters; adapters translate both for their driver.

mod postgres;

use crate::error::OrmResult;
use crate::value::Value;
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

/// One result row, positionally matching the select list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// A stream of result rows.
///
/// Type-erased so that every storage returns the same streaming type.
#[must_use]
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = OrmResult<Row>> + Send>>,
}

impl RowStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = OrmResult<Row>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream over rows that are already in memory.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(futures_util::stream::iter(rows.into_iter().map(Ok)))
    }
}

impl Stream for RowStream {
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RowStream")
    }
}

/// Executes SQL on behalf of queries.
///
/// Implemented for `tokio_postgres::Client` and `tokio_postgres::Transaction`;
/// [`crate::monitor::InstrumentedStorage`] and [`crate::mock::MockStorage`]
/// wrap or replace them.
pub trait Storage: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send;

    /// Execute a query, associating a label for monitoring.
    ///
    /// The default implementation ignores `tag` and calls [`Storage::query`].
    fn query_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send {
        let _ = tag;
        self.query(sql, params)
    }

    /// Execute a query and return rows incrementally.
    ///
    /// The default implementation materializes the result first.
    fn query_stream(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send {
        async move {
            let rows = self.query(sql, params).await?;
            Ok(RowStream::from_rows(rows))
        }
    }

    /// Streaming variant of [`Storage::query_tagged`].
    fn query_stream_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send {
        let _ = tag;
        self.query_stream(sql, params)
    }

    /// Whether statements run inside a transaction; row locks require one.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Counters for cursors opened through this storage, if it keeps them.
    fn cursor_tracker(&self) -> Option<&CursorTracker> {
        None
    }
}

impl<S: Storage> Storage for &S {
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send {
        (**self).query(sql, params)
    }

    fn query_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<Vec<Row>>> + Send {
        (**self).query_tagged(tag, sql, params)
    }

    fn query_stream(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send {
        (**self).query_stream(sql, params)
    }

    fn query_stream_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = OrmResult<RowStream>> + Send {
        (**self).query_stream_tagged(tag, sql, params)
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }

    fn cursor_tracker(&self) -> Option<&CursorTracker> {
        (**self).cursor_tracker()
    }
}

#[derive(Debug, Default)]
struct CursorCounts {
    opened: AtomicU64,
    closed: AtomicU64,
    leaked: AtomicU64,
}

/// Counts cursors opened by iterators and whether they were released.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    counts: Arc<CursorCounts>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open cursor; dropping the guard without `release` counts a leak.
    pub fn guard(&self) -> CursorGuard {
        self.counts.opened.fetch_add(1, Ordering::Relaxed);
        CursorGuard {
            tracker: self.clone(),
            released: false,
        }
    }

    pub fn opened(&self) -> u64 {
        self.counts.opened.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.counts.closed.load(Ordering::Relaxed)
    }

    pub fn leaked(&self) -> u64 {
        self.counts.leaked.load(Ordering::Relaxed)
    }

    /// Cursors neither released nor dropped yet.
    pub fn open_cursors(&self) -> u64 {
        self.opened()
            .saturating_sub(self.closed())
            .saturating_sub(self.leaked())
    }
}

/// One tracked cursor.
#[derive(Debug)]
pub struct CursorGuard {
    tracker: CursorTracker,
    released: bool,
}

impl CursorGuard {
    /// Mark the cursor as properly closed.
    pub fn release(mut self) {
        self.released = true;
        self.tracker.counts.closed.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        if !self.released {
            self.tracker.counts.leaked.fetch_add(1, Ordering::Relaxed);
        }
    }
}
