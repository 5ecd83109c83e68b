use super::find::load_secondary;
use crate::compile::CompiledStatement;
use crate::entity::{Entity, Record};
use crate::error::{OrmError, OrmResult};
use crate::storage::{CursorGuard, RowStream, Storage};
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    /// Stream ended or failed; remaining buffered rows can still be read.
    Done,
    Closed,
}

/// Forward-only, single-pass cursor over query results.
///
/// Rows are read from the storage stream on demand. When the query fetches
/// to-many relations, roots are buffered in batches so each batch needs one
/// secondary query per relation.
///
/// The cursor is released by [`close`](Self::close), by reading past the last
/// row, or by a stream error. Dropping an iterator that is still open logs a
/// warning and counts a leak on the storage's cursor tracker.
#[must_use = "an iterator holds an open cursor until it is closed or exhausted"]
pub struct QueryIterator<'a, S, E> {
    storage: &'a S,
    stmt: CompiledStatement,
    stream: Option<RowStream>,
    buffer: VecDeque<Record>,
    batch_size: usize,
    guard: Option<CursorGuard>,
    state: State,
    rows_read: u64,
    _marker: PhantomData<fn() -> E>,
}

impl<'a, S: Storage, E: Entity> QueryIterator<'a, S, E> {
    pub(crate) fn new(
        storage: &'a S,
        stmt: CompiledStatement,
        stream: RowStream,
        batch_size: usize,
    ) -> Self {
        let guard = storage.cursor_tracker().map(|t| t.guard());
        tracing::trace!(target: "typequery.cursor", entity = E::schema().name, "cursor opened");
        Self {
            storage,
            stmt,
            stream: Some(stream),
            buffer: VecDeque::new(),
            batch_size: batch_size.max(1),
            guard,
            state: State::Open,
            rows_read: 0,
            _marker: PhantomData,
        }
    }

    /// The next entity, or `None` once the results are exhausted.
    ///
    /// Fails with [`OrmError::IteratorClosed`] after [`close`](Self::close).
    pub async fn next(&mut self) -> OrmResult<Option<E>> {
        if self.state == State::Closed {
            return Err(OrmError::IteratorClosed);
        }
        if self.buffer.is_empty() && self.state == State::Open {
            self.fill().await?;
        }
        match self.buffer.pop_front() {
            Some(record) => {
                self.rows_read += 1;
                E::from_record(&record).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn fill(&mut self) -> OrmResult<()> {
        let batch = if self.stmt.secondary_fetches().is_empty() {
            1
        } else {
            self.batch_size
        };

        while self.buffer.len() < batch {
            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };
            match next {
                Some(Ok(row)) => match self.stmt.plan().assemble(&row) {
                    Ok(record) => self.buffer.push_back(record),
                    Err(e) => {
                        self.finish();
                        return Err(e);
                    }
                },
                Some(Err(e)) => {
                    self.finish();
                    return Err(e);
                }
                None => {
                    self.finish();
                    break;
                }
            }
        }

        if !self.buffer.is_empty() && !self.stmt.secondary_fetches().is_empty() {
            let records = self.buffer.make_contiguous();
            if let Err(e) = load_secondary(self.storage, &self.stmt, records).await {
                self.finish();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Release the stream and the tracked cursor.
    fn finish(&mut self) {
        self.stream = None;
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
        if self.state == State::Open {
            self.state = State::Done;
            tracing::trace!(
                target: "typequery.cursor",
                entity = E::schema().name,
                rows = self.rows_read,
                "cursor released"
            );
        }
    }

    /// Close the cursor; further `next` calls fail. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.finish();
        self.buffer.clear();
        self.state = State::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Entities returned so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }
}

impl<S, E> Drop for QueryIterator<'_, S, E> {
    fn drop(&mut self) {
        if self.state == State::Open {
            tracing::warn!(
                target: "typequery.cursor",
                rows = self.rows_read,
                sql = self.stmt.sql(),
                "query iterator dropped without close; cursor leaked"
            );
            // the guard's own drop counts the leak
        }
    }
}
