//! Scripted in-memory storage for tests.
//!
//! ```ignore
//! let storage = MockStorage::new()
//!     .on("from customer", vec![vec![Value::Int(1), Value::from("Rob")]])
//!     .on_lock_conflict("for update");
//!
//! let customers = Query::<Customer>::new().find_list(&storage).await?;
//! assert_eq!(storage.execution_count(), 1);
//! ```
//!
//! Rules are checked in registration order; the first whose fragment occurs
//! in the SQL decides the response. Statements matching no rule return no rows.

use crate::error::{OrmError, OrmResult};
use crate::storage::{CursorTracker, Row, RowStream, Storage};
use crate::value::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Error(String),
    /// Rows locked by another transaction.
    Locked,
}

#[derive(Debug, Clone)]
struct Rule {
    fragment: String,
    response: Response,
}

/// A statement received by [`MockStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub tag: Option<String>,
    pub streamed: bool,
}

#[derive(Debug, Default)]
pub struct MockStorage {
    rules: Vec<Rule>,
    executed: Mutex<Vec<ExecutedStatement>>,
    in_transaction: bool,
    delay: Option<Duration>,
    tracker: CursorTracker,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `fragment` with `rows`.
    pub fn on<I, R>(mut self, fragment: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Row>,
    {
        self.rules.push(Rule {
            fragment: fragment.into(),
            response: Response::Rows(rows.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Fail statements containing `fragment` with a storage error.
    pub fn on_error(mut self, fragment: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule {
            fragment: fragment.into(),
            response: Response::Error(message.into()),
        });
        self
    }

    /// Treat rows read by statements containing `fragment` as locked elsewhere.
    ///
    /// `for update nowait` fails with `LockUnavailable`, `for update skip
    /// locked` returns no rows, and any other statement falls through to the
    /// next matching rule.
    pub fn on_lock_conflict(mut self, fragment: impl Into<String>) -> Self {
        self.rules.push(Rule {
            fragment: fragment.into(),
            response: Response::Locked,
        });
        self
    }

    /// Report an active transaction.
    pub fn with_transaction(mut self) -> Self {
        self.in_transaction = true;
        self
    }

    /// Sleep before answering each statement.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// SQL of every executed statement, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed().into_iter().map(|s| s.sql).collect()
    }

    pub fn tracker(&self) -> &CursorTracker {
        &self.tracker
    }

    fn record(&self, tag: Option<&str>, sql: &str, params: &[Value], streamed: bool) {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutedStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
                tag: tag.map(str::to_string),
                streamed,
            });
    }

    fn respond(&self, sql: &str) -> OrmResult<Vec<Row>> {
        let locking = sql.contains(" for update");
        for rule in self.rules.iter().filter(|r| sql.contains(&r.fragment)) {
            match &rule.response {
                Response::Rows(rows) => return Ok(rows.clone()),
                Response::Error(msg) => return Err(OrmError::storage(msg.clone())),
                Response::Locked if locking && sql.ends_with(" nowait") => {
                    return Err(OrmError::LockUnavailable(
                        "could not obtain lock on row".to_string(),
                    ));
                }
                Response::Locked if locking && sql.ends_with(" skip locked") => {
                    return Ok(Vec::new());
                }
                Response::Locked => {}
            }
        }
        Ok(Vec::new())
    }

    async fn execute(
        &self,
        tag: Option<&str>,
        sql: &str,
        params: &[Value],
        streamed: bool,
    ) -> OrmResult<Vec<Row>> {
        self.record(tag, sql, params, streamed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(sql)
    }
}

impl Storage for MockStorage {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.execute(None, sql, params, false).await
    }

    async fn query_tagged(&self, tag: &str, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.execute(Some(tag), sql, params, false).await
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let rows = self.execute(None, sql, params, true).await?;
        Ok(RowStream::from_rows(rows))
    }

    async fn query_stream_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<RowStream> {
        let rows = self.execute(Some(tag), sql, params, true).await?;
        Ok(RowStream::from_rows(rows))
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn cursor_tracker(&self) -> Option<&CursorTracker> {
        Some(&self.tracker)
    }
}
