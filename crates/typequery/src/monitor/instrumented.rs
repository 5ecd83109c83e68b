use super::config::MonitorConfig;
use super::monitors::NoopMonitor;
use super::types::{QueryContext, QueryMonitor, QueryResult};
use crate::error::{OrmError, OrmResult};
use crate::storage::{CursorTracker, Row, RowStream, Storage};
use crate::value::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wraps any [`Storage`] with timing, timeouts and monitor callbacks.
///
/// Monitoring must be explicitly enabled via `MonitorConfig::enable_monitoring()`;
/// the timeout applies either way.
pub struct InstrumentedStorage<S> {
    storage: S,
    monitor: Arc<dyn QueryMonitor>,
    config: MonitorConfig,
}

impl<S: Storage> InstrumentedStorage<S> {
    /// Wrap `storage` with no monitoring and no timeout.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            monitor: Arc::new(NoopMonitor),
            config: MonitorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_monitor<M: QueryMonitor + 'static>(mut self, monitor: M) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn with_monitor_arc(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = Some(timeout);
        self
    }

    pub fn is_monitoring_enabled(&self) -> bool {
        self.config.monitoring_enabled
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn inner(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn report_result(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
        if !self.config.monitoring_enabled {
            return;
        }

        self.monitor.on_query_complete(ctx, duration, result);

        if let Some(threshold) = self.config.slow_query_threshold {
            if duration > threshold {
                self.monitor.on_slow_query(ctx, duration);
            }
        }
    }

    async fn execute_with_timeout<T, F>(&self, future: F) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>> + Send,
    {
        match self.config.query_timeout {
            // dropping the inner future abandons the statement
            Some(timeout) => tokio::time::timeout(timeout, future)
                .await
                .unwrap_or(Err(OrmError::Timeout(timeout))),
            None => future.await,
        }
    }

    async fn run<T, F>(
        &self,
        ctx: QueryContext,
        future: F,
        summarize: impl Fn(&T) -> QueryResult,
    ) -> OrmResult<T>
    where
        F: std::future::Future<Output = OrmResult<T>> + Send,
    {
        if self.config.monitoring_enabled {
            self.monitor.on_query_start(&ctx);
        }

        let start = Instant::now();
        let result = self.execute_with_timeout(future).await;
        let duration = start.elapsed();

        let query_result = match &result {
            Ok(value) => summarize(value),
            Err(OrmError::Timeout(d)) => QueryResult::Error(format!("timeout after {d:?}")),
            Err(e) => QueryResult::error(e.to_string()),
        };
        self.report_result(&ctx, duration, &query_result);
        result
    }

    fn context(tag: Option<&str>, sql: &str, params: &[Value]) -> QueryContext {
        let ctx = QueryContext::new(sql, params.len());
        match tag {
            Some(tag) => ctx.with_tag(tag),
            None => ctx,
        }
    }
}

impl<S: Storage> Storage for InstrumentedStorage<S> {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let ctx = Self::context(None, sql, params);
        self.run(ctx, self.storage.query(sql, params), |rows: &Vec<Row>| {
            QueryResult::Rows(rows.len())
        })
        .await
    }

    async fn query_tagged(&self, tag: &str, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let ctx = Self::context(Some(tag), sql, params);
        self.run(
            ctx,
            self.storage.query_tagged(tag, sql, params),
            |rows: &Vec<Row>| QueryResult::Rows(rows.len()),
        )
        .await
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let ctx = Self::context(None, sql, params).streamed();
        self.run(ctx, self.storage.query_stream(sql, params), |_: &RowStream| {
            QueryResult::Stream
        })
        .await
    }

    async fn query_stream_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<RowStream> {
        let ctx = Self::context(Some(tag), sql, params).streamed();
        self.run(
            ctx,
            self.storage.query_stream_tagged(tag, sql, params),
            |_: &RowStream| QueryResult::Stream,
        )
        .await
    }

    fn in_transaction(&self) -> bool {
        self.storage.in_transaction()
    }

    fn cursor_tracker(&self) -> Option<&CursorTracker> {
        self.storage.cursor_tracker()
    }
}
