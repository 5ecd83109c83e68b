//! Statement monitoring for any [`Storage`](crate::storage::Storage).
//!
//! [`InstrumentedStorage`] wraps a storage, times every statement, applies an
//! optional timeout and reports to a [`QueryMonitor`].
//!
//! ```rust,ignore
//! use typequery::Query;
//! use typequery::monitor::{InstrumentedStorage, MonitorConfig, StatsMonitor};
//! use std::{sync::Arc, time::Duration};
//!
//! let stats = Arc::new(StatsMonitor::new());
//! let storage = InstrumentedStorage::new(client)
//!     .with_config(
//!         MonitorConfig::new()
//!             .with_query_timeout(Duration::from_secs(30))
//!             .with_slow_query_threshold(Duration::from_millis(200))
//!             .enable_monitoring(),
//!     )
//!     .with_monitor_arc(stats.clone());
//!
//! let customers = Query::<Customer>::new()
//!     .prop(Customer::name())
//!     .starts_with("Rob")
//!     .find_list(&storage)
//!     .await?;
//! println!("{:?}", stats.stats());
//! ```

mod config;
mod instrumented;
mod monitors;
mod types;


pub use config::MonitorConfig;
pub use instrumented::InstrumentedStorage;
pub use monitors::{CompositeMonitor, LoggingMonitor, NoopMonitor, QueryStats, StatsMonitor};
pub use types::{QueryContext, QueryMonitor, QueryResult};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
