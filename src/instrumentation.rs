//! Query instrumentation
//!
//! [`InstrumentedSession`] wraps any [`SqlSession`] and records every
//! statement it runs in a [`QueryStats`]: when it started, its parameters,
//! how long it took and which application frames issued it. Stats are held
//! by the wrapper; nothing is registered globally.

use std::backtrace::Backtrace;
use std::time::Instant;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::Value;
use crate::database::{Dialect, QueryResult, SqlSession, WriteResult};

/// Frame symbol line of a rendered backtrace, e.g. `  12: app::main`
static FRAME_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+:\s+(?P<symbol>.+?)\s*$").expect("valid regex"));

/// Source location line following a symbol, e.g. `at ./src/main.rs:4:5`
static FRAME_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*at\s+(?P<location>.+?)\s*$").expect("valid regex"));

/// Symbol prefixes that never count as call context
const SKIPPED_FRAME_PREFIXES: &[&str] = &[
    "duckdb::",
    "libduckdb_sys::",
    "tokio_postgres::",
    "postgres_protocol::",
    "postgres_types::",
    "tokio::",
    "std::",
    "core::",
    "alloc::",
    "batch_writeback::instrumentation::",
    "__",
];

/// One frame of the application call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallFrame {
    pub symbol: String,
    pub location: Option<String>,
}

impl std::fmt::Display for CallFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.symbol, location),
            None => write!(f, "{}", self.symbol),
        }
    }
}

/// A recorded statement
#[derive(Debug, Clone, Serialize)]
pub struct QueryStatsEntry {
    pub started_at: DateTime<Utc>,
    pub statement: String,
    #[serde(skip)]
    pub parameters: Vec<Value>,
    /// Outermost frame first
    pub call_context: Vec<CallFrame>,
    /// NaN when the statement was never closed
    pub duration_secs: f64,
}

impl QueryStatsEntry {
    pub fn is_complete(&self) -> bool {
        !self.duration_secs.is_nan()
    }
}

struct OpenQuery {
    entry: QueryStatsEntry,
    started: Instant,
}

/// Statement log and timing totals for one session
pub struct QueryStats {
    count: u64,
    total_time: f64,
    log: Vec<QueryStatsEntry>,
    open: Option<OpenQuery>,
    capture_call_context: bool,
}

impl Default for QueryStats {
    fn default() -> Self {
        Self {
            count: 0,
            total_time: 0.0,
            log: Vec::new(),
            open: None,
            capture_call_context: true,
        }
    }
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a backtrace for every statement (on by default)
    pub fn with_call_context(mut self, enabled: bool) -> Self {
        self.capture_call_context = enabled;
        self
    }

    /// Number of statements started
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Seconds spent in completed statements
    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Open an entry for a statement
    ///
    /// A still-open previous entry is closed with a NaN duration.
    pub fn start_query(&mut self, statement: &str, parameters: &[Value]) {
        if let Some(open) = self.open.take() {
            self.log.push(QueryStatsEntry {
                duration_secs: f64::NAN,
                ..open.entry
            });
        }

        let call_context = if self.capture_call_context {
            capture_call_context()
        } else {
            Vec::new()
        };

        self.open = Some(OpenQuery {
            entry: QueryStatsEntry {
                started_at: Utc::now(),
                statement: statement.to_string(),
                parameters: parameters.to_vec(),
                call_context,
                duration_secs: f64::NAN,
            },
            started: Instant::now(),
        });
        self.count += 1;
    }

    /// Close the open entry with its elapsed time
    pub fn end_query(&mut self) {
        let Some(open) = self.open.take() else {
            warn!("end_query called with no statement in progress");
            return;
        };
        let elapsed = open.started.elapsed().as_secs_f64();
        self.total_time += elapsed;
        self.log.push(QueryStatsEntry {
            duration_secs: elapsed,
            ..open.entry
        });
    }

    /// Closed entries, plus a NaN entry for a statement still in progress
    pub fn query_log(&self) -> Vec<QueryStatsEntry> {
        let mut log = self.log.clone();
        if let Some(open) = &self.open {
            log.push(QueryStatsEntry {
                duration_secs: f64::NAN,
                ..open.entry.clone()
            });
        }
        log
    }
}

impl std::fmt::Display for QueryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<QueryStats count={} time={:.2}s>",
            self.count, self.total_time
        )
    }
}

impl std::fmt::Debug for QueryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Application frames of the current call stack, outermost first
pub fn capture_call_context() -> Vec<CallFrame> {
    parse_backtrace(&Backtrace::force_capture().to_string())
}

/// Parse a rendered backtrace into application frames, outermost first
///
/// Frames from database drivers, the async runtime, the standard library and
/// this module are dropped.
pub fn parse_backtrace(rendered: &str) -> Vec<CallFrame> {
    let mut frames: Vec<CallFrame> = Vec::new();

    for line in rendered.lines() {
        if let Some(caps) = FRAME_SYMBOL.captures(line) {
            frames.push(CallFrame {
                symbol: caps["symbol"].to_string(),
                location: None,
            });
        } else if let Some(caps) = FRAME_LOCATION.captures(line)
            && let Some(frame) = frames.last_mut()
            && frame.location.is_none()
        {
            frame.location = Some(caps["location"].to_string());
        }
    }

    frames.retain(|frame| {
        let symbol = frame.symbol.trim_start_matches('<');
        !SKIPPED_FRAME_PREFIXES
            .iter()
            .any(|prefix| symbol.starts_with(prefix))
    });
    frames.reverse();
    frames
}

/// A session that records every statement in [`QueryStats`]
pub struct InstrumentedSession<S: SqlSession> {
    inner: S,
    stats: QueryStats,
}

impl<S: SqlSession> InstrumentedSession<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            stats: QueryStats::new(),
        }
    }

    /// Record the issuing call stack with each statement
    pub fn with_call_context(mut self, enabled: bool) -> Self {
        self.stats.capture_call_context = enabled;
        self
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn timed<T>(
        &mut self,
        statement: &str,
        params: &[Value],
        run: impl FnOnce(&mut S) -> WriteResult<T>,
    ) -> WriteResult<T> {
        self.stats.start_query(statement, params);
        let result = run(&mut self.inner);
        // A failed statement stays open and is later logged with a NaN duration
        if result.is_ok() {
            self.stats.end_query();
        }
        result
    }
}

impl<S: SqlSession> SqlSession for InstrumentedSession<S> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64> {
        self.timed(sql, params, |inner| inner.execute(sql, params))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult> {
        self.timed(sql, params, |inner| inner.query(sql, params))
    }

    fn begin(&mut self) -> WriteResult<()> {
        self.timed("BEGIN", &[], |inner| inner.begin())
    }

    fn commit(&mut self) -> WriteResult<()> {
        let result = self.timed("COMMIT", &[], |inner| inner.commit());
        debug!("Done {}", self.stats);
        result
    }

    fn rollback(&mut self) -> WriteResult<()> {
        let result = self.timed("ROLLBACK", &[], |inner| inner.rollback());
        debug!("Done {}", self.stats);
        result
    }
}
