use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod cdp;

/// Errors surfaced by a [`Session`]. Script failures are transient UI
/// conditions (an element not rendered yet) and are always retried by the
/// callers; backend failures indicate the browser connection itself broke.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("browser backend error: {0}")]
    Backend(String),
}

/// One observed HTTP exchange since the last trace reset.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub url: String,
    pub response: Option<TraceResponse>,
}

#[derive(Debug, Clone)]
pub struct TraceResponse {
    pub body: Vec<u8>,
    pub arrived_at: DateTime<Utc>,
}

impl TraceEntry {
    pub fn has_body(&self) -> bool {
        self.response
            .as_ref()
            .is_some_and(|response| !response.body.is_empty())
    }
}

/// The slice of browser automation the pipeline needs. The session is driven
/// from a single logical thread; navigation, script evaluation and trace
/// inspection are strictly sequential.
///
/// Callers own the trace-log discipline: [`reset_trace`](Session::reset_trace)
/// must run immediately before any navigation whose traffic will be matched,
/// otherwise a stale exchange from the previous page can be picked up.
pub trait Session {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Evaluates a script in the page and returns its JSON value. Scripts
    /// should return `null` rather than throw when an element is missing.
    fn execute_script(&mut self, js: &str) -> Result<serde_json::Value, SessionError>;

    /// Number of elements currently matching a CSS selector.
    fn element_count(&mut self, css: &str) -> Result<usize, SessionError>;

    /// Dispatches one keyboard key (e.g. "ArrowRight") to the page.
    fn send_key(&mut self, key: &str) -> Result<(), SessionError>;

    /// All exchanges observed since the last reset, in arrival order.
    fn trace_log(&mut self) -> Result<Vec<TraceEntry>, SessionError>;

    fn reset_trace(&mut self) -> Result<(), SessionError>;
}
