use std::thread;
use std::time::Duration;

use crate::driver::{Session, SessionError, TraceEntry};
use crate::util::jittered;

/// Polls the session trace log for an exchange matching a URL prefix.
///
/// Polling is bounded: after `polls` scans without a match the result is
/// `None`, never an error. The caller is responsible for resetting the trace
/// before the navigation whose traffic it wants to observe.
#[derive(Debug, Clone, Copy)]
pub struct TraceMatcher {
    pub polls: u32,
    pub poll_delay: Duration,
    pub jitter: f64,
}

impl TraceMatcher {
    pub fn new(polls: u32) -> Self {
        Self {
            polls,
            poll_delay: Duration::from_secs(1),
            jitter: 0.3,
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// First matching exchange whose body has fully arrived.
    pub fn wait_for_body(
        &self,
        session: &mut dyn Session,
        prefix: &str,
    ) -> Result<Option<TraceEntry>, SessionError> {
        for attempt in 1..=self.polls.max(1) {
            let log = session.trace_log()?;
            if let Some(entry) = log
                .into_iter()
                .find(|entry| entry.url.starts_with(prefix) && entry.has_body())
            {
                return Ok(Some(entry));
            }
            if attempt < self.polls {
                thread::sleep(jittered(self.poll_delay, self.jitter));
            }
        }
        Ok(None)
    }

    /// Most recent request URL matching the prefix, body or not. Used to
    /// discover the page-image resource URL during acquisition.
    pub fn wait_for_url(
        &self,
        session: &mut dyn Session,
        prefix: &str,
    ) -> Result<Option<String>, SessionError> {
        for attempt in 1..=self.polls.max(1) {
            let log = session.trace_log()?;
            let found = log
                .iter()
                .rev()
                .find(|entry| entry.url.starts_with(prefix))
                .map(|entry| entry.url.clone());
            if found.is_some() {
                return Ok(found);
            }
            if attempt < self.polls {
                thread::sleep(jittered(self.poll_delay, self.jitter));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedSession;

    fn fast(polls: u32) -> TraceMatcher {
        TraceMatcher::new(polls).with_poll_delay(Duration::ZERO)
    }

    #[test]
    fn body_match_is_returned_immediately() {
        let mut session = ScriptedSession::new();
        session.idle_trace = vec![
            ScriptedSession::entry_pending("https://jigsaw.example/books/1/pages"),
            ScriptedSession::entry_with_body("https://jigsaw.example/books/1/images/5/2000", b"jpeg"),
        ];

        let matcher = fast(3);
        let entry = matcher
            .wait_for_body(&mut session, "https://jigsaw.example/books/1/images/")
            .expect("session ok")
            .expect("match found");
        assert!(entry.url.ends_with("/5/2000"));
    }

    #[test]
    fn entries_without_body_do_not_satisfy_body_match() {
        let mut session = ScriptedSession::new();
        session.idle_trace = vec![ScriptedSession::entry_pending(
            "https://jigsaw.example/books/1/images/5/2000",
        )];

        let matcher = fast(4);
        let entry = matcher
            .wait_for_body(&mut session, "https://jigsaw.example/books/1/images/")
            .expect("session ok");
        assert!(entry.is_none());
    }

    #[test]
    fn exhausted_poll_budget_returns_none_not_error() {
        let mut session = ScriptedSession::new();
        session.idle_trace = vec![ScriptedSession::entry_with_body(
            "https://unrelated.example/asset.css",
            b"body",
        )];

        let matcher = fast(5);
        let result = matcher
            .wait_for_url(&mut session, "https://jigsaw.example/books/1/images/")
            .expect("session ok");
        assert!(result.is_none());
    }

    #[test]
    fn url_match_prefers_the_most_recent_entry() {
        let mut session = ScriptedSession::new();
        session.idle_trace = vec![
            ScriptedSession::entry_pending("https://jigsaw.example/books/1/images/4/600"),
            ScriptedSession::entry_pending("https://jigsaw.example/books/1/images/5/600"),
        ];

        let matcher = fast(1);
        let url = matcher
            .wait_for_url(&mut session, "https://jigsaw.example/books/1/images/")
            .expect("session ok")
            .expect("match found");
        assert!(url.contains("/5/"));
    }

    #[test]
    fn match_appearing_on_a_later_poll_is_found() {
        let mut session = ScriptedSession::new();
        session.traces.push_back(Vec::new());
        session.traces.push_back(vec![ScriptedSession::entry_pending(
            "https://jigsaw.example/books/1/images/9/600",
        )]);

        let matcher = fast(3);
        let url = matcher
            .wait_for_url(&mut session, "https://jigsaw.example/books/1/images/")
            .expect("session ok");
        assert!(url.is_some());
    }
}
