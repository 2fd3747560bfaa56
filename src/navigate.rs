use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, warn};

use crate::driver::Session;
use crate::model::PlatformProfile;
use crate::retry::RetryPolicy;
use crate::util::jittered;

const COUNTER_ATTEMPTS: u32 = 10;
const LOADER_POLLS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Idle,
    Navigating,
    AwaitingLoad,
    Stable,
}

/// Page counters as reported by the reader chrome. `current` is the printed
/// label (arabic, roman or something opaque), `total` the advertised page
/// count, which undercounts non-numeric front matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCounters {
    pub current: String,
    pub total: u64,
}

/// Drives the reader to a target page and waits until the page-loading
/// indicator clears and the page counters report a stable value. Only in
/// [`NavState::Stable`] is it safe to inspect network traffic for the
/// just-loaded page.
pub struct Navigator<'a> {
    profile: &'a PlatformProfile,
    state: NavState,
    settle: Duration,
    poll: Duration,
}

impl<'a> Navigator<'a> {
    pub fn new(profile: &'a PlatformProfile) -> Self {
        Self {
            profile,
            state: NavState::Idle,
            settle: Duration::from_secs(2),
            poll: Duration::from_secs(1),
        }
    }

    /// Overrides the post-navigation settle pause (tests use zero).
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Overrides the counter/loader poll interval (tests use zero).
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Navigates to a book page by pageid and blocks until stable.
    pub fn goto_page(
        &mut self,
        session: &mut dyn Session,
        book_id: &str,
        page: u64,
    ) -> Result<PageCounters> {
        let url = self.profile.reader_url(book_id, page);
        debug!(%url, "navigating to book page");

        self.state = NavState::Navigating;
        session
            .navigate(&url)
            .with_context(|| format!("failed to navigate to {url}"))?;

        self.state = NavState::AwaitingLoad;
        thread::sleep(jittered(self.settle, 0.5));

        let counters = self.read_counters(session)?;
        self.await_loader(session)?;

        self.state = NavState::Stable;
        Ok(counters)
    }

    /// Reads the current/total page counters. The counter elements may not
    /// exist yet right after a navigation, so the read is retried with
    /// backoff; an absent current-page value reads as "0", not as failure.
    pub fn read_counters(&self, session: &mut dyn Session) -> Result<PageCounters> {
        let total_js = probe_script(self.profile.total_pages_css, "innerHTML");
        let current_js = probe_script(self.profile.current_page_css, "value");
        let policy = RetryPolicy::new(COUNTER_ATTEMPTS, self.poll).with_jitter(0.3);

        policy
            .run(|attempt| {
                let total = match session.execute_script(&total_js) {
                    Ok(Value::String(text)) => parse_total(&text),
                    Ok(_) => None,
                    Err(err) => {
                        debug!(attempt, error = %err, "total counter script failed");
                        None
                    }
                };
                let Some(total) = total else {
                    warn!(
                        attempt,
                        max = COUNTER_ATTEMPTS,
                        "waiting for page counter elements"
                    );
                    return Err(anyhow!("page counters not rendered yet"));
                };

                let current = match session.execute_script(&current_js) {
                    Ok(Value::String(value)) if !value.trim().is_empty() => {
                        value.trim().to_string()
                    }
                    Ok(Value::Number(value)) => value.to_string(),
                    _ => "0".to_string(),
                };

                Ok(PageCounters { current, total })
            })
            .context("failed to read page counters after maximum retries")
    }

    /// Polls the loading-indicator selector until it disappears. A stuck
    /// indicator is logged and tolerated so one slow page cannot hang a run.
    pub fn await_loader(&self, session: &mut dyn Session) -> Result<()> {
        for _ in 0..LOADER_POLLS {
            let visible = session
                .element_count(self.profile.page_loader_css)
                .context("failed to query page loader")?;
            if visible == 0 {
                return Ok(());
            }
            thread::sleep(jittered(self.poll, 0.3));
        }
        warn!(polls = LOADER_POLLS, "page loader taking unusually long");
        Ok(())
    }

    /// Whether the reader's next-page control reports disabled, the in-band
    /// signal that the book is complete.
    pub fn next_disabled(&self, session: &mut dyn Session) -> bool {
        let js = probe_script(self.profile.next_page_css, "disabled");
        matches!(session.execute_script(&js), Ok(Value::Bool(true)))
    }
}

fn probe_script(selector: &str, property: &str) -> String {
    format!(
        r#"(() => {{ const el = document.querySelector("{selector}"); return el ? el.{property} : null; }})()"#
    )
}

/// Parses the total-pages counter, rendered either as "12 / 340" or "340".
fn parse_total(text: &str) -> Option<u64> {
    text.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripted::ScriptedSession;
    use crate::model::VITALSOURCE;

    fn fast_navigator(profile: &PlatformProfile) -> Navigator<'_> {
        Navigator::new(profile)
            .with_settle(Duration::ZERO)
            .with_poll(Duration::ZERO)
    }

    fn counter_script(profile: &'static PlatformProfile, current: &str, total: &str) -> Box<dyn FnMut(&str) -> Result<Value, crate::driver::SessionError>> {
        let current = current.to_string();
        let total = total.to_string();
        Box::new(move |js: &str| {
            if js.contains(profile.total_pages_css) {
                Ok(Value::String(total.clone()))
            } else if js.contains(profile.current_page_css) {
                Ok(Value::String(current.clone()))
            } else {
                Ok(Value::Null)
            }
        })
    }

    #[test]
    fn parse_total_handles_both_renderings() {
        assert_eq!(parse_total("12 / 340"), Some(340));
        assert_eq!(parse_total("340"), Some(340));
        assert_eq!(parse_total("  17 "), Some(17));
        assert_eq!(parse_total("n/a"), None);
    }

    #[test]
    fn goto_page_reaches_stable_and_reads_counters() {
        let mut session = ScriptedSession::new();
        session.on_script = counter_script(&VITALSOURCE, "7", "3 / 120");

        let mut navigator = fast_navigator(&VITALSOURCE);
        assert_eq!(navigator.state(), NavState::Idle);

        let counters = navigator
            .goto_page(&mut session, "9781234567890", 7)
            .expect("navigation succeeds");

        assert_eq!(navigator.state(), NavState::Stable);
        assert_eq!(counters.current, "7");
        assert_eq!(counters.total, 120);
        assert_eq!(
            session.navigations,
            vec!["https://bookshelf.vitalsource.com/reader/books/9781234567890/pageid/7"]
        );
    }

    #[test]
    fn missing_current_counter_reads_as_zero() {
        let mut session = ScriptedSession::new();
        session.on_script = Box::new(|js: &str| {
            if js.contains(VITALSOURCE.total_pages_css) {
                Ok(Value::String("55".to_string()))
            } else {
                Ok(Value::Null)
            }
        });

        let navigator = fast_navigator(&VITALSOURCE);
        let counters = navigator.read_counters(&mut session).expect("counters");
        assert_eq!(counters.current, "0");
        assert_eq!(counters.total, 55);
    }

    #[test]
    fn counters_appearing_after_a_few_polls_are_read() {
        let mut session = ScriptedSession::new();
        let mut calls = 0;
        session.on_script = Box::new(move |js: &str| {
            if js.contains(VITALSOURCE.total_pages_css) {
                calls += 1;
                if calls < 4 {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String("10".to_string()))
                }
            } else {
                Ok(Value::String("2".to_string()))
            }
        });

        let navigator = fast_navigator(&VITALSOURCE);
        let counters = navigator.read_counters(&mut session).expect("counters");
        assert_eq!(counters.total, 10);
        assert_eq!(counters.current, "2");
    }

    #[test]
    fn counters_never_appearing_exhausts_the_budget() {
        let mut session = ScriptedSession::new();
        let navigator = fast_navigator(&VITALSOURCE);
        assert!(navigator.read_counters(&mut session).is_err());
    }

    #[test]
    fn loader_clearing_is_awaited() {
        let mut session = ScriptedSession::new();
        let mut polls = 0;
        session.on_elements = Box::new(move |_| {
            polls += 1;
            if polls < 3 { 1 } else { 0 }
        });

        let navigator = fast_navigator(&VITALSOURCE);
        assert!(navigator.await_loader(&mut session).is_ok());
    }

    #[test]
    fn next_disabled_only_on_explicit_true() {
        let mut session = ScriptedSession::new();
        session.on_script = Box::new(|_| Ok(Value::Bool(true)));
        let navigator = fast_navigator(&VITALSOURCE);
        assert!(navigator.next_disabled(&mut session));

        let mut session = ScriptedSession::new();
        session.on_script = Box::new(|_| Ok(Value::Null));
        assert!(!navigator.next_disabled(&mut session));
    }
}
