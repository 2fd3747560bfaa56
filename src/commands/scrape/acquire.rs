use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::driver::{Session, SessionError};
use crate::model::{Pacing, PageRecord, PlatformProfile, RunState};
use crate::navigate::Navigator;
use crate::retry::CircuitBreaker;
use crate::roman::PageLabel;
use crate::trace::TraceMatcher;
use crate::util::{jittered, progress_bar};

const RESOLVE_ROUNDS: u32 = 3;
const RESOLVE_POLLS: u32 = 3;
const BREAKER_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// Strips the trailing size segment from an observed page-image URL,
/// leaving the resource base a max-resolution variant can be derived from.
fn base_resource_url(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, _)) => base.to_string(),
        None => url.to_string(),
    }
}

/// Resolves the displayed page's image base URL from the trace log.
/// Unresolved after all rounds is a deferrable outcome, not an error.
fn resolve_base_url(
    session: &mut dyn Session,
    prefix: &str,
    pacing: &Pacing,
) -> Result<Option<String>, SessionError> {
    let matcher = TraceMatcher::new(RESOLVE_POLLS).with_poll_delay(pacing.poll);
    let mut retry_delay = jittered(pacing.poll * 5, 0.5);

    for round in 1..=RESOLVE_ROUNDS {
        if let Some(url) = matcher.wait_for_url(session, prefix)? {
            return Ok(Some(base_resource_url(&url)));
        }
        if round < RESOLVE_ROUNDS {
            debug!(round, delay = ?retry_delay, "no image exchange yet, backing off");
            thread::sleep(retry_delay);
            retry_delay = jittered(retry_delay + pacing.poll * 3, 0.4);
        }
    }
    Ok(None)
}

/// Main acquisition pass: walk the book with the arrow key, resolving one
/// resource URL per displayed page. Pages that fail to resolve are deferred
/// to [`retry_deferred`]; a non-numeric label raises the total estimate by
/// one because the reader's counter undercounts front matter.
pub fn acquire_pages(
    session: &mut dyn Session,
    navigator: &mut Navigator<'_>,
    profile: &PlatformProfile,
    book_id: &str,
    pacing: &Pacing,
    end_page: Option<u64>,
    state: &mut RunState,
) -> Result<()> {
    let prefix = profile.image_prefix(book_id);
    let mut breaker = CircuitBreaker::new(BREAKER_THRESHOLD, BREAKER_COOLDOWN);
    let bar = progress_bar(state.total_estimate, "scraping pages");
    bar.set_position(state.cursor);

    while state.cursor < state.total_estimate.saturating_add(1) {
        thread::sleep(pacing.page_pause());

        let base_url = resolve_base_url(session, &prefix, pacing)?;
        let counters = navigator.read_counters(session)?;

        match base_url {
            None => {
                warn!(cursor = state.cursor, "could not resolve page URL, retrying later");
                state.deferred.insert(state.cursor);
                if let Some(cooldown) = breaker.record_failure() {
                    bar.println(format!(
                        "too many failures, taking a {}s break...",
                        cooldown.as_secs()
                    ));
                    thread::sleep(cooldown);
                }
            }
            Some(url) => {
                let label = PageLabel::classify(&counters.current);
                if !label.is_integer() {
                    state.total_estimate = state.total_estimate.saturating_add(1);
                    state.non_numeric_pages += 1;
                    bar.set_length(state.total_estimate);
                    info!(
                        label = %label,
                        total = state.total_estimate,
                        "non-numeric page, raising page count"
                    );
                }
                debug!(cursor = state.cursor, label = %label, %url, "resolved page resource");
                state.records.insert(PageRecord { label, url });
                breaker.record_success();
            }
        }

        if end_page == Some(state.cursor) {
            info!(cursor = state.cursor, "reached configured end page");
            break;
        }
        if state.cursor > 0 && navigator.next_disabled(session) {
            info!("next-page control disabled, book complete");
            break;
        }

        // Reset-then-navigate: the trace must only ever contain exchanges
        // belonging to the page being resolved next.
        session.reset_trace().context("failed to reset trace log")?;
        session
            .send_key("ArrowRight")
            .context("failed to advance to next page")?;
        thread::sleep(jittered(pacing.poll.mul_f64(0.3), 0.5));

        state.cursor += 1;
        bar.inc(1);
    }

    bar.finish_and_clear();
    Ok(())
}

/// Second pass over the deferred set: each page gets a full navigation and
/// one more resolution attempt. Still-unresolved pages are reported and left
/// to the gap filler.
pub fn retry_deferred(
    session: &mut dyn Session,
    navigator: &mut Navigator<'_>,
    profile: &PlatformProfile,
    book_id: &str,
    pacing: &Pacing,
    state: &mut RunState,
) -> Result<()> {
    if state.deferred.is_empty() {
        return Ok(());
    }

    info!(count = state.deferred.len(), "re-doing failed pages");
    let prefix = profile.image_prefix(book_id);
    let bar = progress_bar(state.deferred.len() as u64, "retrying pages");
    let pending: Vec<u64> = state.deferred.iter().copied().collect();

    for cursor in pending {
        session.reset_trace().context("failed to reset trace log")?;
        let counters = navigator.goto_page(session, book_id, cursor)?;
        thread::sleep(pacing.page_pause());

        match resolve_base_url(session, &prefix, pacing)? {
            Some(url) => {
                let label = PageLabel::classify(&counters.current);
                info!(cursor, label = %label, %url, "recovered page resource");
                state.records.insert(PageRecord { label, url });
                state.deferred.remove(&cursor);
            }
            None => {
                warn!(cursor, "page still unresolved after second pass");
            }
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    Ok(())
}
