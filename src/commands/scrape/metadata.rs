use std::thread;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::driver::Session;
use crate::model::{BookInfoPayload, Pacing, PlatformProfile, StoredMetadata, TocEntry};
use crate::navigate::Navigator;
use crate::trace::TraceMatcher;
use crate::util::jittered;

const METADATA_ATTEMPTS: u32 = 5;
const BODY_POLLS: u32 = 30;

/// Parses the body of the first trace exchange matching `url`. A missing
/// exchange or an unparseable body reads as `None`; metadata is best-effort
/// and never aborts a run.
fn fetch_json<T: DeserializeOwned>(
    session: &mut dyn Session,
    matcher: &TraceMatcher,
    url: &str,
) -> Result<Option<T>> {
    let Some(entry) = matcher.wait_for_body(session, url)? else {
        warn!(%url, "no response observed for metadata endpoint");
        return Ok(None);
    };
    let body = entry
        .response
        .map(|response| response.body)
        .unwrap_or_default();

    match serde_json::from_slice(&body) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(err) => {
            warn!(%url, error = %err, "metadata payload did not parse");
            Ok(None)
        }
    }
}

/// Collects book metadata from the jigsaw endpoints the reader itself calls
/// while loading: page map, book info (title/author) and table of contents.
/// The reader page is reloaded between attempts until the title resolves;
/// after the attempt budget the stored metadata falls back to the book id.
pub fn scrape_metadata(
    session: &mut dyn Session,
    navigator: &mut Navigator<'_>,
    profile: &PlatformProfile,
    book_id: &str,
    pacing: &Pacing,
    start_page: u64,
) -> Result<StoredMetadata> {
    let matcher = TraceMatcher::new(BODY_POLLS).with_poll_delay(pacing.poll);
    let mut metadata = StoredMetadata::fallback(book_id);

    for attempt in 1..=METADATA_ATTEMPTS {
        thread::sleep(pacing.settle(2.0));

        if metadata.pages.is_none() {
            metadata.pages =
                fetch_json::<serde_json::Value>(session, &matcher, &profile.pages_endpoint(book_id))
                    .context("failed while reading the page-map endpoint")?;
        }
        if metadata.toc.is_empty() {
            if let Some(toc) = fetch_json::<Vec<TocEntry>>(
                session,
                &matcher,
                &profile.toc_endpoint(book_id),
            )? {
                metadata.toc = toc;
            }
        }

        let info = fetch_json::<BookInfoPayload>(
            session,
            &matcher,
            &profile.book_info_endpoint(book_id),
        )?;
        if let Some(entry) = info.and_then(|payload| payload.books.into_iter().next()) {
            if let Some(title) = entry.title.filter(|title| !title.trim().is_empty()) {
                metadata.title = title;
            }
            if let Some(author) = entry.author.filter(|author| !author.trim().is_empty()) {
                metadata.author = author;
            }
        }

        if metadata.title != book_id {
            info!(
                title = %metadata.title,
                author = %metadata.author,
                toc_entries = metadata.toc.len(),
                "book metadata resolved"
            );
            return Ok(metadata);
        }

        debug!(attempt, max = METADATA_ATTEMPTS, "metadata incomplete, reloading reader");
        if attempt < METADATA_ATTEMPTS {
            session.reset_trace().context("failed to reset trace log")?;
            navigator.goto_page(session, book_id, start_page)?;
            thread::sleep(jittered(pacing.poll * 10, 0.5));
        }
    }

    warn!(book_id, "metadata never resolved, falling back to book id");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SessionError;
    use crate::driver::scripted::ScriptedSession;
    use crate::model::VITALSOURCE;
    use serde_json::Value;
    use std::time::Duration;

    const BOOK: &str = "9780000000001";

    fn counter_script() -> Box<dyn FnMut(&str) -> Result<Value, SessionError>> {
        Box::new(|js: &str| {
            if js.contains(VITALSOURCE.total_pages_css) {
                Ok(Value::String("120".to_string()))
            } else if js.contains(VITALSOURCE.current_page_css) {
                Ok(Value::String("0".to_string()))
            } else {
                Ok(Value::Null)
            }
        })
    }

    fn instant_navigator() -> Navigator<'static> {
        Navigator::new(&VITALSOURCE)
            .with_settle(Duration::ZERO)
            .with_poll(Duration::ZERO)
    }

    fn full_trace() -> Vec<crate::driver::TraceEntry> {
        vec![
            ScriptedSession::entry_with_body(
                &VITALSOURCE.pages_endpoint(BOOK),
                br#"[{"pageid": 0, "label": "Cover"}]"#,
            ),
            ScriptedSession::entry_with_body(
                &VITALSOURCE.toc_endpoint(BOOK),
                br#"[{"title": "Chapter 1", "cfi": "/4"}]"#,
            ),
            ScriptedSession::entry_with_body(
                &VITALSOURCE.book_info_endpoint(BOOK),
                br#"{"books": [{"title": "Systems Programming", "author": "A. Author"}]}"#,
            ),
        ]
    }

    #[test]
    fn metadata_is_assembled_from_the_three_endpoints() {
        let mut session = ScriptedSession::new();
        session.on_script = counter_script();
        session.idle_trace = full_trace();

        let metadata = scrape_metadata(
            &mut session,
            &mut instant_navigator(),
            &VITALSOURCE,
            BOOK,
            &Pacing::instant(),
            0,
        )
        .expect("metadata scrape succeeds");

        assert_eq!(metadata.title, "Systems Programming");
        assert_eq!(metadata.author, "A. Author");
        assert_eq!(metadata.toc.len(), 1);
        assert_eq!(metadata.toc[0].cfi, "/4");
        assert!(metadata.pages.is_some());
        // The title resolved on the first attempt, so no reload happened.
        assert!(session.navigations.is_empty());
    }

    #[test]
    fn absent_endpoints_fall_back_to_the_book_id() {
        let mut session = ScriptedSession::new();
        session.on_script = counter_script();

        let metadata = scrape_metadata(
            &mut session,
            &mut instant_navigator(),
            &VITALSOURCE,
            BOOK,
            &Pacing::instant(),
            0,
        )
        .expect("fallback still succeeds");

        assert_eq!(metadata.title, BOOK);
        assert_eq!(metadata.author, "Unknown");
        assert!(metadata.toc.is_empty());
        assert!(metadata.pages.is_none());
        // Every retry except the last reloads the reader page.
        assert_eq!(session.navigations.len(), (METADATA_ATTEMPTS - 1) as usize);
    }

    #[test]
    fn malformed_payload_is_tolerated() {
        let mut session = ScriptedSession::new();
        session.on_script = counter_script();
        session.idle_trace = vec![ScriptedSession::entry_with_body(
            &VITALSOURCE.book_info_endpoint(BOOK),
            b"<html>session expired</html>",
        )];

        let metadata = scrape_metadata(
            &mut session,
            &mut instant_navigator(),
            &VITALSOURCE,
            BOOK,
            &Pacing::instant(),
            0,
        )
        .expect("parse failures are not fatal");
        assert_eq!(metadata.title, BOOK);
    }
}
