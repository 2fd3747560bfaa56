use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use tracing::{info, warn};

use crate::driver::Session;
use crate::model::{Pacing, PageRecord, PlatformProfile, RunState};
use crate::navigate::Navigator;
use crate::trace::TraceMatcher;
use crate::util::{jittered, progress_bar};

const DOWNLOAD_ATTEMPTS: u32 = 6;
const BODY_POLLS: u32 = 15;
/// Narrower downloads are the reader serving a thumbnail; they are retried
/// after a session recovery.
const MIN_WIDTH: u32 = 1000;
/// Size segment requesting the maximum-resolution variant.
const MAX_RESOLUTION: &str = "2000";

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub succeeded: usize,
    pub failed: Vec<String>,
}

enum Stored {
    Valid { width: u32 },
    TooNarrow { width: u32 },
}

/// Persists raw bytes, validates the decoded width and re-encodes the image
/// at maximum JPEG quality as the canonical acquired file.
fn validate_and_store(body: &[u8], path: &Path) -> Result<Stored> {
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;

    let decoded =
        image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    let width = decoded.width();
    if width < MIN_WIDTH {
        return Ok(Stored::TooNarrow { width });
    }

    let file =
        File::create(path).with_context(|| format!("failed to rewrite {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, 100);
    decoded
        .write_with_encoder(encoder)
        .with_context(|| format!("failed to re-encode {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    Ok(Stored::Valid { width })
}

/// Downloads every recorded page image through the shared session, one at a
/// time. A failed page is recorded in the report, never fatal: the
/// reconstructor runs with whatever succeeded.
pub fn download_all(
    session: &mut dyn Session,
    navigator: &mut Navigator<'_>,
    profile: &PlatformProfile,
    book_id: &str,
    pacing: &Pacing,
    book_dir: &Path,
    state: &RunState,
) -> Result<DownloadReport> {
    let mut ordered: Vec<&PageRecord> = state.records.iter().collect();
    ordered.sort_by_key(|record| record.label.to_string());

    let prefix = profile.image_prefix(book_id);
    let matcher = TraceMatcher::new(BODY_POLLS).with_poll_delay(pacing.poll);
    let bar = progress_bar(ordered.len() as u64, "downloading images");
    let mut report = DownloadReport::default();

    for record in ordered {
        let path = book_dir.join(format!("{}.jpg", record.label));
        let mut stored_path: Option<PathBuf> = None;

        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            session.reset_trace().context("failed to reset trace log")?;
            thread::sleep(pacing.page_pause());

            let url = format!("{}/{}", record.url.trim_end_matches('/'), MAX_RESOLUTION);
            session
                .navigate(&url)
                .with_context(|| format!("failed to navigate to {url}"))?;
            thread::sleep(pacing.settle(2.0));

            let Some(entry) = matcher.wait_for_body(session, &prefix)? else {
                warn!(label = %record.label, attempt, "no image data in trace");
                if attempt >= 4 {
                    thread::sleep(jittered(pacing.poll * 15, 0.5));
                }
                continue;
            };
            let body = entry
                .response
                .map(|response| response.body)
                .unwrap_or_default();

            match validate_and_store(&body, &path) {
                Ok(Stored::Valid { width }) => {
                    info!(label = %record.label, width, path = %path.display(), "saved page image");
                    stored_path = Some(path.clone());
                    break;
                }
                Ok(Stored::TooNarrow { width }) => {
                    warn!(
                        label = %record.label,
                        width,
                        min = MIN_WIDTH,
                        "image under resolution, recovering session"
                    );
                    let _ = fs::remove_file(&path);
                    session
                        .navigate(profile.home_url)
                        .context("failed recovery navigation")?;
                    thread::sleep(jittered(pacing.poll * 8, 0.5));
                    navigator.goto_page(session, book_id, 0)?;
                    thread::sleep(jittered(pacing.poll * 8, 0.5));
                }
                Err(err) => {
                    warn!(label = %record.label, error = %err, "failed to store image");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        if stored_path.is_some() {
            report.succeeded += 1;
        } else {
            warn!(label = %record.label, url = %record.url, "giving up on page image");
            report.failed.push(record.label.to_string());
        }
        bar.inc(1);
    }

    bar.finish_and_clear();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SessionError;
    use crate::driver::scripted::ScriptedSession;
    use crate::model::VITALSOURCE;
    use crate::roman::PageLabel;
    use serde_json::Value;
    use std::io::Cursor;
    use std::time::Duration;

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let canvas = image::RgbImage::from_pixel(width, height, image::Rgb([120, 120, 120]));
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        let encoder = JpegEncoder::new_with_quality(&mut cursor, 80);
        image::DynamicImage::ImageRgb8(canvas)
            .write_with_encoder(encoder)
            .expect("jpeg encoding succeeds");
        bytes
    }

    fn counter_script() -> Box<dyn FnMut(&str) -> Result<Value, SessionError>> {
        Box::new(|js: &str| {
            if js.contains(VITALSOURCE.total_pages_css) {
                Ok(Value::String("10".to_string()))
            } else if js.contains(VITALSOURCE.current_page_css) {
                Ok(Value::String("0".to_string()))
            } else {
                Ok(Value::Null)
            }
        })
    }

    fn single_record_state(label: PageLabel) -> RunState {
        let mut state = RunState::new(0, 10);
        state.records.insert(crate::model::PageRecord {
            label,
            url: "https://jigsaw.vitalsource.com/books/9780000000001/images/12".to_string(),
        });
        state
    }

    #[test]
    fn under_resolution_image_triggers_recovery_then_succeeds() {
        let image_url = "https://jigsaw.vitalsource.com/books/9780000000001/images/12/2000";
        let mut session = ScriptedSession::new();
        session.on_script = counter_script();
        session.traces.push_back(vec![ScriptedSession::entry_with_body(
            image_url,
            &jpeg_bytes(500, 700),
        )]);
        session.traces.push_back(vec![ScriptedSession::entry_with_body(
            image_url,
            &jpeg_bytes(2000, 2588),
        )]);

        let mut navigator = Navigator::new(&VITALSOURCE)
            .with_settle(Duration::ZERO)
            .with_poll(Duration::ZERO);
        let state = single_record_state(PageLabel::Integer(12));
        let book_dir = tempfile::tempdir().expect("tempdir");
        let pacing = Pacing::instant();

        let report = download_all(
            &mut session,
            &mut navigator,
            &VITALSOURCE,
            "9780000000001",
            &pacing,
            book_dir.path(),
            &state,
        )
        .expect("download pass completes");

        assert_eq!(report.succeeded, 1);
        assert!(report.failed.is_empty());

        let stored = image::open(book_dir.path().join("12.jpg")).expect("stored image decodes");
        assert!(stored.width() >= MIN_WIDTH);
        // Recovery navigated back through the reader home page.
        assert!(
            session
                .navigations
                .iter()
                .any(|url| url == VITALSOURCE.home_url)
        );
    }

    #[test]
    fn missing_body_exhausts_attempts_and_is_reported() {
        let mut session = ScriptedSession::new();
        session.on_script = counter_script();

        let mut navigator = Navigator::new(&VITALSOURCE)
            .with_settle(Duration::ZERO)
            .with_poll(Duration::ZERO);
        let state = single_record_state(PageLabel::Integer(3));
        let book_dir = tempfile::tempdir().expect("tempdir");
        let pacing = Pacing::instant();

        let report = download_all(
            &mut session,
            &mut navigator,
            &VITALSOURCE,
            "9780000000001",
            &pacing,
            book_dir.path(),
            &state,
        )
        .expect("download pass completes");

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, vec!["3".to_string()]);
        assert!(!book_dir.path().join("3.jpg").exists());
        // One trace reset per attempt.
        assert_eq!(session.resets as u32, DOWNLOAD_ATTEMPTS);
    }

    #[test]
    fn stored_image_is_reencoded_and_valid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("7.jpg");
        let outcome = validate_and_store(&jpeg_bytes(1200, 800), &path).expect("store succeeds");
        assert!(matches!(outcome, Stored::Valid { width: 1200 }));
        assert!(path.exists());
        assert_eq!(image::open(&path).expect("decodes").width(), 1200);
    }

    #[test]
    fn corrupt_bytes_are_an_error_not_a_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("9.jpg");
        assert!(validate_and_store(b"not a jpeg", &path).is_err());
    }
}
