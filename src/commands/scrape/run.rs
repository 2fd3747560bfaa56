use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{CommonArgs, ScrapeArgs, ScrapeOpts};
use crate::driver::Session;
use crate::driver::cdp::{CdpSession, LaunchOptions};
use crate::model::{Pacing, RunState, ScrapeRunManifest, StoredMetadata};
use crate::navigate::Navigator;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::acquire::{acquire_pages, retry_deferred};
use super::download::download_all;
use super::metadata::scrape_metadata;

pub fn run(args: &ScrapeArgs) -> Result<()> {
    run_parts(&args.common, &args.scrape)
}

pub fn run_parts(common: &CommonArgs, opts: &ScrapeOpts) -> Result<()> {
    let profile = opts.platform.profile();
    let pacing = Pacing {
        base: Duration::from_secs(opts.delay),
        variance: opts.delay_variance,
        min: Duration::from_secs(opts.min_delay),
        max: Duration::from_secs(opts.max_delay),
        poll: Duration::from_secs(1),
    };

    let book_dir = common.output.join(&common.book_id);
    ensure_directory(&book_dir)?;

    let launch = LaunchOptions {
        chrome_executable: opts.chrome_exe.clone(),
        user_agent: opts.user_agent.clone(),
        stealth: !opts.no_stealth,
        disable_web_security: opts.disable_web_security,
    };
    let mut session = CdpSession::launch(&launch)
        .context("could not start a Chromium session; install chromium or pass --chrome-exe")?;

    session
        .navigate(profile.home_url)
        .with_context(|| format!("failed to open {}", profile.home_url))?;
    wait_for_login(profile.name)?;

    let started_at = now_utc_string();
    let mut navigator = Navigator::new(&profile);

    session.reset_trace().context("failed to reset trace log")?;
    let counters = navigator.goto_page(&mut session, &common.book_id, opts.start_page)?;

    let metadata = scrape_metadata(
        &mut session,
        &mut navigator,
        &profile,
        &common.book_id,
        &pacing,
        opts.start_page,
    )?;
    persist_metadata(&book_dir, &metadata)?;

    if opts.metadata_only {
        info!("metadata written, skipping page acquisition");
        return Ok(());
    }

    // When resuming mid-book the reader counter no longer reflects the pages
    // remaining, so the estimate is unbounded and the run ends on the
    // disabled next-page control instead.
    let total_estimate = if opts.start_page > 0 {
        u64::MAX - 1
    } else {
        counters.total
    };
    let mut state = RunState::new(opts.start_page, total_estimate);

    acquire_pages(
        &mut session,
        &mut navigator,
        &profile,
        &common.book_id,
        &pacing,
        opts.end_page,
        &mut state,
    )?;
    retry_deferred(
        &mut session,
        &mut navigator,
        &profile,
        &common.book_id,
        &pacing,
        &mut state,
    )?;

    for cursor in &state.deferred {
        warn!(cursor = *cursor, "page left unresolved, the gap filler will cover it");
    }
    info!(
        pages = state.records.len(),
        deferred = state.deferred.len(),
        "acquisition complete, downloading images"
    );

    let report = download_all(
        &mut session,
        &mut navigator,
        &profile,
        &common.book_id,
        &pacing,
        &book_dir,
        &state,
    )?;
    for label in &report.failed {
        warn!(%label, "page image could not be downloaded");
    }

    let manifest = ScrapeRunManifest {
        manifest_version: 1,
        book_id: common.book_id.clone(),
        platform: profile.name.to_string(),
        started_at,
        finished_at: now_utc_string(),
        pages_resolved: state.records.len(),
        non_numeric_pages: state.non_numeric_pages,
        unresolved_cursors: state.deferred.iter().copied().collect(),
        downloads_succeeded: report.succeeded,
        download_failures: report.failed.clone(),
    };
    let manifest_path = common
        .output
        .join(format!("scrape_run_{}.json", utc_compact_string(Utc::now())));
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        downloaded = report.succeeded,
        failed = report.failed.len(),
        manifest = %manifest_path.display(),
        "scrape finished"
    );
    Ok(())
}

fn persist_metadata(book_dir: &Path, metadata: &StoredMetadata) -> Result<()> {
    let path = book_dir.join("metadata.json");
    write_json_pretty(&path, metadata)?;
    info!(path = %path.display(), "metadata written");
    Ok(())
}

/// The login flow is interactive on purpose: credentials never pass through
/// this tool. The operator signs in inside the launched browser and confirms
/// here.
fn wait_for_login(platform: &str) -> Result<()> {
    let mut stderr = io::stderr();
    write!(
        stderr,
        "Log in to your {platform} account in the browser window, then press Enter to continue... "
    )
    .context("failed to write login prompt")?;
    stderr.flush().context("failed to flush login prompt")?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read login confirmation")?;
    Ok(())
}
