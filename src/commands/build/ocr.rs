use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::available_parallelism;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

/// Runs `ocrmypdf` over the assembled PDF, producing a searchable PDF/A copy
/// in the system temp directory. The caller decides whether an OCR failure is
/// fatal; the assembled input is never modified.
pub fn ocr_to_searchable(input: &Path, language: &str, title: &str) -> Result<PathBuf> {
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let output = env::temp_dir().join(format!(
        "shelf2pdf_ocr_{}_{stamp}.pdf",
        std::process::id()
    ));
    let jobs = available_parallelism().map(|n| n.get()).unwrap_or(1);

    info!(input = %input.display(), language, jobs, "running ocrmypdf");
    let result = Command::new("ocrmypdf")
        .arg("-l")
        .arg(language)
        .arg("--title")
        .arg(title)
        .arg("--jobs")
        .arg(jobs.to_string())
        .arg("--output-type")
        .arg("pdfa")
        .arg(input)
        .arg(&output)
        .output()
        .context("failed to run ocrmypdf; is it installed and on PATH?")?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        bail!("ocrmypdf failed ({}): {}", result.status, stderr.trim());
    }
    if !output.exists() {
        bail!("ocrmypdf reported success but wrote no output");
    }

    info!(output = %output.display(), "ocr complete");
    Ok(output)
}
