use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::Serialize;

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// A delay randomized within `base ± base * variance`.
pub fn jittered(base: Duration, variance: f64) -> Duration {
    if variance <= 0.0 || base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range((1.0 - variance).max(0.0)..=(1.0 + variance));
    base.mul_f64(factor)
}

/// A pause between `min` and `max`, with a one-in-five chance of running up
/// to twice `max` so the pacing does not look metronomic.
pub fn human_delay(min: Duration, max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let min_s = min.as_secs_f64().min(max.as_secs_f64());
    let max_s = max.as_secs_f64();
    let mut rng = rand::thread_rng();
    let seconds = if rng.gen_bool(0.8) {
        rng.gen_range(min_s..=max_s)
    } else {
        rng.gen_range(max_s..=max_s * 2.0)
    };
    Duration::from_secs_f64(seconds)
}

pub fn progress_bar(len: u64, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg:<18} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(message.to_string());
    bar
}
