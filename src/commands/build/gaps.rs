use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use tracing::{info, warn};

use crate::roman::PageLabel;
use crate::sequence::sequence_labels;

/// Filler dimensions match the reader's native page-image resolution so the
/// synthesized pages do not change the reconstructed page geometry.
const FILLER_WIDTH: u32 = 2000;
const FILLER_HEIGHT: u32 = 2588;

/// Scans the ordered labels for non-contiguous integer neighbors and writes a
/// blank white page image for every missing value. Returns the labels that
/// were synthesized.
pub fn fill_gaps(book_dir: &Path, labels: &[PageLabel]) -> Result<Vec<i64>> {
    let ordered = sequence_labels(labels);
    let mut created = Vec::new();
    let mut previous: Option<i64> = None;

    for label in &ordered {
        let Some(value) = label.as_integer() else {
            continue;
        };
        if let Some(prev) = previous {
            for missing in (prev + 1)..value {
                let path = book_dir.join(format!("{missing}.jpg"));
                if path.exists() {
                    continue;
                }
                warn!(page = missing, "page missing, inserting a blank filler");
                write_filler(&path)?;
                created.push(missing);
            }
        }
        previous = Some(value);
    }

    if !created.is_empty() {
        info!(count = created.len(), "blank filler pages written");
    }
    Ok(created)
}

fn write_filler(path: &Path) -> Result<()> {
    let canvas = RgbImage::from_pixel(FILLER_WIDTH, FILLER_HEIGHT, Rgb([255, 255, 255]));
    canvas
        .save(path)
        .with_context(|| format!("failed to write filler page {}", path.display()))
}
