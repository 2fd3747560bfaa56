use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{BuildArgs, BuildOpts, CommonArgs};
use crate::model::StoredMetadata;
use crate::roman::PageLabel;
use crate::sequence::sequence_labels;

use super::assemble::{compress_copy, finalize, images_to_pdf};
use super::gaps::fill_gaps;
use super::ocr::ocr_to_searchable;

pub fn run(args: &BuildArgs) -> Result<()> {
    run_parts(&args.common, &args.build)
}

pub fn run_parts(common: &CommonArgs, opts: &BuildOpts) -> Result<()> {
    let book_dir = common.output.join(&common.book_id);
    if !book_dir.is_dir() {
        bail!(
            "no acquired pages at {}; run the scrape command first",
            book_dir.display()
        );
    }

    let metadata = load_metadata(&book_dir, &common.book_id);

    let inventory = page_inventory(&book_dir)?;
    if inventory.is_empty() {
        bail!("no page images found in {}", book_dir.display());
    }
    let labels: Vec<PageLabel> = inventory.iter().map(|(label, _)| label.clone()).collect();
    fill_gaps(&book_dir, &labels)?;

    // Re-scan so synthesized filler pages join the inventory.
    let inventory = page_inventory(&book_dir)?;
    let by_label: HashMap<String, PathBuf> = inventory
        .iter()
        .map(|(label, path)| (label.to_string(), path.clone()))
        .collect();
    let labels: Vec<PageLabel> = inventory.iter().map(|(label, _)| label.clone()).collect();
    let ordered = sequence_labels(&labels);
    let paths: Vec<PathBuf> = ordered
        .iter()
        .filter_map(|label| by_label.get(&label.to_string()).cloned())
        .collect();

    let raw_path = common.output.join(format!("{} RAW.pdf", common.book_id));
    images_to_pdf(&paths, &raw_path)?;

    let searchable = if opts.skip_ocr {
        raw_path.clone()
    } else {
        match ocr_to_searchable(&raw_path, &opts.language, &metadata.title) {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "ocr failed, continuing with the image-only pdf");
                raw_path.clone()
            }
        }
    };

    let roman_pages = ordered.iter().filter(|label| label.is_roman()).count();
    let final_path = common
        .output
        .join(format!("{}.pdf", sanitize_stem(&metadata.title)));
    finalize(&searchable, &final_path, &metadata, roman_pages)?;

    if opts.compress {
        let compressed_path = common
            .output
            .join(format!("{} compressed.pdf", sanitize_stem(&metadata.title)));
        compress_copy(&final_path, &compressed_path)?;
    }

    info!(
        pages = paths.len(),
        roman_pages,
        path = %final_path.display(),
        "book rebuilt"
    );
    Ok(())
}

fn load_metadata(book_dir: &Path, book_id: &str) -> StoredMetadata {
    let path = book_dir.join("metadata.json");
    match fs::read(&path)
        .map_err(anyhow::Error::from)
        .and_then(|data| serde_json::from_slice(&data).map_err(Into::into))
    {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "metadata unavailable, using fallback");
            StoredMetadata::fallback(book_id)
        }
    }
}

/// Every `.jpg` in the book directory, labelled by its file stem and sorted
/// by stem so the scan order is stable across filesystems.
fn page_inventory(book_dir: &Path) -> Result<Vec<(PageLabel, PathBuf)>> {
    let mut pages = Vec::new();
    let entries = fs::read_dir(book_dir)
        .with_context(|| format!("failed to list {}", book_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", book_dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jpg") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        pages.push((PageLabel::classify(stem), path.clone()));
    }
    pages.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(pages)
}

fn sanitize_stem(title: &str) -> String {
    title.replace(['/', '\\'], "-")
}
