use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tracing::{debug, info, warn};

use crate::model::{StoredMetadata, TocEntry};

/// Reader images are 96dpi raster; PDF user space is 72 units per inch.
const PX_TO_PT: f32 = 72.0 / 96.0;

/// Builds a raw PDF with one page per JPEG, embedded losslessly as DCTDecode
/// image XObjects in the order given.
pub fn images_to_pdf(images: &[PathBuf], out: &Path) -> Result<()> {
    if images.is_empty() {
        bail!("no page images to assemble");
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(images.len());

    for path in images {
        let (width, height) = image::image_dimensions(path)
            .with_context(|| format!("failed to read dimensions of {}", path.display()))?;
        let data =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

        let xobject_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data,
        ));
        let resources_id = doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => xobject_id },
        });

        let width_pt = width as f32 * PX_TO_PT;
        let height_pt = height as f32 * PX_TO_PT;
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        width_pt.into(),
                        0.into(),
                        0.into(),
                        height_pt.into(),
                        0.into(),
                        0.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("failed to encode page content")?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
            "Contents" => content_id,
        });
        page_ids.push(page_id);
        debug!(path = %path.display(), width, height, "page embedded");
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| (*id).into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(out)
        .with_context(|| format!("failed to save {}", out.display()))?;
    info!(pages = page_ids.len(), path = %out.display(), "raw pdf assembled");
    Ok(())
}

/// Stamps document info, the outline tree and page labels onto an assembled
/// (or OCRed) PDF and writes the result to `out`.
///
/// Page labels follow the printed numbering: page one is labelled "Cover",
/// the front matter is numbered in lowercase roman, and arabic numbering
/// restarts at 1 after it.
pub fn finalize(
    input: &Path,
    out: &Path,
    metadata: &StoredMetadata,
    roman_pages: usize,
) -> Result<()> {
    let mut doc = Document::load(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();

    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(metadata.title.clone()),
        "Author" => Object::string_literal(metadata.author.clone()),
        "Creator" => Object::string_literal(format!("ISBN: {}", metadata.book_id)),
    });
    doc.trailer.set("Info", info_id);

    let outlines_id = build_outline(&mut doc, &metadata.toc, &pages);
    let labels = page_label_tree(roman_pages);

    let root_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|err| anyhow!("pdf has no document catalog: {err}"))?;
    let catalog = doc
        .get_object_mut(root_id)?
        .as_dict_mut()
        .context("document catalog is not a dictionary")?;
    if let Some(outlines_id) = outlines_id {
        catalog.set("Outlines", outlines_id);
    }
    if let Some(labels) = labels {
        catalog.set("PageLabels", labels);
    }

    doc.save(out)
        .with_context(|| format!("failed to save {}", out.display()))?;
    info!(path = %out.display(), "final pdf written");
    Ok(())
}

/// Writes a compressed copy of `input` to `out`. The uncompressed original is
/// kept untouched.
pub fn compress_copy(input: &Path, out: &Path) -> Result<()> {
    let mut doc = Document::load(input)
        .with_context(|| format!("failed to load {}", input.display()))?;
    doc.compress();
    doc.save(out)
        .with_context(|| format!("failed to save compressed copy {}", out.display()))?;
    info!(path = %out.display(), "compressed copy written");
    Ok(())
}

/// A flat outline tree from the scraped TOC. Anchors are one-based page
/// numbers; entries pointing outside the document are dropped.
fn build_outline(doc: &mut Document, toc: &[TocEntry], pages: &[ObjectId]) -> Option<ObjectId> {
    let anchors: Vec<(String, ObjectId)> = toc
        .iter()
        .filter_map(|entry| {
            let page: i64 = entry.cfi.trim_matches('/').trim().parse().ok()?;
            let index = usize::try_from(page.checked_sub(1)?).ok()?;
            match pages.get(index) {
                Some(page_id) => Some((entry.title.clone(), *page_id)),
                None => {
                    warn!(title = %entry.title, page, "toc entry beyond last page, skipped");
                    None
                }
            }
        })
        .collect();
    if anchors.is_empty() {
        return None;
    }

    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = anchors.iter().map(|_| doc.new_object_id()).collect();

    for (index, ((title, page_id), item_id)) in anchors.iter().zip(&item_ids).enumerate() {
        let mut item = dictionary! {
            "Title" => Object::string_literal(title.clone()),
            "Parent" => outlines_id,
            "Dest" => vec![(*page_id).into(), "Fit".into()],
        };
        if index > 0 {
            item.set("Prev", item_ids[index - 1]);
        }
        if index + 1 < item_ids.len() {
            item.set("Next", item_ids[index + 1]);
        }
        doc.objects.insert(*item_id, Object::Dictionary(item));
    }

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => item_ids[0],
            "Last" => item_ids[item_ids.len() - 1],
            "Count" => item_ids.len() as i64,
        }),
    );
    Some(outlines_id)
}

fn page_label_tree(roman_pages: usize) -> Option<Dictionary> {
    if roman_pages == 0 {
        return None;
    }
    let nums: Vec<Object> = vec![
        0.into(),
        dictionary! { "P" => Object::string_literal("Cover") }.into(),
        1.into(),
        dictionary! { "S" => "r", "St" => 1 }.into(),
        (roman_pages as i64 + 1).into(),
        dictionary! { "S" => "D", "St" => 1 }.into(),
    ];
    Some(dictionary! { "Nums" => nums })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use std::io::Cursor;

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let canvas = image::RgbImage::from_pixel(width, height, image::Rgb([200, 200, 200]));
        let mut bytes = Vec::new();
        let mut cursor = Cursor::new(&mut bytes);
        let encoder = JpegEncoder::new_with_quality(&mut cursor, 80);
        image::DynamicImage::ImageRgb8(canvas)
            .write_with_encoder(encoder)
            .expect("jpeg encodes");
        fs::write(path, bytes).expect("jpeg written");
    }

    fn metadata_with_toc() -> StoredMetadata {
        StoredMetadata {
            book_id: "9780000000001".to_string(),
            title: "A Title".to_string(),
            author: "An Author".to_string(),
            toc: vec![
                TocEntry {
                    title: "Chapter 1".to_string(),
                    cfi: "/1".to_string(),
                },
                TocEntry {
                    title: "Out of range".to_string(),
                    cfi: "/99".to_string(),
                },
            ],
            pages: None,
        }
    }

    fn media_box_width(doc: &Document, page_number: u32) -> f32 {
        let page_id = doc.get_pages()[&page_number];
        let media_box = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .and_then(|dict| dict.get(b"MediaBox"))
            .and_then(Object::as_array)
            .expect("page has a media box");
        media_box[2].as_float().expect("width is numeric")
    }

    #[test]
    fn assembled_pdf_preserves_page_order_and_geometry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("1.jpg");
        let second = dir.path().join("2.jpg");
        write_jpeg(&first, 400, 500);
        write_jpeg(&second, 800, 500);

        let out = dir.path().join("raw.pdf");
        images_to_pdf(&[first, second], &out).expect("assembly succeeds");

        let doc = Document::load(&out).expect("pdf loads");
        assert_eq!(doc.get_pages().len(), 2);
        assert!((media_box_width(&doc, 1) - 400.0 * PX_TO_PT).abs() < 0.01);
        assert!((media_box_width(&doc, 2) - 800.0 * PX_TO_PT).abs() < 0.01);
    }

    #[test]
    fn empty_input_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(images_to_pdf(&[], &dir.path().join("raw.pdf")).is_err());
    }

    #[test]
    fn finalize_stamps_info_and_outline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = dir.path().join("1.jpg");
        write_jpeg(&page, 400, 500);
        let raw = dir.path().join("raw.pdf");
        images_to_pdf(&[page], &raw).expect("assembly succeeds");

        let out = dir.path().join("final.pdf");
        finalize(&raw, &out, &metadata_with_toc(), 0).expect("finalize succeeds");

        let doc = Document::load(&out).expect("pdf loads");
        let catalog = doc.catalog().expect("catalog exists");
        // No roman front matter, so no label tree is written.
        assert!(catalog.get(b"PageLabels").is_err());

        let outlines = catalog
            .get(b"Outlines")
            .and_then(Object::as_reference)
            .expect("outline root referenced");
        let outlines = doc
            .get_object(outlines)
            .and_then(Object::as_dict)
            .expect("outline root is a dictionary");
        // The out-of-range entry was dropped.
        let count = outlines
            .get(b"Count")
            .and_then(Object::as_i64)
            .expect("outline count present");
        assert_eq!(count, 1);
    }

    #[test]
    fn roman_front_matter_produces_a_label_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = dir.path().join("1.jpg");
        write_jpeg(&page, 400, 500);
        let raw = dir.path().join("raw.pdf");
        images_to_pdf(&[page], &raw).expect("assembly succeeds");

        let out = dir.path().join("final.pdf");
        finalize(&raw, &out, &metadata_with_toc(), 2).expect("finalize succeeds");

        let doc = Document::load(&out).expect("pdf loads");
        let labels = doc
            .catalog()
            .expect("catalog exists")
            .get(b"PageLabels")
            .and_then(Object::as_dict)
            .expect("label tree present");
        let nums = labels
            .get(b"Nums")
            .and_then(Object::as_array)
            .expect("nums array present");
        // Three ranges: cover, roman front matter, arabic body.
        assert_eq!(nums.len(), 6);
        // Arabic numbering restarts right after the roman range.
        assert_eq!(nums[4].as_i64().expect("range start is an integer"), 3);
    }

    #[test]
    fn compressed_copy_leaves_the_original_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let page = dir.path().join("1.jpg");
        write_jpeg(&page, 400, 500);
        let raw = dir.path().join("raw.pdf");
        images_to_pdf(&[page], &raw).expect("assembly succeeds");

        let compressed = dir.path().join("compressed.pdf");
        compress_copy(&raw, &compressed).expect("compression succeeds");
        assert!(raw.exists());
        assert!(Document::load(&compressed).is_ok());
    }
}
