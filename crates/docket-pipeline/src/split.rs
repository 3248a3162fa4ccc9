//! Page splitting.
//!
//! Decomposes a PDF byte stream into self-contained single-page documents
//! in page order. Each page document is produced by cloning the source and
//! deleting every other page, so content streams, fonts and page
//! dimensions survive untouched. Non-PDF inputs (scanned images) pass
//! through as a single element.

use bytes::Bytes;
use lopdf::Document;

use docket_core::{Error, Result};

/// Tracing target for splitter operations.
const TRACING_TARGET: &str = "docket_pipeline::split";

/// Magic prefix identifying PDF input.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// One self-contained page payload.
#[derive(Debug, Clone)]
pub struct PageDocument {
    /// 1-based page number within the source file.
    pub page_number: u32,
    /// Complete single-page document (or the untouched non-PDF input).
    pub bytes: Bytes,
}

/// Returns true when the payload looks like a PDF.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Counts the pages of an input without producing page payloads.
///
/// Non-PDF inputs count as one page. Fails with `CorruptInput` when the
/// page tree cannot be decoded or is empty.
pub fn count_pages(bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() {
        return Err(Error::corrupt_input().with_detail("empty input"));
    }
    if !is_pdf(bytes) {
        return Ok(1);
    }

    let document = load(bytes)?;
    let count = document.get_pages().len() as u32;
    if count == 0 {
        return Err(Error::corrupt_input().with_detail("pdf has no pages"));
    }
    Ok(count)
}

/// Splits an input into single-page documents in page order.
///
/// A one-page PDF bypasses the rewrite and reuses the input bytes; a
/// non-PDF input yields a single passthrough element.
pub fn split_pages(bytes: &Bytes) -> Result<Vec<PageDocument>> {
    if bytes.is_empty() {
        return Err(Error::corrupt_input().with_detail("empty input"));
    }
    if !is_pdf(bytes) {
        return Ok(vec![PageDocument {
            page_number: 1,
            bytes: bytes.clone(),
        }]);
    }

    let document = load(bytes)?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let count = page_numbers.len() as u32;

    if count == 0 {
        return Err(Error::corrupt_input().with_detail("pdf has no pages"));
    }
    if count == 1 {
        return Ok(vec![PageDocument {
            page_number: 1,
            bytes: bytes.clone(),
        }]);
    }

    tracing::debug!(target: TRACING_TARGET, pages = count, "splitting document");

    let mut pages = Vec::with_capacity(page_numbers.len());
    for (index, _) in page_numbers.iter().enumerate() {
        let page_number = index as u32 + 1;
        let mut single = document.clone();

        let delete: Vec<u32> = (1..=count).filter(|&n| n != page_number).collect();
        single.delete_pages(&delete);
        single.prune_objects();
        fix_page_tree_counts(&mut single);
        single.renumber_objects();
        single.compress();

        let mut buffer = Vec::new();
        single
            .save_to(&mut buffer)
            .map_err(|err| Error::with_source(docket_core::ErrorKind::CorruptInput, Box::new(err)))?;

        pages.push(PageDocument {
            page_number,
            bytes: Bytes::from(buffer),
        });
    }

    Ok(pages)
}

/// Rewrites `Count` on every page-tree node to match its surviving kids.
fn fix_page_tree_counts(document: &mut Document) {
    for object in document.objects.values_mut() {
        let lopdf::Object::Dictionary(dict) = object else {
            continue;
        };
        let is_pages = dict
            .get(b"Type")
            .ok()
            .and_then(|value| value.as_name().ok())
            .is_some_and(|name| name == b"Pages");
        if !is_pages {
            continue;
        }
        let count = dict
            .get(b"Kids")
            .ok()
            .and_then(|value| value.as_array().ok())
            .map(|kids| kids.len() as i64);
        if let Some(count) = count {
            dict.set("Count", count);
        }
    }
}

fn load(bytes: &[u8]) -> Result<Document> {
    Document::load_mem(bytes)
        .map_err(|err| Error::with_source(docket_core::ErrorKind::CorruptInput, Box::new(err)))
}
