//! Document assembly stage.
//!
//! Deterministic merge of the narrative and the illustration set into one
//! self-contained HTML book: images inlined as data URIs, no external
//! references. A missing illustration degrades that position to a text-only
//! placeholder rather than failing the stage; the affected indices are
//! recorded on the document record. Re-running overwrites in place.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt::Write;
use tracing::{info, warn};

use storyforge_store::ArtifactStore;
use storyforge_types::{DocumentRecord, JobConfig, JobId, Narrative, PageRole, StoryforgeError};

/// Assemble and persist the book for a job.
///
/// # Errors
/// Returns store errors only; absent illustrations are not an error here.
pub(crate) fn run(
    artifacts: &ArtifactStore,
    job_id: &JobId,
    config: &JobConfig,
    narrative: &Narrative,
) -> Result<DocumentRecord, StoryforgeError> {
    let total = config.illustration_count();
    let mut placeholders = Vec::new();
    let mut html = String::new();

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n",
        escape(&narrative.title),
        STYLE
    );

    for index in 0..total {
        let image = if artifacts.illustration_complete(job_id, index) {
            Some(artifacts.read_illustration_bytes(job_id, index)?)
        } else {
            warn!(job_id = %job_id, index, "illustration missing at assembly, using placeholder");
            placeholders.push(index);
            None
        };
        render_page(&mut html, index, image.as_deref(), config, narrative);
    }

    html.push_str("</body>\n</html>\n");

    let record = artifacts.write_document(job_id, html.as_bytes(), total, placeholders)?;
    info!(
        job_id = %job_id,
        bytes = record.byte_size,
        placeholders = record.placeholders.len(),
        "document assembled"
    );
    Ok(record)
}

const STYLE: &str = "\
body{margin:0;font-family:Georgia,serif}\
.page{page-break-after:always;min-height:100vh;display:flex;flex-direction:column;\
align-items:center;justify-content:center;padding:2em;box-sizing:border-box}\
.page img{max-width:100%;max-height:70vh}\
.page p{font-size:1.4em;max-width:32em;text-align:center}\
.cover h1{font-size:2.6em;text-align:center}\
.placeholder{border:1px dashed #999;padding:3em;color:#666;text-align:center;width:80%}";

fn render_page(
    html: &mut String,
    index: u32,
    image: Option<&[u8]>,
    config: &JobConfig,
    narrative: &Narrative,
) {
    match PageRole::of_index(index, config.page_count) {
        PageRole::FrontCover => {
            html.push_str("<section class=\"page cover\">\n");
            let _ = write!(html, "<h1>{}</h1>\n", escape(&narrative.title));
            push_image(html, image, "Front cover illustration");
            html.push_str("</section>\n");
        }
        PageRole::Story(page) => {
            html.push_str("<section class=\"page\">\n");
            // Reading order: the page text comes first, its illustration
            // follows.
            if let Some(text) = narrative.pages.get(page as usize - 1).map(|p| &p.text) {
                let _ = write!(html, "<p>{}</p>\n", escape(text));
            }
            push_image(html, image, &format!("Illustration for page {page}"));
            html.push_str("</section>\n");
        }
        PageRole::BackCover => {
            html.push_str("<section class=\"page cover\">\n");
            push_image(html, image, "Back cover illustration");
            html.push_str("<p>The End</p>\n");
            html.push_str("</section>\n");
        }
    }
}

fn push_image(html: &mut String, image: Option<&[u8]>, alt: &str) {
    match image {
        Some(bytes) => {
            let _ = write!(
                html,
                "<img src=\"data:image/png;base64,{}\" alt=\"{}\">\n",
                BASE64.encode(bytes),
                escape(alt)
            );
        }
        None => {
            let _ = write!(
                html,
                "<div class=\"placeholder\">{}</div>\n",
                escape(alt)
            );
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
