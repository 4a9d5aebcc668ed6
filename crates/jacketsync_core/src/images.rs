use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::matcher::JacketIndex;
use crate::records::{ImageColumnReport, SongPageEntry, update_image_column};
use crate::runtime::normalize_for_display;
use crate::scrape::{fallback_slug, image_url_to_filename, parse_song_page_html};
use crate::wiki::WikiApi;

/// Song pages fetched when no titles are given.
pub const DEFAULT_SONG_PAGES: &[&str] = &[
    "Xterfusion",
    "Fracture_Ray",
    "World_Ender",
    "Singularity",
    "Tempestissimo",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub pages: usize,
    pub downloaded: usize,
    pub skipped_pages: usize,
    pub existing: usize,
    pub failed: usize,
    pub request_count: usize,
}

/// Fetch one song page and parse its charts.
pub fn fetch_song<W: WikiApi>(wiki: &mut W, page_title: &str) -> Result<Vec<SongPageEntry>> {
    let html = wiki.parse_page_html(page_title)?;
    parse_song_page_html(&html, &page_title.replace('_', " "))
        .with_context(|| format!("failed to parse song page {page_title}"))
}

/// Fetch several song pages; entries get sequential ids starting at 1.
pub fn fetch_song_pages<W: WikiApi>(wiki: &mut W, titles: &[String]) -> Vec<SongPageEntry> {
    let mut entries: Vec<SongPageEntry> = Vec::new();
    for title in titles {
        info!(title = %title, "fetching song page");
        match fetch_song(wiki, title) {
            Ok(page_entries) => {
                for mut entry in page_entries {
                    entry.id = Some(entries.len() + 1);
                    entries.push(entry);
                }
            }
            Err(fetch_error) => warn!(title = %title, "song page failed: {fetch_error:#}"),
        }
    }
    entries
}

/// Download every unique jacket referenced from the songs category into `dir`.
///
/// Files that already exist are left alone.
pub fn download_wiki_images<W: WikiApi>(
    wiki: &mut W,
    category: &str,
    dir: &Path,
) -> Result<DownloadReport> {
    info!(category, "fetching song list");
    let titles = wiki.category_members(category)?;
    info!(pages = titles.len(), "found song pages");
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", normalize_for_display(dir)))?;

    let mut report = DownloadReport {
        pages: titles.len(),
        ..DownloadReport::default()
    };
    let mut seen_urls: HashSet<String> = HashSet::new();

    for (position, page_title) in titles.iter().enumerate() {
        info!("[{}/{}] {page_title}", position + 1, titles.len());
        let entries = match fetch_song(wiki, page_title) {
            Ok(entries) => entries,
            Err(fetch_error) => {
                warn!(page = %page_title, "skip: {fetch_error:#}");
                report.skipped_pages += 1;
                continue;
            }
        };

        for entry in entries {
            let url = entry.image_url.trim();
            if url.is_empty() || !seen_urls.insert(url.to_string()) {
                continue;
            }
            let title = if entry.title.is_empty() {
                page_title.as_str()
            } else {
                entry.title.as_str()
            };
            let file_name = image_url_to_filename(url, &fallback_slug(title));
            let target = dir.join(&file_name);
            if target.exists() {
                report.existing += 1;
                continue;
            }
            match wiki
                .download(url)
                .and_then(|bytes| write_image(&target, &bytes))
            {
                Ok(()) => {
                    report.downloaded += 1;
                    info!(file = %file_name, "saved jacket");
                }
                Err(download_error) => {
                    report.failed += 1;
                    warn!(url, "download failed: {download_error:#}");
                }
            }
        }
    }

    report.request_count = wiki.request_count();
    Ok(report)
}

fn write_image(target: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(target, bytes)
        .with_context(|| format!("failed to write {}", normalize_for_display(target)))
}

/// Fill `image_column` of a CSV with jacket paths relative to `images_dir`'s parent.
pub fn update_csv_image_urls(
    csv_path: &Path,
    images_dir: &Path,
    output_path: &Path,
    title_column: &str,
    image_column: &str,
) -> Result<ImageColumnReport> {
    let index = JacketIndex::build(images_dir);
    info!(keys = index.len(), "built jacket index");
    update_image_column(csv_path, output_path, title_column, image_column, &index)
}
