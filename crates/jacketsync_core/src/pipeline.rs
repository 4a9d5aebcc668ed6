use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::{StoreSettings, WikiSettings};
use crate::records::{ExportRow, LevelRow, read_level_rows, write_export_rows, write_level_rows};
use crate::runtime::{ResolvedPaths, SONGS_BY_LEVEL_CSV, normalize_for_display};
use crate::scrape::{parse_song_page_html, parse_songs_by_level_html, title_from_wiki_url};
use crate::store::{SongRecord, SongStore};
use crate::wiki::WikiApi;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub skip_scrape: bool,
    pub manual_song_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    Scraped,
    ExistingCsv,
}

impl RowSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scraped => "scraped",
            Self::ExistingCsv => "existing_csv",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub source: RowSource,
    pub source_rows: usize,
    pub gap_candidates: usize,
    pub gap_songs_added: usize,
    pub gap_rows_added: usize,
    pub dropped_above_max: usize,
    pub duplicates_merged: usize,
    pub exported: usize,
    pub upserted: usize,
    pub batches: usize,
    pub request_count: usize,
    /// False when the scrape produced nothing and the run stopped early.
    pub completed: bool,
}

impl SyncReport {
    fn empty(source: RowSource) -> Self {
        Self {
            source,
            source_rows: 0,
            gap_candidates: 0,
            gap_songs_added: 0,
            gap_rows_added: 0,
            dropped_above_max: 0,
            duplicates_merged: 0,
            exported: 0,
            upserted: 0,
            batches: 0,
            request_count: 0,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRows {
    pub records: Vec<SongRecord>,
    pub dropped_above_max: usize,
    pub duplicates_merged: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GapReport {
    pub candidates: usize,
    pub missing: usize,
    pub songs_added: usize,
    pub rows_added: usize,
}

/// Scrape the songs-by-level page, optionally saving it as CSV.
pub fn scrape_songs_by_level<W: WikiApi>(
    wiki: &mut W,
    page: &str,
    save_path: Option<&Path>,
) -> Result<Vec<LevelRow>> {
    info!(page, "fetching songs by level");
    let html = wiki.parse_page_html(page)?;
    let rows = parse_songs_by_level_html(&html)
        .with_context(|| format!("failed to parse {page}"))?;
    info!(rows = rows.len(), "parsed songs by level");
    if let Some(path) = save_path {
        write_level_rows(path, &rows)?;
    }
    Ok(rows)
}

/// Scrape (or reuse) the level table, fill gaps from the manual list,
/// normalize, export and upsert.
pub fn run_sync<W: WikiApi, S: SongStore>(
    wiki: &mut W,
    store: &mut S,
    paths: &ResolvedPaths,
    wiki_settings: &WikiSettings,
    store_settings: &StoreSettings,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let csv_path = &paths.songs_by_level_csv;
    let (mut rows, source) = if options.skip_scrape && csv_path.exists() {
        let rows = read_level_rows(csv_path)?;
        info!(rows = rows.len(), "using existing {SONGS_BY_LEVEL_CSV}");
        (rows, RowSource::ExistingCsv)
    } else {
        let rows = scrape_songs_by_level(
            wiki,
            &wiki_settings.songs_by_level_page,
            Some(csv_path),
        )?;
        if rows.is_empty() {
            error!("no rows from scrape; stopping");
            let mut report = SyncReport::empty(RowSource::Scraped);
            report.request_count = wiki.request_count();
            return Ok(report);
        }
        (rows, RowSource::Scraped)
    };

    let mut report = SyncReport::empty(source);
    report.source_rows = rows.len();

    info!("performing gap check against manual song list");
    let gaps = fill_gaps(wiki, &mut rows, &options.manual_song_urls);
    report.gap_candidates = gaps.candidates;
    report.gap_songs_added = gaps.songs_added;
    report.gap_rows_added = gaps.rows_added;

    let normalized = normalize_rows(&rows, store_settings.max_constant);
    report.dropped_above_max = normalized.dropped_above_max;
    report.duplicates_merged = normalized.duplicates_merged;

    let export: Vec<ExportRow> = normalized.records.iter().map(export_row).collect();
    report.exported = write_export_rows(&paths.export_csv, &export)?;
    info!(
        rows = report.exported,
        path = %normalize_for_display(&paths.export_csv),
        "wrote export"
    );

    let (upserted, batches) =
        upsert_in_batches(store, &normalized.records, store_settings.batch_size)?;
    report.upserted = upserted;
    report.batches = batches;
    report.request_count = wiki.request_count();
    report.completed = true;
    info!(rows = upserted, table = %store_settings.table, "upsert done");
    Ok(report)
}

/// Fetch manual-list songs that the level table is missing and append their charts.
///
/// A song page that fails to fetch or parse is logged and skipped.
pub fn fill_gaps<W: WikiApi>(
    wiki: &mut W,
    rows: &mut Vec<LevelRow>,
    manual_song_urls: &[String],
) -> GapReport {
    let known: HashSet<String> = rows
        .iter()
        .map(|row| row.song.trim().to_lowercase())
        .collect();
    let candidates: Vec<String> = manual_song_urls
        .iter()
        .filter_map(|url| title_from_wiki_url(url))
        .collect();

    let mut report = GapReport {
        candidates: candidates.len(),
        ..GapReport::default()
    };
    if candidates.is_empty() {
        info!("no manual candidates found");
        return report;
    }

    let missing: Vec<&String> = candidates
        .iter()
        .filter(|title| !known.contains(&title.trim().to_lowercase()))
        .collect();
    report.missing = missing.len();
    info!(missing = missing.len(), "checking songs missing from the level table");

    for title in missing {
        let entries = match wiki
            .parse_page_html(title)
            .and_then(|html| parse_song_page_html(&html, title))
        {
            Ok(entries) => entries,
            Err(fetch_error) => {
                warn!(title = %title, "could not fetch song page: {fetch_error:#}");
                continue;
            }
        };
        if entries.is_empty() {
            warn!(title = %title, "could not parse data for song");
            continue;
        }
        info!(title = %title, charts = entries.len(), "found missing song");
        report.songs_added += 1;
        report.rows_added += entries.len();
        rows.extend(entries.iter().map(|entry| entry.to_level_row()));
    }
    info!(songs = report.songs_added, "added confirmed missing songs");
    report
}

/// `""`, `"-"` and anything unparsable become `None`.
pub fn parse_constant(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-" {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|constant| constant.is_finite())
}

/// Trim fields, drop charts above `max_constant`, and dedupe on
/// (title, artist, difficulty). The latest row wins but keeps the slot of the first.
pub fn normalize_rows(rows: &[LevelRow], max_constant: f64) -> NormalizedRows {
    let mut normalized = NormalizedRows::default();
    let mut positions: HashMap<(String, String, String), usize> = HashMap::new();

    for row in rows {
        let constant = parse_constant(&row.chart_constant);
        if constant.is_some_and(|value| value > max_constant) {
            normalized.dropped_above_max += 1;
            continue;
        }
        let record = SongRecord {
            title: row.song.trim().to_string(),
            artist: row.artist.trim().to_string(),
            difficulty: row.difficulty.trim().to_string(),
            constant,
            level: row.level.trim().to_string(),
            version: row.version.trim().to_string(),
        };
        let key = (
            record.title.clone(),
            record.artist.clone(),
            record.difficulty.clone(),
        );
        match positions.get(&key) {
            Some(&index) => {
                normalized.records[index] = record;
                normalized.duplicates_merged += 1;
            }
            None => {
                positions.insert(key, normalized.records.len());
                normalized.records.push(record);
            }
        }
    }
    normalized
}

fn export_row(record: &SongRecord) -> ExportRow {
    ExportRow {
        song: record.title.clone(),
        artist: record.artist.clone(),
        difficulty: record.difficulty.clone(),
        chart_constant: record.constant,
        level: record.level.clone(),
        version: record.version.clone(),
    }
}

/// Returns `(rows upserted, batches sent)`.
pub fn upsert_in_batches<S: SongStore>(
    store: &mut S,
    records: &[SongRecord],
    batch_size: usize,
) -> Result<(usize, usize)> {
    let mut total = 0usize;
    let mut batches = 0usize;
    for batch in records.chunks(batch_size.max(1)) {
        let start = total + 1;
        store
            .upsert(batch)
            .with_context(|| format!("failed to upsert rows {start}-{}", total + batch.len()))?;
        total += batch.len();
        batches += 1;
        info!("upserted rows {start}-{total}");
    }
    Ok((total, batches))
}
