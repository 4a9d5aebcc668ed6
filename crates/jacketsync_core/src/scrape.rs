use anyhow::{Result, anyhow};
use scraper::{ElementRef, Html, Selector};

use crate::normalize::collapse_whitespace;
use crate::records::{LevelRow, SongPageEntry};

const LEVEL_TABLE_SELECTORS: &[&str] = &[
    "table.wikitable.sortable",
    "table.article-table.sortable",
    "table.wikitable",
    "table.sortable",
];

const TITLE_SELECTORS: &[&str] = &[
    ".mw-page-title-main",
    "h1.page-header__title",
    "h1#firstHeading",
    ".song-template-title",
    "h1",
];

/// Difficulty name paired with the class fragment used on the song infobox.
pub const DIFFICULTIES: &[(&str, &str)] = &[
    ("Past", "pst"),
    ("Present", "prs"),
    ("Future", "ftr"),
    ("Eternal", "etr"),
    ("Beyond", "byd"),
];

const BEYOND: &str = "Beyond";
const LEVEL_COLUMNS: usize = 6;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|error| anyhow!("invalid selector `{css}`: {error}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// Parse the Songs_by_Level table (Song, Artist, Difficulty, Chart Constant, Level, Version).
pub fn parse_songs_by_level_html(html: &str) -> Result<Vec<LevelRow>> {
    let document = Html::parse_document(html);
    let row_selector = selector("tbody tr")?;
    let cell_selector = selector("td")?;
    let link_selector = selector("a")?;

    let mut tables: Vec<ElementRef<'_>> = Vec::new();
    for css in LEVEL_TABLE_SELECTORS {
        tables = document.select(&selector(css)?).collect();
        if !tables.is_empty() {
            break;
        }
    }
    if tables.is_empty() {
        let any_table = selector("table")?;
        tables = document
            .select(&any_table)
            .find(|table| {
                table
                    .select(&row_selector)
                    .any(|row| row.select(&cell_selector).count() >= LEVEL_COLUMNS)
            })
            .into_iter()
            .collect();
    }

    let mut rows = Vec::new();
    for table in tables {
        for row in table.select(&row_selector) {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
            if cells.len() < LEVEL_COLUMNS {
                continue;
            }
            let song = match cells[0].select(&link_selector).next() {
                Some(link) => element_text(link),
                None => element_text(cells[0]),
            };
            if song.is_empty() {
                continue;
            }
            rows.push(LevelRow {
                song,
                artist: element_text(cells[1]),
                difficulty: element_text(cells[2]),
                chart_constant: element_text(cells[3]),
                level: element_text(cells[4]),
                version: element_text(cells[5]),
            });
        }
    }
    Ok(rows)
}

/// Parse one song page: title, artist, jacket(s) and per-difficulty level/constant.
///
/// The second infobox image, when present, is the Beyond jacket.
pub fn parse_song_page_html(html: &str, fallback_title: &str) -> Result<Vec<SongPageEntry>> {
    let document = Html::parse_document(html);

    let mut title = String::new();
    for css in TITLE_SELECTORS {
        if let Some(element) = document.select(&selector(css)?).next() {
            title = element_text(element);
            if !title.is_empty() {
                break;
            }
        }
    }
    if title.is_empty() {
        title = fallback_title.replace('_', " ");
    }

    let jackets: Vec<String> = document
        .select(&selector(".pi-image img")?)
        .take(2)
        .map(|img| img.value().attr("src").unwrap_or_default().to_string())
        .collect();
    let jacket_url = jackets.first().cloned().unwrap_or_default();
    let beyond_jacket_url = jackets.get(1).cloned().unwrap_or_default();

    let artist = document
        .select(&selector(".song-template-artist")?)
        .next()
        .map(|element| strip_parenthesized(&element.text().collect::<String>()).trim().to_string())
        .unwrap_or_default();

    let chart_tables: Vec<ElementRef<'_>> = document
        .select(&selector("table.pi-horizontal-group")?)
        .collect();
    let mut entries = Vec::new();
    let Some(default_table) = chart_tables.first() else {
        return Ok(entries);
    };

    let cell_selector = selector("tbody td")?;
    let entry = |difficulty: &str, level: String, constant: String| {
        let image_url = if difficulty == BEYOND && !beyond_jacket_url.is_empty() {
            beyond_jacket_url.clone()
        } else {
            jacket_url.clone()
        };
        SongPageEntry {
            image_url,
            title: title.clone(),
            artist: artist.clone(),
            difficulty: difficulty.to_string(),
            constant,
            level,
            version: String::new(),
            id: None,
        }
    };

    let cells: Vec<ElementRef<'_>> = default_table.select(&cell_selector).collect();
    if cells.len() >= 3 {
        let level_cell = cells[0];
        let constant_cell = cells[2];
        for (difficulty, class_key) in DIFFICULTIES {
            let span = selector(&format!(r#"span[class*="{class_key}"]"#))?;
            let (Some(level_span), Some(constant_span)) = (
                level_cell.select(&span).next(),
                constant_cell.select(&span).next(),
            ) else {
                continue;
            };
            let level = element_text(level_span);
            let constant = element_text(constant_span);
            if level.is_empty() || constant.is_empty() || constant == "-" {
                continue;
            }
            entries.push(entry(*difficulty, level, constant));
        }
    }

    if let Some(beyond_table) = chart_tables.get(1) {
        let cells: Vec<ElementRef<'_>> = beyond_table.select(&cell_selector).collect();
        if cells.len() >= 3 {
            let level = element_text(cells[0]);
            let constant = element_text(cells[2]);
            let has_beyond = entries.iter().any(|existing| existing.difficulty == BEYOND);
            if !level.is_empty() && !constant.is_empty() && constant != "-" && !has_beyond {
                entries.push(entry(BEYOND, level, constant));
            }
        }
    }

    Ok(entries)
}

/// Remove `(...)` groups such as `(Arranged by X)` from an artist credit.
fn strip_parenthesized(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        match after.find(')') {
            Some(close) if close > 0 => {
                output.push_str(&rest[..open]);
                rest = &after[close + 1..];
            }
            _ => {
                output.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}

fn is_filename_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '.' | '-')
}

/// Local filename for a jacket URL.
///
/// Percent escapes turn into `_XX` groups here, which is where hex-encoded
/// stems in the images directory come from.
pub fn image_url_to_filename(url: &str, fallback: &str) -> String {
    if url.is_empty() {
        return format!("{fallback}.jpg");
    }
    let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
    for part in path.rsplit('/') {
        if part.contains('.') && part != "." && part != ".." {
            let safe: String = part
                .chars()
                .map(|ch| if is_filename_char(ch) { ch } else { '_' })
                .collect();
            if !safe.is_empty() {
                return safe;
            }
        }
    }
    let lower = url.to_lowercase();
    let extension = if lower.contains(".png") {
        "png"
    } else if lower.contains(".webp") {
        "webp"
    } else {
        "jpg"
    };
    format!("{fallback}.{extension}")
}

/// Filename-safe fallback derived from a song title, at most 50 characters.
pub fn fallback_slug(title: &str) -> String {
    title
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .take(50)
        .collect()
}

/// Song title from a `/wiki/Page_Title` URL (percent-decoded, underscores as spaces).
pub fn title_from_wiki_url(url: &str) -> Option<String> {
    let (_, raw) = url.rsplit_once("/wiki/")?;
    let raw = raw.split(['?', '#']).next().unwrap_or(raw);
    if raw.trim().is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw)
        .map(|value| value.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    Some(decoded.replace('_', " "))
}
