use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::matcher::JacketIndex;

/// One row of the Songs_by_Level table; also the export schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelRow {
    #[serde(default)]
    pub song: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub chart_constant: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub version: String,
}

/// One chart parsed from an individual song page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongPageEntry {
    #[serde(rename = "imageUrl", default)]
    pub image_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(default)]
    pub constant: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub id: Option<usize>,
}

impl SongPageEntry {
    pub fn to_level_row(&self) -> LevelRow {
        LevelRow {
            song: self.title.clone(),
            artist: self.artist.clone(),
            difficulty: self.difficulty.clone(),
            chart_constant: self.constant.clone(),
            level: self.level.clone(),
            version: self.version.clone(),
        }
    }
}

/// Export row with the constant already parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub song: String,
    pub artist: String,
    pub difficulty: String,
    pub chart_constant: Option<f64>,
    pub level: String,
    pub version: String,
}

pub fn read_level_rows(path: &Path) -> Result<Vec<LevelRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: LevelRow =
            record.with_context(|| format!("failed to parse row in {}", path.display()))?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn write_level_rows(path: &Path, rows: &[LevelRow]) -> Result<usize> {
    write_serialized(path, rows)
}

pub fn write_song_entries(path: &Path, entries: &[SongPageEntry]) -> Result<usize> {
    write_serialized(path, entries)
}

pub fn write_export_rows(path: &Path, rows: &[ExportRow]) -> Result<usize> {
    let mut writer = open_writer(path)?;
    if rows.is_empty() {
        writer
            .write_record([
                "song",
                "artist",
                "difficulty",
                "chart_constant",
                "level",
                "version",
            ])
            .with_context(|| format!("failed to write header to {}", path.display()))?;
    }
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(rows.len())
}

/// Writes nothing for an empty slice; the header comes from the first row.
fn write_serialized<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize> {
    if rows.is_empty() {
        info!(path = %path.display(), "no data to save");
        return Ok(0);
    }
    let mut writer = open_writer(path)?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "saved rows");
    Ok(rows.len())
}

fn open_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    }
    csv::Writer::from_path(path).with_context(|| format!("failed to create {}", path.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageColumnReport {
    pub updated: usize,
    pub total: usize,
}

/// Fill `image_column` with the resolved jacket path for each row whose
/// `title_column` matches. Unmatched rows keep their previous value.
///
/// The column is appended when absent. An input without data rows is left untouched.
pub fn update_image_column(
    csv_path: &Path,
    output_path: &Path,
    title_column: &str,
    image_column: &str,
    index: &JacketIndex,
) -> Result<ImageColumnReport> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", csv_path.display()))?
        .clone();
    let mut rows: Vec<StringRecord> = Vec::new();
    for record in reader.records() {
        rows.push(record.with_context(|| format!("failed to parse row in {}", csv_path.display()))?);
    }
    // output may be the input file
    drop(reader);
    if rows.is_empty() {
        return Ok(ImageColumnReport {
            updated: 0,
            total: 0,
        });
    }

    let Some(title_at) = headers.iter().position(|name| name == title_column) else {
        bail!(
            "column `{title_column}` not found in {} (have: {})",
            csv_path.display(),
            headers.iter().collect::<Vec<_>>().join(", ")
        );
    };
    let image_at = match headers.iter().position(|name| name == image_column) {
        Some(position) => position,
        None => {
            headers.push_field(image_column);
            headers.len() - 1
        }
    };

    let mut updated = 0usize;
    let mut output_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut fields: Vec<String> = row.iter().map(ToString::to_string).collect();
        fields.resize(headers.len(), String::new());
        let title = fields[title_at].trim().to_string();
        if let Some(relative) = index.resolve_relative(&title) {
            fields[image_at] = relative;
            updated += 1;
        }
        output_rows.push(fields);
    }

    let mut writer = open_writer(output_path)?;
    writer
        .write_record(&headers)
        .with_context(|| format!("failed to write header to {}", output_path.display()))?;
    for fields in &output_rows {
        writer
            .write_record(fields)
            .with_context(|| format!("failed to write row to {}", output_path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", output_path.display()))?;

    Ok(ImageColumnReport {
        updated,
        total: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        ExportRow, LevelRow, SongPageEntry, read_level_rows, update_image_column,
        write_export_rows, write_level_rows, write_song_entries,
    };
    use crate::matcher::JacketIndex;

    fn level(song: &str, constant: &str) -> LevelRow {
        LevelRow {
            song: song.to_string(),
            artist: "Artist".to_string(),
            difficulty: "Future".to_string(),
            chart_constant: constant.to_string(),
            level: "10".to_string(),
            version: "1.0".to_string(),
        }
    }

    #[test]
    fn level_rows_survive_a_file_round() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("songs_by_level.csv");
        let rows = vec![level("Fracture Ray", "11.2"), level("Grievous Lady, Part 2", "-")];

        assert_eq!(write_level_rows(&path, &rows).expect("write"), 2);
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.starts_with("song,artist,difficulty,chart_constant,level,version"));
        assert!(content.contains("\"Grievous Lady, Part 2\""));
        assert_eq!(read_level_rows(&path).expect("read rows"), rows);
    }

    #[test]
    fn empty_dataset_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("empty.csv");
        assert_eq!(write_level_rows(&path, &[]).expect("write"), 0);
        assert!(!path.exists());
    }

    #[test]
    fn song_entries_use_image_url_header() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("individual_songs.csv");
        let entries = vec![SongPageEntry {
            image_url: "https://static.wikia.nocookie.net/a.jpg".to_string(),
            title: "Xterfusion".to_string(),
            difficulty: "Past".to_string(),
            id: Some(1),
            ..SongPageEntry::default()
        }];
        write_song_entries(&path, &entries).expect("write");
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.starts_with("imageUrl,title,artist,difficulty,constant,level,version,id"));
        assert!(content.contains(",1\n"));
    }

    #[test]
    fn export_rows_format_constants() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("songs_export.csv");
        let rows = vec![
            ExportRow {
                song: "A".to_string(),
                artist: "B".to_string(),
                difficulty: "Future".to_string(),
                chart_constant: Some(9.5),
                level: "9+".to_string(),
                version: "1.0".to_string(),
            },
            ExportRow {
                song: "C".to_string(),
                artist: "D".to_string(),
                difficulty: "Past".to_string(),
                chart_constant: None,
                level: "3".to_string(),
                version: "1.0".to_string(),
            },
        ];
        write_export_rows(&path, &rows).expect("write");
        let content = fs::read_to_string(&path).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "song,artist,difficulty,chart_constant,level,version");
        assert_eq!(lines[1], "A,B,Future,9.5,9+,1.0");
        assert_eq!(lines[2], "C,D,Past,,3,1.0");
    }

    #[test]
    fn update_image_column_fills_matches_and_appends_column() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("wiki_images");
        fs::create_dir_all(&images).expect("images dir");
        fs::write(images.join("Fracture_Ray.jpg"), b"x").expect("write image");
        fs::write(images.join("INCARNATOR_00.png"), b"x").expect("write image");

        let input = temp.path().join("songs.csv");
        fs::write(
            &input,
            "title,artist\nFracture Ray,Frums\nINCARNATOR₀₀,Nitro\nUnknown Song,Nobody\n",
        )
        .expect("write csv");
        let output = temp.path().join("out.csv");

        let index = JacketIndex::build(&images);
        let report =
            update_image_column(&input, &output, "title", "imageUrl", &index).expect("update");
        assert_eq!(report.updated, 2);
        assert_eq!(report.total, 3);

        let content = fs::read_to_string(&output).expect("read");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "title,artist,imageUrl");
        assert_eq!(lines[1], "Fracture Ray,Frums,wiki_images/Fracture_Ray.jpg");
        assert_eq!(lines[2], "INCARNATOR₀₀,Nitro,wiki_images/INCARNATOR_00.png");
        assert_eq!(lines[3], "Unknown Song,Nobody,");
    }

    #[test]
    fn update_image_column_keeps_existing_values_for_misses() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("songs.csv");
        fs::write(&input, "imageUrl,title\nkeep.jpg,Nothing Matches\n").expect("write csv");

        let index = JacketIndex::build(&temp.path().join("missing"));
        let report =
            update_image_column(&input, &input, "title", "imageUrl", &index).expect("update");
        assert_eq!(report.updated, 0);
        assert_eq!(report.total, 1);
        let content = fs::read_to_string(&input).expect("read");
        assert!(content.contains("keep.jpg,Nothing Matches"));
    }

    #[test]
    fn update_image_column_requires_title_column() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("songs.csv");
        fs::write(&input, "song\nAlpha\n").expect("write csv");
        let index = JacketIndex::from_paths(Path::new("wiki_images"), Vec::new());
        let error = update_image_column(&input, &input, "title", "imageUrl", &index)
            .expect_err("must fail");
        assert!(error.to_string().contains("column `title` not found"));
    }

    #[test]
    fn update_image_column_on_header_only_csv_is_a_no_op() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("songs.csv");
        let output = temp.path().join("out.csv");
        fs::write(&input, "title,imageUrl\n").expect("write csv");
        let index = JacketIndex::from_paths(Path::new("wiki_images"), Vec::new());
        let report =
            update_image_column(&input, &output, "title", "imageUrl", &index).expect("update");
        assert_eq!((report.updated, report.total), (0, 0));
        assert!(!output.exists());
    }
}
