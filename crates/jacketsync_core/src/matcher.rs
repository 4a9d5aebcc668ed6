use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::decode::{StemDecoding, decode_stem};
use crate::normalize::{collapse_whitespace, compact_key, normalize_digits, slug};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// One jacket image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JacketFile {
    pub path: PathBuf,
    pub stem: String,
    pub extension: String,
}

impl JacketFile {
    /// Returns `None` for paths with an extension outside [`IMAGE_EXTENSIONS`].
    /// A stem that is not valid UTF-8 is kept in lossy form.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        Some(Self {
            path: path.to_path_buf(),
            stem,
            extension,
        })
    }
}

/// Which step of the lookup cascade produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    Slug,
    CollapsedWhitespace,
    Prefix,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Slug => "slug",
            Self::CollapsedWhitespace => "collapsed",
            Self::Prefix => "prefix",
        }
    }
}

/// Title-key -> jacket lookup built once from an images directory.
///
/// Keys are registered first-writer-wins and iterate in registration order.
/// The index exposes no mutation once built.
#[derive(Debug, Clone, Default)]
pub struct JacketIndex {
    images_dir: PathBuf,
    files: Vec<JacketFile>,
    keys: Vec<(String, usize)>,
    positions: HashMap<String, usize>,
}

impl JacketIndex {
    /// Scan `images_dir` (non-recursively) in file-name order.
    ///
    /// A missing or unreadable directory produces an empty index.
    pub fn build(images_dir: &Path) -> Self {
        if !images_dir.is_dir() {
            warn!(
                images_dir = %images_dir.display(),
                "images directory not found; every title will resolve to no match"
            );
            return Self::empty(images_dir);
        }

        let mut paths = Vec::new();
        let walker = WalkDir::new(images_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(images_dir = %images_dir.display(), %error, "failed to read image entry");
                    continue;
                }
            };
            // follows symlinks so a linked directory is not taken for an image
            if entry.path().is_dir() {
                continue;
            }
            paths.push(entry.into_path());
        }

        let index = Self::from_paths(images_dir, paths);
        debug!(
            images_dir = %images_dir.display(),
            files = index.files.len(),
            keys = index.keys.len(),
            "built jacket index"
        );
        index
    }

    /// Register `paths` in the order given. Paths with disallowed extensions are skipped.
    pub fn from_paths<I>(images_dir: &Path, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut index = Self::empty(images_dir);
        for path in paths {
            if let Some(file) = JacketFile::from_path(&path) {
                index.register_file(file);
            }
        }
        index
    }

    fn empty(images_dir: &Path) -> Self {
        Self {
            images_dir: images_dir.to_path_buf(),
            ..Self::default()
        }
    }

    fn register_file(&mut self, file: JacketFile) {
        let position = self.files.len();
        let keys = match decode_stem(&file.stem) {
            StemDecoding::Decoded(title) if !title.trim().is_empty() => vec![
                title.trim().to_lowercase(),
                collapse_whitespace(&title).to_lowercase(),
            ],
            StemDecoding::Decoded(_) | StemDecoding::NotEncoded => {
                let title = file.stem.replace('_', " ");
                let title = title.trim();
                vec![
                    slug(title),
                    title.to_lowercase(),
                    compact_key(title),
                    file.stem.to_lowercase(),
                ]
            }
        };
        self.files.push(file);
        for key in keys {
            self.insert_key(key, position);
        }
    }

    fn insert_key(&mut self, key: String, position: usize) {
        if key.is_empty() || self.positions.contains_key(&key) {
            return;
        }
        self.positions.insert(key.clone(), position);
        self.keys.push((key, position));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn files(&self) -> &[JacketFile] {
        &self.files
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(key, _)| key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&JacketFile> {
        self.positions
            .get(key)
            .and_then(|position| self.files.get(*position))
    }

    pub fn resolve(&self, title: &str) -> Option<&JacketFile> {
        self.resolve_with_strategy(title).map(|(file, _)| file)
    }

    /// Resolve `title` through exact, slug, collapsed-whitespace and prefix lookups,
    /// in that order. The prefix pass returns the first key in registration order
    /// that is a prefix of the title slug or has the slug as a prefix.
    pub fn resolve_with_strategy(&self, title: &str) -> Option<(&JacketFile, MatchStrategy)> {
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return None;
        }

        let exact = normalize_digits(trimmed).to_lowercase();
        if let Some(file) = self.get(&exact) {
            return Some((file, MatchStrategy::Exact));
        }

        let title_slug = slug(trimmed);
        if let Some(file) = self.get(&title_slug) {
            return Some((file, MatchStrategy::Slug));
        }

        let collapsed = normalize_digits(&collapse_whitespace(trimmed).to_lowercase());
        if let Some(file) = self.get(&collapsed) {
            return Some((file, MatchStrategy::CollapsedWhitespace));
        }

        if title_slug.is_empty() {
            return None;
        }
        self.keys
            .iter()
            .find(|(key, _)| key.starts_with(&title_slug) || title_slug.starts_with(key.as_str()))
            .and_then(|(_, position)| self.files.get(*position))
            .map(|file| (file, MatchStrategy::Prefix))
    }

    /// Matched path relative to the parent of the images directory, with `/` separators
    /// (e.g. `wiki_images/Fracture_Ray.jpg`).
    pub fn resolve_relative(&self, title: &str) -> Option<String> {
        self.resolve(title).map(|file| self.relative_path(file))
    }

    pub fn relative_path(&self, file: &JacketFile) -> String {
        let base = self.images_dir.parent().unwrap_or_else(|| Path::new(""));
        let relative = file.path.strip_prefix(base).unwrap_or(&file.path);
        relative.to_string_lossy().replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use super::{JacketFile, JacketIndex, MatchStrategy};

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"img").expect("write image");
    }

    fn index_with(names: &[&str]) -> JacketIndex {
        let dir = Path::new("project/wiki_images");
        JacketIndex::from_paths(dir, names.iter().map(|name| dir.join(name)))
    }

    fn resolved_name(index: &JacketIndex, title: &str) -> Option<String> {
        index.resolve(title).map(|file| {
            file.path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string()
        })
    }

    #[test]
    fn jacket_file_requires_allowed_extension() {
        assert!(JacketFile::from_path(Path::new("a/Alpha.JPG")).is_some());
        assert!(JacketFile::from_path(Path::new("a/Alpha.webp")).is_some());
        assert!(JacketFile::from_path(Path::new("a/Alpha.txt")).is_none());
        assert!(JacketFile::from_path(Path::new("a/Alpha")).is_none());

        let file = JacketFile::from_path(Path::new("a/Fracture_Ray.PNG")).expect("jacket");
        assert_eq!(file.stem, "Fracture_Ray");
        assert_eq!(file.extension, "png");
    }

    #[test]
    fn plain_stem_registers_four_forms() {
        let index = index_with(&["INCARNATOR_00.jpg"]);
        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(keys, vec!["incarnator_00", "incarnator 00", "incarnator00"]);
        // raw stem lower-cased equals the slug here, so it is not registered twice
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn raw_stem_key_keeps_punctuation() {
        let index = index_with(&["Ignotus_Afterburn_-Ver.B-.png"]);
        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(
            keys,
            vec![
                "ignotus_afterburn_ver_b",
                "ignotus afterburn -ver.b-",
                "ignotusafterburn-ver.b-",
                "ignotus_afterburn_-ver.b-",
            ]
        );
    }

    #[test]
    fn encoded_stem_registers_decoded_title() {
        let index = index_with(&["_CE_9F_CE_94_CE_A5_CE_A3_CE_A3_CE_95_CE_99_CE_91.jpg"]);
        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(keys, vec!["οδυσσεια"]);
        assert_eq!(
            resolved_name(&index, "ΟΔΥΣΣΕΙΑ").as_deref(),
            Some("_CE_9F_CE_94_CE_A5_CE_A3_CE_A3_CE_95_CE_99_CE_91.jpg")
        );
    }

    #[test]
    fn encoded_stem_with_inner_whitespace_registers_collapsed_form() {
        // "A  B" with two spaces
        let index = index_with(&["_41_20_20_42.png"]);
        let keys: Vec<&str> = index.keys().collect();
        assert_eq!(keys, vec!["a  b", "a b"]);
        assert_eq!(resolved_name(&index, "a b").as_deref(), Some("_41_20_20_42.png"));
    }

    #[test]
    fn blank_decoded_title_falls_back_to_plain_stem() {
        let index = index_with(&["_20.png"]);
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["20", "_20"]);
    }

    #[test]
    fn subscript_digits_resolve_to_ascii_stem() {
        let index = index_with(&["INCARNATOR_00.jpg"]);
        assert_eq!(
            resolved_name(&index, "INCARNATOR₀₀").as_deref(),
            Some("INCARNATOR_00.jpg")
        );
        assert_eq!(
            resolved_name(&index, "INCARNATOR00").as_deref(),
            Some("INCARNATOR_00.jpg")
        );
    }

    #[test]
    fn exact_match_beats_prefix_match() {
        let index = index_with(&["Fracture.jpg", "Fracture_Ray.jpg"]);
        let (file, strategy) = index
            .resolve_with_strategy("Fracture Ray")
            .expect("match");
        assert!(file.path.ends_with("Fracture_Ray.jpg"));
        assert_eq!(strategy, MatchStrategy::Exact);
    }

    #[test]
    fn slug_match_handles_punctuation() {
        let index = index_with(&["My_life_is_mine_alone.jpg"]);
        let (file, strategy) = index
            .resolve_with_strategy("My life is mine alone!")
            .expect("match");
        assert_eq!(file.stem, "My_life_is_mine_alone");
        assert_eq!(strategy, MatchStrategy::Slug);
    }

    #[test]
    fn collapsed_whitespace_match_for_decoded_titles() {
        let index = index_with(&["_41_20_42.png"]);
        let (_, strategy) = index.resolve_with_strategy("A \t B").expect("match");
        assert_eq!(strategy, MatchStrategy::CollapsedWhitespace);
    }

    #[test]
    fn prefix_fallback_only_when_nothing_else_matches() {
        let index = index_with(&["Fracture_Ray.jpg"]);
        let (file, strategy) = index.resolve_with_strategy("Fracture").expect("match");
        assert_eq!(file.stem, "Fracture_Ray");
        assert_eq!(strategy, MatchStrategy::Prefix);

        let (_, strategy) = index
            .resolve_with_strategy("Fracture Ray (Remix)")
            .expect("match");
        assert_eq!(strategy, MatchStrategy::Prefix);

        assert!(index.resolve("Tempestissimo").is_none());
    }

    #[test]
    fn prefix_fallback_takes_first_registered_key() {
        let index = index_with(&["Alpha_Two.jpg", "Alpha_One.jpg"]);
        assert_eq!(resolved_name(&index, "Alpha").as_deref(), Some("Alpha_Two.jpg"));
    }

    #[test]
    fn first_writer_wins_for_colliding_keys() {
        let index = index_with(&["alpha beta.jpg", "Alpha_Beta.png"]);
        assert_eq!(resolved_name(&index, "Alpha Beta").as_deref(), Some("alpha beta.jpg"));
        assert_eq!(index.files().len(), 2);
        assert_eq!(
            index.get("alpha_beta").map(|file| file.extension.as_str()),
            Some("jpg")
        );
    }

    #[test]
    fn blank_titles_never_match() {
        let index = index_with(&["Alpha.jpg"]);
        assert!(index.resolve("").is_none());
        assert!(index.resolve("   \t").is_none());
        // slug of pure punctuation is empty, so the prefix pass is skipped
        assert!(index.resolve("~ +").is_none());
    }

    #[test]
    fn missing_directory_builds_empty_index() {
        let temp = tempdir().expect("tempdir");
        let index = JacketIndex::build(&temp.path().join("wiki_images"));
        assert!(index.is_empty());
        assert!(index.resolve("Fracture Ray").is_none());
        assert!(index.resolve_relative("Fracture Ray").is_none());
    }

    #[test]
    fn build_scans_flat_directory_in_name_order() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("wiki_images");
        fs::create_dir_all(images.join("nested")).expect("create images");
        touch(&images, "Fracture_Ray.jpg");
        touch(&images, "Alpha_Beta.png");
        touch(&images, "alpha beta.jpg");
        touch(&images, "notes.txt");
        touch(&images.join("nested"), "Nested.png");

        let index = JacketIndex::build(&images);
        let stems: Vec<&str> = index.files().iter().map(|file| file.stem.as_str()).collect();
        assert_eq!(stems, vec!["Alpha_Beta", "Fracture_Ray", "alpha beta"]);
        assert_eq!(resolved_name(&index, "alpha beta").as_deref(), Some("Alpha_Beta.png"));
        assert!(index.resolve("Nested").is_none());
        assert!(index.resolve("notes").is_none());
    }

    #[test]
    fn resolve_relative_is_rooted_at_project() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("wiki_images");
        fs::create_dir_all(&images).expect("create images");
        touch(&images, "Fracture_Ray.jpg");

        let index = JacketIndex::build(&images);
        assert_eq!(
            index.resolve_relative("Fracture Ray").as_deref(),
            Some("wiki_images/Fracture_Ray.jpg")
        );
    }

    #[test]
    fn resolve_relative_with_relative_images_dir() {
        let dir = PathBuf::from("wiki_images");
        let index = JacketIndex::from_paths(&dir, vec![dir.join("Xterfusion.jpg")]);
        assert_eq!(
            index.resolve_relative("Xterfusion").as_deref(),
            Some("wiki_images/Xterfusion.jpg")
        );
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_stem_still_registers_keys() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("wiki_images");
        fs::create_dir_all(&images).expect("create images");
        touch(&images, "Alpha.jpg");
        let name = OsStr::from_bytes(b"Caf\xe9_Song.jpg");
        fs::write(images.join(name), b"img").expect("write latin-1 name");

        let index = JacketIndex::build(&images);
        assert_eq!(index.files().len(), 2);
        assert!(index.keys().any(|key| key == "caf_song"));
        let file = index.resolve("Caf Song").expect("lossy stem resolves");
        assert_eq!(file.path, images.join(name));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directory_is_not_an_image() {
        let temp = tempdir().expect("tempdir");
        let images = temp.path().join("wiki_images");
        let elsewhere = temp.path().join("elsewhere");
        fs::create_dir_all(&images).expect("create images");
        fs::create_dir_all(&elsewhere).expect("create target");
        std::os::unix::fs::symlink(&elsewhere, images.join("Linked.jpg")).expect("symlink");
        touch(&images, "Alpha.jpg");

        let index = JacketIndex::build(&images);
        assert_eq!(index.files().len(), 1);
        assert!(index.resolve("Linked").is_none());
    }
}
