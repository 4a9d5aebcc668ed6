use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".jacketsync";
pub const IMAGES_DIR_NAME: &str = "wiki_images";
pub const SONGS_BY_LEVEL_CSV: &str = "songs_by_level.csv";
pub const EXPORT_CSV: &str = "songs_export.csv";
pub const INDIVIDUAL_SONGS_CSV: &str = "individual_songs.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub images_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub images_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub songs_by_level_csv: PathBuf,
    pub export_csv: PathBuf,
    pub individual_songs_csv: PathBuf,
    pub root_source: ValueSource,
    pub images_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Default layout under `project_root`, every value marked as coming from a flag.
    pub fn under_root(project_root: &Path) -> Self {
        let state_dir = project_root.join(STATE_DIR_NAME);
        Self {
            images_dir: project_root.join(IMAGES_DIR_NAME),
            config_path: state_dir.join("config.toml"),
            songs_by_level_csv: project_root.join(SONGS_BY_LEVEL_CSV),
            export_csv: project_root.join(EXPORT_CSV),
            individual_songs_csv: project_root.join(INDIVIDUAL_SONGS_CSV),
            state_dir,
            project_root: project_root.to_path_buf(),
            root_source: ValueSource::Flag,
            images_source: ValueSource::Default,
            config_source: ValueSource::Default,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nimages_dir={} ({})\nstate_dir={}\nconfig_path={} ({})\nsongs_by_level_csv={}\nexport_csv={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.images_dir),
            self.images_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.songs_by_level_csv),
            normalize_for_display(&self.export_csv),
        )
    }
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);
    let mut paths = ResolvedPaths::under_root(&project_root);
    paths.root_source = root_source;

    if let Some(path) = overrides.images_dir.as_deref() {
        paths.images_dir = absolutize(path, &context.cwd);
        paths.images_source = ValueSource::Flag;
    } else if let Some(value) = non_empty(lookup_env("JACKETSYNC_IMAGES_DIR")) {
        paths.images_dir = absolutize(Path::new(&value), &project_root);
        paths.images_source = ValueSource::Env;
    }

    if let Some(path) = overrides.config.as_deref() {
        paths.config_path = absolutize(path, &context.cwd);
        paths.config_source = ValueSource::Flag;
    } else if let Some(value) = non_empty(lookup_env("JACKETSYNC_CONFIG")) {
        paths.config_path = absolutize(Path::new(&value), &project_root);
        paths.config_source = ValueSource::Env;
    }

    Ok(paths)
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("JACKETSYNC_PROJECT_ROOT")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    match detect_project_root_heuristic(&context.cwd) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_project_root_heuristic(cwd: &Path) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    for candidate in cwd.ancestors() {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join(IMAGES_DIR_NAME).is_dir() || candidate.join(STATE_DIR_NAME).is_dir() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
