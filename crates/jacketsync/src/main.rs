use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use jacketsync_core::config::{SyncConfig, load_config};
use jacketsync_core::decode::decode_stem;
use jacketsync_core::images::{
    DEFAULT_SONG_PAGES, download_wiki_images, fetch_song_pages, update_csv_image_urls,
};
use jacketsync_core::matcher::JacketIndex;
use jacketsync_core::pipeline::{SyncOptions, run_sync, scrape_songs_by_level};
use jacketsync_core::records::write_song_entries;
use jacketsync_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, normalize_for_display as normalize_path,
    resolve_paths,
};
use jacketsync_core::store::SupabaseStore;
use jacketsync_core::wiki::{MediaWikiClient, WikiApi};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "jacketsync",
    version,
    about = "Sync chart metadata from the song wiki and match jacket images to titles"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH", help = "Jacket images directory")]
    images: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    images: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            images: cli.images.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Scrape the level table, fill gaps, export and upsert")]
    Sync(SyncArgs),
    #[command(about = "Fetch data from the song wiki")]
    Scrape(ScrapeArgs),
    #[command(about = "Match titles to local jacket images")]
    Jackets(JacketsArgs),
}

#[derive(Debug, Args)]
struct SyncArgs {
    #[arg(long, help = "Reuse songs_by_level.csv instead of scraping when it exists")]
    skip_scrape: bool,
}

#[derive(Debug, Args)]
struct ScrapeArgs {
    #[arg(long, value_name = "MS", global = true, help = "Delay between wiki requests")]
    delay_ms: Option<u64>,
    #[command(subcommand)]
    command: ScrapeSubcommand,
}

#[derive(Debug, Subcommand)]
enum ScrapeSubcommand {
    #[command(name = "songs-by-level")]
    SongsByLevel {
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    #[command(name = "song-pages")]
    SongPages {
        titles: Vec<String>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    Images {
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct JacketsArgs {
    #[command(subcommand)]
    command: JacketsSubcommand,
}

#[derive(Debug, Subcommand)]
enum JacketsSubcommand {
    Update(UpdateArgs),
    Resolve {
        #[arg(required = true)]
        titles: Vec<String>,
    },
    Decode {
        #[arg(required = true)]
        stems: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[arg(long, value_name = "PATH", help = "Input CSV (default: individual_songs.csv)")]
    csv: Option<PathBuf>,
    #[arg(short, long, value_name = "PATH", help = "Output CSV (default: overwrite input)")]
    output: Option<PathBuf>,
    #[arg(long, default_value = "title")]
    title_column: String,
    #[arg(long, default_value = "imageUrl")]
    image_column: String,
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("jacketsync=info,jacketsync_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Sync(args)) => run_sync_command(&runtime, args),
        Some(Commands::Scrape(ScrapeArgs { delay_ms, command })) => match command {
            ScrapeSubcommand::SongsByLevel { output } => {
                run_scrape_songs_by_level(&runtime, delay_ms, output)
            }
            ScrapeSubcommand::SongPages { titles, output } => {
                run_scrape_song_pages(&runtime, delay_ms, titles, output)
            }
            ScrapeSubcommand::Images { dir } => run_scrape_images(&runtime, delay_ms, dir),
        },
        Some(Commands::Jackets(JacketsArgs { command })) => match command {
            JacketsSubcommand::Update(args) => run_jackets_update(&runtime, args),
            JacketsSubcommand::Resolve { titles } => run_jackets_resolve(&runtime, &titles),
            JacketsSubcommand::Decode { stems } => {
                run_jackets_decode(&stems);
                Ok(())
            }
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_sync_command(runtime: &RuntimeOptions, args: SyncArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let wiki_settings = config.wiki_settings();
    let store_settings = config.store_settings();
    let credentials = config.store_credentials()?;

    let mut wiki = MediaWikiClient::new(wiki_settings.clone())?;
    let mut store =
        SupabaseStore::new(credentials, &store_settings.table, wiki_settings.timeout_ms)?;
    let options = SyncOptions {
        skip_scrape: args.skip_scrape,
        manual_song_urls: config.manual_song_urls(),
    };
    let report = run_sync(
        &mut wiki,
        &mut store,
        &paths,
        &wiki_settings,
        &store_settings,
        &options,
    )?;

    println!("sync");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("source: {}", report.source.as_str());
    println!("source_rows: {}", report.source_rows);
    println!("gap.candidates: {}", report.gap_candidates);
    println!("gap.songs_added: {}", report.gap_songs_added);
    println!("gap.rows_added: {}", report.gap_rows_added);
    println!("dropped_above_max: {}", report.dropped_above_max);
    println!("duplicates_merged: {}", report.duplicates_merged);
    println!("exported: {}", report.exported);
    println!("export_csv: {}", normalize_path(&paths.export_csv));
    println!("upserted: {}", report.upserted);
    println!("batches: {}", report.batches);
    println!("table: {}", store_settings.table);
    println!("request_count: {}", report.request_count);
    println!("completed: {}", format_flag(report.completed));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_scrape_songs_by_level(
    runtime: &RuntimeOptions,
    delay_ms: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut wiki = wiki_client(&config, delay_ms)?;
    let output = output.unwrap_or_else(|| paths.songs_by_level_csv.clone());
    let page = config.wiki_settings().songs_by_level_page;

    let rows = scrape_songs_by_level(&mut wiki, &page, Some(&output))?;
    println!("scrape songs-by-level");
    println!("page: {page}");
    println!("rows: {}", rows.len());
    println!("output: {}", normalize_path(&output));
    println!("request_count: {}", wiki.request_count());
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_scrape_song_pages(
    runtime: &RuntimeOptions,
    delay_ms: Option<u64>,
    titles: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut wiki = wiki_client(&config, delay_ms)?;
    let titles = if titles.is_empty() {
        DEFAULT_SONG_PAGES.iter().map(ToString::to_string).collect()
    } else {
        titles
    };
    let output = output.unwrap_or_else(|| paths.individual_songs_csv.clone());

    let entries = fetch_song_pages(&mut wiki, &titles);
    let written = write_song_entries(&output, &entries)?;
    println!("scrape song-pages");
    println!("pages: {}", titles.len());
    println!("entries: {written}");
    println!("output: {}", normalize_path(&output));
    println!("request_count: {}", wiki.request_count());
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_scrape_images(
    runtime: &RuntimeOptions,
    delay_ms: Option<u64>,
    dir: Option<PathBuf>,
) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let mut wiki = wiki_client(&config, delay_ms)?;
    let dir = dir.unwrap_or_else(|| paths.images_dir.clone());
    let category = config.wiki_settings().songs_category;

    let report = download_wiki_images(&mut wiki, &category, &dir)?;
    println!("scrape images");
    println!("category: {category}");
    println!("pages: {}", report.pages);
    println!("downloaded: {}", report.downloaded);
    println!("existing: {}", report.existing);
    println!("skipped_pages: {}", report.skipped_pages);
    println!("failed: {}", report.failed);
    println!("dir: {}", normalize_path(&dir));
    println!("request_count: {}", report.request_count);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_jackets_update(runtime: &RuntimeOptions, args: UpdateArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let csv_path = args
        .csv
        .unwrap_or_else(|| paths.individual_songs_csv.clone());
    let output_path = args.output.unwrap_or_else(|| csv_path.clone());

    if !csv_path.exists() {
        bail!("CSV not found: {}", normalize_path(&csv_path));
    }
    if !paths.images_dir.is_dir() {
        bail!("images dir not found: {}", normalize_path(&paths.images_dir));
    }

    let report = update_csv_image_urls(
        &csv_path,
        &paths.images_dir,
        &output_path,
        &args.title_column,
        &args.image_column,
    )?;
    println!("jackets update");
    println!("csv: {}", normalize_path(&csv_path));
    println!("images_dir: {}", normalize_path(&paths.images_dir));
    println!("updated: {}/{}", report.updated, report.total);
    println!("output: {}", normalize_path(&output_path));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_jackets_resolve(runtime: &RuntimeOptions, titles: &[String]) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let index = JacketIndex::build(&paths.images_dir);

    println!("jackets resolve");
    println!("images_dir: {}", normalize_path(&paths.images_dir));
    println!("files: {}", index.files().len());
    println!("keys: {}", index.len());
    for title in titles {
        match index.resolve_with_strategy(title) {
            Some((file, strategy)) => println!(
                "{title}: {} ({})",
                index.relative_path(file),
                strategy.as_str()
            ),
            None => println!("{title}: <no match>"),
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_jackets_decode(stems: &[String]) {
    for stem in stems {
        match decode_stem(stem).into_title() {
            Some(title) => println!("{stem}: {title}"),
            None => println!("{stem}: <not encoded>"),
        }
    }
}

fn wiki_client(config: &SyncConfig, delay_ms: Option<u64>) -> Result<MediaWikiClient> {
    let mut settings = config.wiki_settings();
    if let Some(delay_ms) = delay_ms {
        settings.request_delay_ms = delay_ms;
    }
    MediaWikiClient::new(settings)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        images_dir: runtime.images.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    let paths = resolve_paths(&context, &overrides)?;
    debug!(
        project_root = %normalize_path(&paths.project_root),
        source = paths.root_source.as_str(),
        "resolved runtime paths"
    );
    Ok(paths)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
