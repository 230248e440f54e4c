use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thumbgrid_cache::{CacheDirectory, PipelineConfig};
use thumbgrid_core::{
    sample_factor, DisplaySlot, HolderContent, ImagePipeline, ResolveOutcome, ScrollState,
    UrlRequestFactory,
};

#[derive(Debug, Parser)]
#[command(name = "thumbgrid")]
#[command(about = "Fetch, cache and decode list thumbnails")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load URLs through the pipeline as a scrolling list would and print a
    /// JSON report.
    Fetch {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// JSON configuration file; environment variables are used otherwise.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 256)]
        height: u32,
        /// Number of recycled display slots (rows on screen).
        #[arg(long, default_value_t = 8)]
        slots: usize,
        /// Keep the list scrolling this long before each page settles.
        #[arg(long, default_value_t = 0)]
        scroll_pause_ms: u64,
        #[arg(long)]
        fallback: Option<PathBuf>,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Print the down-sampling factor for a source and target size.
    SampleFactor { src_width: u32, src_height: u32, target_width: u32, target_height: u32 },
    /// Print the cache file path for a request.
    CacheFile {
        #[arg(value_name = "URL")]
        url: String,
        #[arg(long, default_value_t = 256)]
        width: u32,
        #[arg(long, default_value_t = 256)]
        height: u32,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Delete cache files older than the given age.
    Prune {
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        #[arg(long)]
        max_age_secs: u64,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    key: Option<String>,
    outcome: &'static str,
    shown: &'static str,
    width: Option<u32>,
    height: Option<u32>,
    animate: bool,
}

#[derive(Debug, Serialize)]
struct PruneReport {
    removed: usize,
    remaining: usize,
}

struct FetchOptions {
    width: u32,
    height: u32,
    slots: usize,
    scroll_pause: Duration,
    timeout: Duration,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Fetch {
            urls,
            cache_dir,
            config,
            width,
            height,
            slots,
            scroll_pause_ms,
            fallback,
            timeout_secs,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = cache_dir {
                config = config.with_cache_dir(dir);
            }
            if let Some(fallback) = fallback {
                config = config.with_fallback_image(fallback);
            }
            let options = FetchOptions {
                width,
                height,
                slots: slots.max(1),
                scroll_pause: Duration::from_millis(scroll_pause_ms),
                timeout: Duration::from_secs(timeout_secs),
            };
            run_fetch(&urls, config, &options)
        }
        Commands::SampleFactor { src_width, src_height, target_width, target_height } => {
            println!("{}", sample_factor(src_width, src_height, target_width, target_height));
            Ok(())
        }
        Commands::CacheFile { url, width, height, cache_dir } => {
            let cache = open_cache(cache_dir)?;
            println!("{}", cache.cache_file(&url, width, height).display());
            Ok(())
        }
        Commands::Prune { cache_dir, max_age_secs } => {
            let cache = open_cache(cache_dir)?;
            let removed = cache
                .prune_older_than(Duration::from_secs(max_age_secs))
                .context("failed to prune cache")?;
            let remaining = cache.entries().context("failed to list cache")?.len();
            println!("{}", serde_json::to_string_pretty(&PruneReport { removed, remaining })?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => PipelineConfig::from_env().context("invalid THUMBGRID_* environment"),
    }
}

fn open_cache(dir: Option<PathBuf>) -> Result<CacheDirectory> {
    let dir = dir.unwrap_or_else(PipelineConfig::default_cache_dir);
    CacheDirectory::new(&dir)
        .with_context(|| format!("failed to open cache directory {}", dir.display()))
}

fn run_fetch(urls: &[String], config: PipelineConfig, options: &FetchOptions) -> Result<()> {
    let cache = CacheDirectory::new(&config.cache_dir).with_context(|| {
        format!("failed to open cache directory {}", config.cache_dir.display())
    })?;
    let factory = UrlRequestFactory::new(cache, |url: &String| url.clone());
    let pipeline =
        ImagePipeline::builder(config, factory).build().context("failed to start pipeline")?;

    let slots: Vec<Arc<DisplaySlot<String>>> =
        (0..options.slots).map(|_| DisplaySlot::with_size(options.width, options.height)).collect();

    let mut reports = Vec::with_capacity(urls.len());
    // One page of the list at a time: the rows are rebound to the next page
    // once the previous one has settled.
    for page in urls.chunks(slots.len()) {
        let scrolling = !options.scroll_pause.is_zero();
        if scrolling {
            pipeline.on_scroll_state_changed(ScrollState::Fling);
        }

        let outcomes: Vec<ResolveOutcome> =
            page.iter().zip(&slots).map(|(url, slot)| pipeline.bind(slot, url.clone())).collect();

        if scrolling {
            thread::sleep(options.scroll_pause);
            let resumed = pipeline.on_scroll_state_changed(ScrollState::Idle);
            log::info!("scroll settled, {resumed} rows resumed");
        }
        pipeline.run_until_idle(options.timeout);

        for ((url, slot), outcome) in page.iter().zip(&slots).zip(outcomes) {
            reports.push(report(url, slot, outcome));
        }
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    pipeline.shutdown();
    Ok(())
}

fn report(url: &str, slot: &DisplaySlot<String>, outcome: ResolveOutcome) -> FetchReport {
    let holder = slot.holder();
    let content = holder.content();
    let (width, height) = match &content {
        HolderContent::Image(image) => (Some(image.width), Some(image.height)),
        _ => (None, None),
    };

    FetchReport {
        url: url.to_owned(),
        key: holder.tag().map(|key| key.to_string()),
        outcome: match outcome {
            ResolveOutcome::CacheHit => "cache_hit",
            ResolveOutcome::FetchStarted => "fetch_started",
            ResolveOutcome::FetchSkipped => "fetch_skipped",
        },
        shown: content.label(),
        width,
        height,
        animate: holder.take_entrance_animation(),
    }
}
