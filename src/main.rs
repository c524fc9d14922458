use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use photofeed::config::{Config, MAX_PER_PAGE};
use photofeed::feed::{FeedController, FeedState, LoadMoreTrigger, Phase, TriggerConfig};
use photofeed::provider::{HttpSearchProvider, Photo};
use photofeed::util::{sanitize_line, truncate_to_width};
use photofeed::viewport::ScrollViewport;

/// Height of one printed line in viewport units.
const ROW_HEIGHT: f64 = 20.0;
/// Lines visible at once in the simulated viewport.
const VISIBLE_ROWS: f64 = 24.0;

/// Get the config directory path (~/.config/photofeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("photofeed"))
}

#[derive(Parser, Debug)]
#[command(name = "photofeed", about = "Search photos and page through the results")]
struct Args {
    /// Search query
    query: String,

    /// Stop after this many pages
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pages: u32,

    /// Photos per page (overrides config, 1-30)
    #[arg(long, value_name = "N")]
    per_page: Option<u32>,

    /// Config file (default: ~/.config/photofeed/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum line width in columns
    #[arg(long, value_name = "COLS", default_value_t = 100)]
    width: usize,
}

fn format_photo(index: usize, photo: &Photo, width: usize) -> String {
    let caption = photo.caption().unwrap_or("(untitled)");
    let line = if photo.author.name.is_empty() {
        format!("{:>4}. {}  {}", index + 1, photo.id, caption)
    } else {
        format!(
            "{:>4}. {}  {}  by {}",
            index + 1,
            photo.id,
            caption,
            photo.author.name
        )
    };
    truncate_to_width(&sanitize_line(&line), width).into_owned()
}

fn print_new_photos(state: &FeedState, printed: &mut usize, width: usize) {
    for (i, photo) in state.photos.iter().enumerate().skip(*printed) {
        println!("{}", format_photo(i, photo, width));
    }
    *printed = state.photos.len();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    if config.access_key().is_none() {
        tracing::warn!("No access key configured; set PHOTOFEED_ACCESS_KEY or access_key");
    }

    let per_page = args
        .per_page
        .map(|n| n.clamp(1, MAX_PER_PAGE))
        .unwrap_or(config.per_page);

    let client = reqwest::Client::builder()
        .user_agent(concat!("photofeed/", env!("CARGO_PKG_VERSION")))
        .pool_idle_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("Failed to create HTTP client")?;
    let provider = HttpSearchProvider::from_config(client, &config)
        .context("Failed to create search provider")?;

    let controller = Arc::new(FeedController::with_page_size(provider, per_page));
    let mut states = controller.subscribe();

    let viewport = Arc::new(ScrollViewport::new(VISIBLE_ROWS * ROW_HEIGHT));
    let sentinel = viewport.add_sentinel(0.0, 0.0);
    let mut trigger = LoadMoreTrigger::new(
        Arc::clone(&controller),
        TriggerConfig {
            root_margin_px: config.root_margin_px,
            threshold: config.visibility_threshold,
            min_interval: config.load_more_interval(),
            ..TriggerConfig::default()
        },
    );
    trigger.attach(viewport.clone(), sentinel);

    controller.fetch(args.query.clone());

    let mut printed = 0;
    let outcome = loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break Ok(());
            }
        }

        let state = states.borrow_and_update().clone();
        print_new_photos(&state, &mut printed, args.width);

        match state.phase {
            Phase::Failed => {
                let message = state
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                break Err(anyhow::anyhow!("Search failed: {}", message));
            }
            Phase::Ready if state.page >= args.pages || !state.has_more => break Ok(()),
            Phase::Ready => {
                // Lay out one row per photo with the sentinel after the last
                let content_height = state.photos.len() as f64 * ROW_HEIGHT;
                viewport.set_content_height(content_height);
                viewport.move_sentinel(sentinel, content_height);

                // Reading pause; also keeps the next load outside min_interval
                tokio::select! {
                    _ = tokio::time::sleep(config.load_more_interval()) => {}
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break Ok(());
                    }
                }

                // Re-observe unconditionally: the sentinel may already be visible
                trigger.configure(trigger.config().clone().with_feed_state(&state));
                viewport.scroll_to_bottom();
            }
            Phase::Idle | Phase::FetchingInitial | Phase::LoadingMore => {
                trigger.sync_with(&state);
            }
        }
    };

    trigger.detach();
    controller.dispose();

    let state = controller.state();
    if outcome.is_ok() {
        eprintln!(
            "{} photos for \"{}\" ({} page{}{})",
            state.photos.len(),
            state.query,
            state.page,
            if state.page == 1 { "" } else { "s" },
            if state.has_more { ", more available" } else { "" }
        );
    }
    outcome
}
