use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use deckfeed_core::{
    fragment_for, parse_fragment, ContentNode, DeckLoader, FeedConfig, FileLocationStore,
    FixtureProvider, FrameCallbacks, LocationStore, NodeId, PrefetchHandle, ProviderConfig,
    RangeProvider, VisibilityRegistry, VisibilitySignal,
};
use deckfeed_remote::RemoteHttpProvider;
use directories::ProjectDirs;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "deckfeed",
    version,
    about = "Browse card decks loaded incrementally from a deck server"
)]
struct Args {
    /// Configuration file (defaults to deckfeed.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deck server URL, overrides the configured provider
    #[arg(long, global = true, conflicts_with = "fixture")]
    server: Option<String>,

    /// JSON fixture file to serve decks from
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Number of cards in the generated fixture deck
    #[arg(long, global = true)]
    nodes: Option<usize>,

    #[arg(long, global = true)]
    page_size: Option<usize>,

    /// Directory for logs and saved reading positions
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Args)]
struct DeckArgs {
    /// Author slug
    #[arg(long)]
    user: Option<String>,

    /// Deck slug
    #[arg(long)]
    deck: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List published decks by author
    Sitemap,
    /// Print deck metadata and table of contents
    Index {
        #[command(flatten)]
        deck: DeckArgs,
    },
    /// Print one card, by default the saved reading position
    Show {
        #[command(flatten)]
        deck: DeckArgs,
        /// Card id or `#id` fragment
        #[arg(long)]
        node: Option<String>,
    },
    /// Scroll through cards one by one, saving the position
    Walk {
        #[command(flatten)]
        deck: DeckArgs,
        #[arg(long)]
        node: Option<String>,
        #[arg(long, default_value_t = 10)]
        steps: usize,
    },
    /// Load every card in the background and report progress
    Crawl {
        #[command(flatten)]
        deck: DeckArgs,
        /// Delay between prefetch ticks
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (data_dir, default_config) = match &args.state_dir {
        Some(dir) => (dir.clone(), dir.join("deckfeed.toml")),
        None => {
            let project_dirs = ProjectDirs::from("net", "deckfeed", "deckfeed")
                .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
            (
                project_dirs.data_local_dir().to_path_buf(),
                project_dirs.config_dir().join("deckfeed.toml"),
            )
        }
    };
    let _log_guard = init_logging(&data_dir)?;

    let config_path = args.config.clone().unwrap_or(default_config);
    let mut config = FeedConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    apply_overrides(&mut config, &args);
    config.loader.validate()?;

    let provider = build_provider(&config)?;
    let locations: Arc<dyn LocationStore> =
        Arc::new(FileLocationStore::new(data_dir.join("state"))?);

    let mut stdout = io::stdout().lock();
    match args.command {
        Command::Sitemap => print_sitemap(provider.as_ref(), &mut stdout).await?,
        Command::Index { deck } => {
            let loader = DeckLoader::new(provider, config.loader.clone());
            print_index(&loader, &deck, &mut stdout).await?;
        }
        Command::Show { deck, node } => {
            let loader = DeckLoader::new(provider, config.loader.clone())
                .with_location_store(locations);
            show(&loader, &deck, node.as_deref(), &mut stdout).await?;
        }
        Command::Walk { deck, node, steps } => {
            let loader = Arc::new(
                DeckLoader::new(provider, config.loader.clone()).with_location_store(locations),
            );
            walk(loader, &deck, node.as_deref(), steps, &mut stdout).await?;
        }
        Command::Crawl { deck, interval_ms } => {
            let mut loader_config = config.loader.clone();
            loader_config.stop_when_loaded = true;
            if let Some(ms) = interval_ms {
                loader_config.prefetch_interval = Duration::from_millis(ms);
            }
            let loader = Arc::new(DeckLoader::new(provider, loader_config));
            crawl(loader, &deck, &mut stdout).await?;
        }
    }
    stdout.flush()?;
    Ok(())
}

fn apply_overrides(config: &mut FeedConfig, args: &Args) {
    if let Some(server_url) = &args.server {
        let request_timeout = match &config.provider {
            ProviderConfig::Remote { request_timeout, .. } => *request_timeout,
            _ => Duration::from_secs(30),
        };
        config.provider = ProviderConfig::Remote {
            server_url: server_url.clone(),
            request_timeout,
        };
    }
    if let Some(path) = &args.fixture {
        let nodes = match &config.provider {
            ProviderConfig::Fixture { nodes, .. } => *nodes,
            _ => 1000,
        };
        config.provider = ProviderConfig::Fixture {
            path: Some(path.clone()),
            nodes,
        };
    }
    if let Some(count) = args.nodes {
        if let ProviderConfig::Fixture { nodes, .. } = &mut config.provider {
            *nodes = count;
        }
    }
    if let Some(page_size) = args.page_size {
        config.loader.page_size = page_size;
    }
}

fn build_provider(config: &FeedConfig) -> Result<Arc<dyn RangeProvider>> {
    let page_size = config.loader.page_size;
    let provider: Arc<dyn RangeProvider> = match &config.provider {
        ProviderConfig::Fixture {
            path: Some(path), ..
        } => Arc::new(
            FixtureProvider::from_path(path, page_size)
                .with_context(|| format!("failed to load fixture {:?}", path))?,
        ),
        ProviderConfig::Fixture { path: None, nodes } => {
            Arc::new(FixtureProvider::generated(*nodes, page_size)?)
        }
        ProviderConfig::Remote {
            server_url,
            request_timeout,
        } => Arc::new(RemoteHttpProvider::new(server_url.clone(), *request_timeout)?),
    };
    Ok(provider)
}

fn parse_node(node: Option<&str>) -> Option<NodeId> {
    node.and_then(parse_fragment)
}

async fn print_sitemap(provider: &dyn RangeProvider, out: &mut impl Write) -> Result<()> {
    let sitemap = provider.get_sitemap().await.context("failed to fetch sitemap")?;
    for (author, decks) in sitemap {
        writeln!(out, "{}", author)?;
        for deck in decks {
            let hidden = if deck.visible { "" } else { " (hidden)" };
            writeln!(out, "  {}: {}{}", deck.slug, deck.title, hidden)?;
        }
    }
    Ok(())
}

async fn print_index(loader: &DeckLoader, deck: &DeckArgs, out: &mut impl Write) -> Result<()> {
    let index = loader
        .load_index(deck.user.as_deref(), deck.deck.as_deref(), None)
        .await
        .context("failed to load deck")?;
    let meta = &index.metadata;
    writeln!(out, "{}", meta.name)?;
    writeln!(out, "id: {}", index.id)?;
    if let Some(author) = &meta.author {
        writeln!(out, "author: {}", author)?;
    }
    if let Some(description) = &meta.description {
        writeln!(out, "{}", description)?;
    }
    writeln!(out, "cards: {}", index.len())?;
    if let Some(audio) = &index.audio {
        writeln!(out, "audio: {}", audio.url)?;
    }
    let toc = loader.table_of_contents();
    if !toc.is_empty() {
        writeln!(out, "contents:")?;
        for entry in toc {
            let indent = "  ".repeat(entry.depth + 1);
            writeln!(out, "{}{} {}", indent, entry.title, fragment_for(&entry.target))?;
        }
    }
    Ok(())
}

async fn show(
    loader: &DeckLoader,
    deck: &DeckArgs,
    node: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let target = parse_node(node);
    loader
        .load_index(deck.user.as_deref(), deck.deck.as_deref(), target.as_ref())
        .await
        .context("failed to load deck")?;
    let Some(id) = loader.current_id() else {
        writeln!(out, "deck is empty")?;
        return Ok(());
    };
    let card = loader.get_content(&id).await?;
    print_card(out, loader.current_location(), &card)?;
    loader.persist_location()?;
    Ok(())
}

async fn walk(
    loader: Arc<DeckLoader>,
    deck: &DeckArgs,
    node: Option<&str>,
    steps: usize,
    out: &mut impl Write,
) -> Result<()> {
    let target = parse_node(node);
    loader
        .load_index(deck.user.as_deref(), deck.deck.as_deref(), target.as_ref())
        .await
        .context("failed to load deck")?;
    let prefetch = PrefetchHandle::spawn(Arc::clone(&loader));

    let registry = VisibilityRegistry::new();
    let (callbacks, mut frames) = FrameCallbacks::channel();
    let mut cursor = loader.current_id();
    for _ in 0..steps {
        let Some(id) = cursor.take() else {
            break;
        };
        let token = registry.subscribe(id.clone(), callbacks.clone());
        registry.notify(&id, VisibilitySignal::Visible);
        registry.notify(&id, VisibilitySignal::Primary);
        while let Ok(frame) = frames.try_recv() {
            if let Some(card) = frame.apply(&loader).await? {
                if frame.signal == VisibilitySignal::Visible {
                    let ordinal = loader.content_order(&card.id).unwrap_or_default();
                    print_card(out, ordinal, &card)?;
                }
            }
        }
        registry.notify(&id, VisibilitySignal::Unprimary);
        registry.notify(&id, VisibilitySignal::Hidden);
        registry.unsubscribe(token);
        while let Ok(frame) = frames.try_recv() {
            frame.apply(&loader).await?;
        }
        cursor = loader.next_content_id();
    }

    let report = prefetch.shutdown().await;
    info!(ticks = report.ticks, merged = report.merged, "walk finished");
    if let Err(err) = loader.persist_location() {
        warn!(%err, "failed to save reading position");
    }
    Ok(())
}

async fn crawl(loader: Arc<DeckLoader>, deck: &DeckArgs, out: &mut impl Write) -> Result<()> {
    let index = loader
        .load_index(deck.user.as_deref(), deck.deck.as_deref(), None)
        .await
        .context("failed to load deck")?;
    let started = Instant::now();
    let report = PrefetchHandle::spawn(Arc::clone(&loader)).join().await;
    writeln!(
        out,
        "loaded {}/{} cards in {} ticks ({} failed) after {:.1}s",
        loader.store().len(),
        index.len(),
        report.ticks,
        report.failures,
        started.elapsed().as_secs_f64()
    )?;
    if !report.fully_loaded {
        return Err(anyhow!("deck {} is not fully loaded", index.id));
    }
    Ok(())
}

fn print_card(out: &mut impl Write, ordinal: usize, card: &ContentNode) -> io::Result<()> {
    writeln!(out, "[{}] {} ({})", ordinal, fragment_for(&card.id), card.kind)?;
    if let Some(title) = &card.title {
        writeln!(out, "  {}", title)?;
    }
    if let Some(body) = &card.body {
        for line in body.lines() {
            writeln!(out, "  {}", line)?;
        }
    }
    if let Some(url) = card.media.image_url.as_ref().or(card.media.video_url.as_ref()) {
        writeln!(out, "  media: {}", url)?;
    }
    for child in &card.stack {
        writeln!(out, "  - {} ({})", child.id, child.kind)?;
    }
    Ok(())
}

fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;
    let file_appender = tracing_appender::rolling::never(log_dir, "deckfeed.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
