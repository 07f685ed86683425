use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use castsync::{
    AlwaysOnline, FixtureRemoteSource, HttpRemoteSource, LocalCache, NoopReporter,
    PreferencesStore, ProgressEvent, ProgressReporter, RemoteDataSource, ReqwestClient,
    RetryPolicy, SharedProgressReporter, SyncManager, SyncOptions, SyncWorker,
};

// Emoji with fallback for terminals without Unicode support
static SATELLITE: Emoji<'_, '_> = Emoji("📡 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static BELL: Emoji<'_, '_> = Emoji("🔔 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

const PREFERENCES_FILE: &str = "prefs.json";
const CACHE_FILE: &str = "cache.json";

/// Synchronize a local podcast catalog with a remote change list service
#[derive(Parser, Debug)]
#[command(name = "castsync")]
#[command(about = "Synchronize a local podcast catalog with a remote change list service")]
#[command(version)]
#[command(group(ArgGroup::new("source").required(true).args(["remote", "fixtures"])))]
struct Args {
    /// Directory holding the preferences and the cache snapshot
    #[arg(short, long)]
    data_dir: PathBuf,

    /// Base URL of the remote API
    #[arg(short, long)]
    remote: Option<String>,

    /// Directory with categories.json, podcasts.json and episodes.json to sync from
    #[arg(short, long)]
    fixtures: Option<PathBuf>,

    /// Keep syncing every SECS seconds until interrupted
    #[arg(short, long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Maximum number of attempts per sync run
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Number of ids fetched per remote request
    #[arg(long, default_value = "40")]
    batch_size: usize,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self { multi, main_bar }
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }

    fn finish(&self) {
        self.main_bar.finish_and_clear();
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::SyncPassStarted { attempt } => {
                let message = if attempt > 1 {
                    format!("{SEARCH}Syncing (attempt {})", attempt.to_string().yellow())
                } else {
                    format!("{SEARCH}Syncing")
                };
                self.main_bar.set_message(message);
            }

            ProgressEvent::ChangeListFetched {
                kind,
                after,
                changes,
            } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}{} • {} changes after version {}",
                    kind.collection().bold(),
                    changes.to_string().cyan(),
                    after
                ));
            }

            ProgressEvent::ModelsDeleted { kind, count } => {
                self.main_bar.set_message(format!(
                    "{} • removed {}",
                    kind.collection().bold(),
                    count.to_string().yellow()
                ));
            }

            ProgressEvent::ModelsUpdated { kind, count } => {
                self.main_bar.set_message(format!(
                    "{} • stored {}",
                    kind.collection().bold(),
                    count.to_string().cyan()
                ));
            }

            ProgressEvent::VersionCommitted { kind, version } => {
                self.println(format!(
                    "  {SUCCESS}{} now at version {}",
                    kind.collection().green(),
                    version.to_string().cyan()
                ));
            }

            ProgressEvent::EntitySyncFailed { kind, error } => {
                self.println(format!(
                    "  {FAILURE}{} - {}",
                    kind.collection().red(),
                    error.dimmed()
                ));
            }

            ProgressEvent::NewEpisodesAvailable { episode_uris } => {
                self.println(format!(
                    "  {BELL}{} new episodes from followed podcasts",
                    episode_uris.len().to_string().yellow().bold()
                ));
            }

            ProgressEvent::SyncPassCompleted { success } => {
                if success {
                    self.main_bar
                        .set_message(format!("{}", "Up to date".green()));
                } else {
                    self.main_bar
                        .set_message(format!("{}", "Sync incomplete".red()));
                }
            }
        }
    }
}

async fn open_remote(args: &Args) -> Result<Arc<dyn RemoteDataSource>> {
    if let Some(url) = &args.remote {
        let remote = HttpRemoteSource::new(ReqwestClient::new(), url)
            .with_context(|| format!("Invalid remote URL: {url}"))?;
        return Ok(Arc::new(remote));
    }

    let dir = args
        .fixtures
        .as_deref()
        .context("Either --remote or --fixtures is required")?;
    let remote = FixtureRemoteSource::from_dir(dir)
        .await
        .with_context(|| format!("Failed to load fixtures from {}", dir.display()))?;
    Ok(Arc::new(remote))
}

async fn wait_for_interrupt(manager: &SyncManager) {
    if tokio::signal::ctrl_c().await.is_ok() {
        manager.shutdown();
    }
}

async fn print_summary(cache: &LocalCache, preferences: &PreferencesStore, data_dir: &Path) {
    let tables = cache.snapshot();
    let snapshot = preferences.snapshot().await;
    let versions = snapshot.change_list_versions;

    println!(
        "\n{} {} categories, {} podcasts, {} episodes",
        "Catalog:".bold(),
        tables.categories.len().to_string().cyan(),
        tables.podcasts.len().to_string().cyan(),
        tables.episodes.len().to_string().cyan()
    );
    println!(
        "{} categories {}, podcasts {}, episodes {}",
        "Versions:".bold(),
        versions.category,
        versions.podcast,
        versions.episode
    );
    if let Some(at) = snapshot.last_synced_at {
        println!("{} {}", "Last synced:".bold(), at.to_rfc3339().dimmed());
    }
    println!(
        "\n{FOLDER}Data: {}\n",
        data_dir.display().to_string().cyan()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            SATELLITE,
            "castsync".bold().magenta(),
            "- Podcast Catalog Sync".dimmed()
        );
    }

    tokio::fs::create_dir_all(&args.data_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.data_dir.display()))?;

    let preferences_path = args.data_dir.join(PREFERENCES_FILE);
    let preferences = Arc::new(
        PreferencesStore::open(&preferences_path)
            .await
            .context("Failed to load preferences")?,
    );
    let cache_path = args.data_dir.join(CACHE_FILE);
    let cache = Arc::new(
        LocalCache::open(&cache_path)
            .await
            .context("Failed to load cache snapshot")?,
    );
    let remote = open_remote(&args).await?;

    let indicatif = (!args.quiet).then(|| Arc::new(IndicatifReporter::new()));
    let reporter: SharedProgressReporter = match &indicatif {
        Some(reporter) => reporter.clone() as SharedProgressReporter,
        None => NoopReporter::shared(),
    };

    let options = SyncOptions {
        retry: RetryPolicy::new(args.retries),
        interval: args.interval.map(Duration::from_secs),
        batch_size: args.batch_size,
    };
    let worker = SyncWorker::for_catalog(
        cache.clone(),
        remote,
        preferences.clone(),
        options.batch_size,
        reporter.clone(),
    );
    let synced_before = preferences.snapshot().await.last_synced_at;
    let manager = SyncManager::new(worker, options, Arc::new(AlwaysOnline), reporter);

    match manager.initialize() {
        Some(periodic) => {
            wait_for_interrupt(&manager).await;
            manager.wait_idle().await;
            periodic.await.context("Periodic sync task failed")?;
        }
        None => {
            tokio::select! {
                _ = manager.wait_idle() => {}
                _ = wait_for_interrupt(&manager) => manager.wait_idle().await,
            }
        }
    }

    if let Some(reporter) = &indicatif {
        reporter.finish();
    }

    cache
        .persist()
        .await
        .context("Failed to save cache snapshot")?;

    if !args.quiet {
        print_summary(&cache, &preferences, &args.data_dir).await;
    }

    let synced = preferences.snapshot().await.last_synced_at != synced_before;
    if !synced {
        eprintln!("{FAILURE}{}", "Sync did not complete".red().bold());
        std::process::exit(1);
    }

    Ok(())
}
