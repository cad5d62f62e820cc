use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use socian_storage::{KeywordSource, PgStore};
use socian_sync::{CrawlConfig, CrawlRunSummary, KeywordState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "socian-cli")]
#[command(about = "Socian profile crawler command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one crawl pass over every seed keyword.
    Crawl {
        /// Process one keyword and one hashtag per keyword.
        #[arg(long)]
        debug: bool,
        /// Replay a recorded fixture bundle instead of calling upstream.
        #[arg(long, value_name = "BUNDLE")]
        fixtures: Option<PathBuf>,
        /// Seed keywords for a fixture replay.
        #[arg(long = "keyword", value_name = "KEYWORD")]
        keywords: Vec<String>,
    },
    Migrate,
    #[command(subcommand)]
    Keywords(KeywordCommands),
    /// Run the cron scheduler until interrupted.
    Schedule,
}

#[derive(Debug, Subcommand)]
enum KeywordCommands {
    Add { keywords: Vec<String> },
    List,
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("socian_sync=info".parse()?)
                .add_directive("socian_adapters=info".parse()?),
        )
        .init();
    Ok(())
}

fn print_summary(summary: &CrawlRunSummary) {
    println!(
        "crawl complete: run_id={} done={} skipped={} persisted={} report={}",
        summary.run_id,
        summary.count_in_state(KeywordState::Done),
        summary.count_in_state(KeywordState::Skipped),
        summary.persisted_profiles,
        summary.report_path.as_deref().unwrap_or("-")
    );
}

async fn connect_store(config: &CrawlConfig) -> Result<PgStore> {
    PgStore::connect(&config.database_url)
        .await
        .context("connecting to profile store")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = CrawlConfig::from_env();

    match cli.command.unwrap_or(Commands::Crawl {
        debug: false,
        fixtures: None,
        keywords: Vec::new(),
    }) {
        Commands::Crawl {
            debug,
            fixtures,
            keywords,
        } => {
            let config = if debug {
                config.with_debug_limits()
            } else {
                config
            };
            match fixtures {
                Some(bundle) => {
                    let (summary, profiles) =
                        socian_sync::replay_fixture_bundle(config, &bundle, &keywords).await?;
                    print_summary(&summary);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&profiles).context("rendering profiles")?
                    );
                }
                None => {
                    let summary = socian_sync::run_crawl_once(config).await?;
                    print_summary(&summary);
                }
            }
        }
        Commands::Migrate => {
            connect_store(&config)
                .await?
                .migrate()
                .await
                .context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Keywords(KeywordCommands::Add { keywords }) => {
            let store = connect_store(&config).await?;
            let added = store
                .add_keywords(&keywords)
                .await
                .context("adding seed keywords")?;
            println!("added {added} keyword(s)");
        }
        Commands::Keywords(KeywordCommands::List) => {
            let store = connect_store(&config).await?;
            for keyword in store.list_keywords().await.context("listing seed keywords")? {
                println!("{keyword}");
            }
        }
        Commands::Schedule => {
            let config = CrawlConfig {
                scheduler_enabled: true,
                ..config
            };
            let sched = socian_sync::maybe_build_scheduler(&config)
                .await?
                .context("scheduler not built")?;
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.crawl_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}
