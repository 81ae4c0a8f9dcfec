use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crawlrank::cli::{Cli, Command};
use crawlrank::config::Config;
use crawlrank::dispatcher::DispatcherHandle;
use crawlrank::ratelimit::{Budget, RateLimiter};
use crawlrank::{pagerank, search};
use crawlrank::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to default configuration");
        Config::default()
    });

    match cli.command {
        Command::Init => {
            Store::open(&config.database_path, config.auto_reset_on_db_init_changes, config.allow_duplicates_despite_timing)
                .await?;
            println!("store ready at {}", config.database_path);
        }
        Command::Crawl => {
            let (dispatcher, pagerank_handle) = start_crawl(config).await?;
            dispatcher.start();
            tokio::select! {
                _ = pagerank_handle => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }
        Command::Search { query } => {
            let store = Store::open(&config.database_path, false, config.allow_duplicates_despite_timing).await?;
            match query {
                Some(q) => run_one_search(&store, &q, &config).await?,
                None => search_repl(&store, &config).await?,
            }
        }
        Command::Serve => {
            let (dispatcher, _pagerank_handle) = start_crawl(config.clone()).await?;
            dispatcher.start();
            let store = Store::open(&config.database_path, false, config.allow_duplicates_despite_timing).await?;
            search_repl(&store, &config).await?;
        }
    }

    Ok(())
}

async fn start_crawl(config: Config) -> anyhow::Result<(DispatcherHandle, tokio::task::JoinHandle<()>)> {
    let config = Arc::new(config);
    let store = Store::open(&config.database_path, config.auto_reset_on_db_init_changes, config.allow_duplicates_despite_timing).await?;
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(30))
        .build()?;
    let rate_limiter = RateLimiter::spawn(
        Budget::new(config.global_requests_in_interval, Duration::from_secs(config.global_request_interval_seconds)),
        Budget::new(config.site_requests_in_interval, Duration::from_secs(config.site_request_interval_seconds)),
    );

    let dispatcher = DispatcherHandle::new(store.clone(), client, rate_limiter, config.clone());
    let pagerank_handle = tokio::spawn(pagerank::run(store, (*config).clone()));
    Ok((dispatcher, pagerank_handle))
}

async fn run_one_search(store: &Store, query: &str, config: &Config) -> anyhow::Result<()> {
    let results = search::search(store, query, config.results_per_search, config.page_rank_strength).await?;
    print_results(query, &results);
    Ok(())
}

async fn search_repl(store: &Store, config: &Config) -> anyhow::Result<()> {
    println!("crawlrank search. Enter a query, or 'exit' to quit.");
    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") {
            break;
        }

        match search::search(store, query, config.results_per_search, config.page_rank_strength).await {
            Ok(results) => print_results(query, &results),
            Err(e) => eprintln!("search failed: {e}"),
        }
    }
    Ok(())
}

fn print_results(query: &str, results: &[search::ScoredPage]) {
    if results.is_empty() {
        println!("no results for '{query}'");
        return;
    }
    println!("{} result(s) for '{query}':", results.len());
    for result in results {
        println!("  [{:.4}] {}", result.score, result.url);
    }
}
