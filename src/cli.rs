//! C12: `clap`-derived subcommands.
//!
//! `serve` is the source's actual `if __name__ == "__main__"` behavior -- store, crawler, and
//! PageRank daemon all running as background tasks feeding a foreground search REPL -- split out
//! into its own subcommand alongside `init`/`crawl`/`search` so each can be run standalone too.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "crawlrank", about = "A polite crawler and PageRank-backed search engine")]
pub struct Cli {
    /// Path to the YAML configuration document.
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the store (or verify it matches the current schema) and exit.
    Init,
    /// Run the dispatcher, site workers, and PageRank daemon headlessly.
    Crawl,
    /// Run a keyword search against an already-populated store.
    Search {
        /// Query text; if omitted, reads queries from stdin in a loop.
        query: Option<String>,
    },
    /// Run everything together: crawl, PageRank, and an interactive search REPL.
    Serve,
}
