//! C8: iterative PageRank-style link analysis over the stored link graph.
//!
//! Mirrors the source's `pagerank.py` sweep: one damped-rank update per known page per pass,
//! written to a shadow column and promoted atomically once the whole pass completes, so readers
//! (the query scorer) never observe a half-updated ranking. The daemon keeps sweeping until the
//! store has gone idle for long enough, then runs a handful of unconditional final passes.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;

use crate::config::Config;
use crate::store::{Store, SubdomainPager};

/// Run one full sweep over every page in the store, writing results to the shadow rank column
/// and promoting them atomically at the end.
pub async fn sweep(store: &Store, config: &Config) -> Result<(), crate::error::StoreError> {
    let n = store.subdomain_count().await?.max(1) as f64;
    let mut pager = SubdomainPager::new(store.clone(), config.page_rank_memory_rows);

    while let Some(batch) = pager.next_batch().await? {
        for url in batch {
            let backlinks = store.backlinks(url.clone()).await?;
            let incoming: f64 = backlinks
                .iter()
                .map(|b| {
                    let origin_rank = b.origin_rank.unwrap_or(1.0 / n);
                    let forward_links = if b.forward_links == 0 { 1 } else { b.forward_links } as f64;
                    b.occurrences as f64 * origin_rank / forward_links
                })
                .sum();
            let rank = config.page_rank_multiplier * incoming + (1.0 - config.page_rank_multiplier) / n;
            store.set_temp_rank(url, rank).await?;
        }
    }

    store.commit_temp_ranks().await
}

/// Drive sweeps until the store has been idle through an entire sweep+interval window
/// `page_rank_iters_after_last_change` times in a row, then run `page_rank_final_cycles`
/// unconditional sweeps and stop. Runs forever (intended to be spawned as its own task) until
/// that terminal condition, mirroring the source's daemon thread rather than a one-shot CLI
/// command.
pub async fn run(store: Store, config: Config) {
    let mut ticker = interval(Duration::from_secs(config.page_rank_interval_seconds));
    let mut passes_since_last_update: u32 = 0;

    loop {
        ticker.tick().await;
        let sweep_started = Utc::now();

        if let Err(e) = sweep(&store, &config).await {
            tracing::error!(error = %e, "pagerank sweep failed");
            continue;
        }

        let last_change = match store.last_change_at().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "pagerank: store error reading last_change_at");
                continue;
            }
        };

        let sweep_duration = Utc::now().signed_duration_since(sweep_started);
        // now - last_change + 1s >= interval + sweep_duration, rearranged to avoid a second
        // `Utc::now()` call: now - last_change >= interval + sweep_duration - 1s.
        let idle_threshold = chrono::Duration::seconds(config.page_rank_interval_seconds as i64)
            + sweep_duration
            - chrono::Duration::seconds(1);

        if Utc::now().signed_duration_since(last_change) >= idle_threshold {
            passes_since_last_update += 1;
        } else {
            passes_since_last_update = 0;
        }

        tracing::debug!(passes_since_last_update, "pagerank sweep complete");

        if passes_since_last_update >= config.page_rank_iters_after_last_change {
            break;
        }
    }

    tracing::info!(cycles = config.page_rank_final_cycles, "pagerank converged, running final cycles");
    for _ in 0..config.page_rank_final_cycles {
        if let Err(e) = sweep(&store, &config).await {
            tracing::error!(error = %e, "pagerank final sweep failed");
        }
    }
    tracing::info!("pagerank daemon stopping");
}
