//! C7: routes URLs to the right site worker, creating and retiring workers as hosts come and go.
//!
//! The source's `ThreadManager.register_handler` asserted a host wasn't already registered
//! before spawning its thread -- a single global lock serialized every dispatch. Here `DashMap`
//! gives the same check-and-insert atomicity per host without a single lock serializing
//! dispatches for unrelated hosts: `entry` locks only that host's shard while the worker is
//! spawned, so two concurrent callers for a brand-new host can never both spawn one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::siteworker;
use crate::store::Store;
use crate::weburl::PageUrl;

struct Inner {
    workers: DashMap<String, mpsc::Sender<PageUrl>>,
    store: Store,
    client: reqwest::Client,
    rate_limiter: RateLimiter,
    config: Arc<Config>,
}

/// A cheap, clonable handle every site worker and the refresh daemon share to queue links and
/// retire themselves. Cloning it does not clone the host registry.
#[derive(Clone)]
pub struct DispatcherHandle {
    inner: Arc<Inner>,
}

impl DispatcherHandle {
    pub fn new(store: Store, client: reqwest::Client, rate_limiter: RateLimiter, config: Arc<Config>) -> Self {
        DispatcherHandle {
            inner: Arc::new(Inner {
                workers: DashMap::new(),
                store,
                client,
                rate_limiter,
                config,
            }),
        }
    }

    /// Launch the refresh daemon and seed every `scraping_sites` entry.
    pub fn start(&self) {
        let seeds: Vec<PageUrl> = self
            .inner
            .config
            .scraping_sites
            .iter()
            .filter_map(|raw| PageUrl::parse(raw, None, self.inner.config.ignore_url_fragments).ok())
            .collect();
        let mut counts = HashMap::new();
        for url in seeds {
            counts.insert(url, 1);
        }
        self.queue_links(counts);

        let handle = self.clone();
        tokio::spawn(async move { handle.refresh_daemon().await });
    }

    async fn refresh_daemon(&self) {
        let mut ticker = interval(Duration::from_secs(self.inner.config.daemon_wait_time_seconds));
        loop {
            ticker.tick().await;
            match self.inner.store.old_links(self.inner.config.page_rank_memory_rows).await {
                Ok(urls) => {
                    let mut counts = HashMap::new();
                    for url in urls {
                        counts.insert(url, 1);
                    }
                    self.queue_links(counts);
                }
                Err(e) => tracing::error!(error = %e, "refresh daemon: store error listing old links"),
            }
        }
    }

    /// For each url that still needs checking, ensure its host has a live worker, then enqueue.
    /// Edge weights are carried through but not otherwise used (see the open question on
    /// weighting frontier order by in-degree).
    pub fn queue_links(&self, links: HashMap<PageUrl, u32>) {
        let handle = self.clone();
        tokio::spawn(async move {
            for (url, _occurrences) in links {
                match handle.inner.store.needs_check(url.clone()).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        tracing::error!(%url, error = %e, "store error checking needs_check");
                        continue;
                    }
                }

                let sender = handle.worker_for(url.host());
                if sender.send(url.clone()).await.is_err() {
                    tracing::debug!(%url, "worker channel closed between lookup and send");
                }
            }
        });
    }

    /// Returns the existing worker for `host`, spawning one if none is registered yet. The spawn
    /// happens inside the `entry` closure, which holds that host's shard lock for the duration,
    /// so two concurrent calls for the same new host can never both spawn a worker -- one waits
    /// for the other's insert and reuses it.
    fn worker_for(&self, host: &str) -> mpsc::Sender<PageUrl> {
        self.inner
            .workers
            .entry(host.to_string())
            .or_insert_with(|| {
                siteworker::spawn(
                    host.to_string(),
                    self.inner.client.clone(),
                    self.inner.store.clone(),
                    self.clone(),
                    self.inner.rate_limiter.clone(),
                    self.inner.config.clone(),
                )
            })
            .clone()
    }

    /// Called by a site worker when it retires itself (idle timeout or unrecoverable robots
    /// error); removes the host from the registry so a future URL for it spawns a fresh worker.
    pub fn retire(&self, host: String) {
        self.inner.workers.remove(&host);
    }

    pub fn live_worker_count(&self) -> usize {
        self.inner.workers.len()
    }
}
