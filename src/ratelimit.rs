//! C4: two-tier polite rate limiting.
//!
//! The source's `RequestManager` tracked a `(request_period_start, requests)` pair per tier and
//! reset it wholesale -- `(now, 0)` -- whenever the window rolled over, then let requests
//! accumulate freely against the fresh counter until the next reset or rollover. That's a
//! fixed-window reset counter, not a sliding log, and it's what's reproduced here: each tier is
//! its own actor task owning one such counter (global, plus one per host); workers ask for
//! permission over a channel instead of sharing a lock, so contention across many concurrent
//! site workers never becomes a bottleneck. A host's robots.txt can override its own counter's
//! budget once the site worker has fetched it (see [`RateLimiter::set_host_budget`]).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

/// A single request-rate budget: at most `limit` requests per `window`, reset wholesale once the
/// window rolls over (not a trailing sliding log).
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub limit: u32,
    pub window: Duration,
}

impl Budget {
    pub fn new(limit: u32, window: Duration) -> Self {
        Budget { limit, window }
    }
}

/// A fixed window: `count` requests admitted since `period_start`. Reset to `(now, 0)` in one
/// shot whenever the window rolls over, mirroring the source's reset-on-rollover counter rather
/// than pruning a continuous log of timestamps.
struct Window {
    budget: Budget,
    period_start: Instant,
    count: u32,
}

impl Window {
    /// Windows reset on first use per tier, so the counter starts fresh as of construction time.
    fn new(budget: Budget) -> Self {
        Window { budget, period_start: Instant::now(), count: 0 }
    }

    fn reset_if_rolled_over(&mut self, now: Instant) {
        if now.duration_since(self.period_start) >= self.budget.window {
            self.period_start = now;
            self.count = 0;
        }
    }

    /// How long the caller must wait before the window rolls over and the counter resets,
    /// `None` if a slot is free in the current window right now.
    fn wait_for_slot(&mut self, now: Instant) -> Option<Duration> {
        self.reset_if_rolled_over(now);
        if self.count < self.budget.limit {
            None
        } else {
            Some(self.budget.window.saturating_sub(now.duration_since(self.period_start)))
        }
    }

    fn record(&mut self, now: Instant) {
        self.reset_if_rolled_over(now);
        self.count += 1;
    }
}

/// A process-wide limiter: a single global budget plus an independent budget per host. Acquiring
/// a slot waits on whichever of the two is currently tighter, then records the request against
/// both.
#[derive(Clone)]
pub struct RateLimiter {
    tx: mpsc::Sender<Command>,
}

enum Command {
    Acquire { host: String, reply: oneshot::Sender<()> },
    SetHostBudget { host: String, budget: Budget },
}

impl RateLimiter {
    pub fn spawn(global_budget: Budget, default_per_host_budget: Budget) -> RateLimiter {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(global_budget, default_per_host_budget, rx));
        RateLimiter { tx }
    }

    /// Blocks until both the global and per-host budgets have a free slot for `host`, then
    /// reserves one in each.
    pub async fn acquire(&self, host: &str) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Acquire { host: host.to_string(), reply: reply_tx })
            .await
            .is_err()
        {
            // The limiter task is gone; the process is shutting down. Nothing useful to do but
            // let the caller proceed -- it will fail at the fetch step instead.
            return;
        }
        let _ = reply_rx.await;
    }

    /// Replace `host`'s per-host budget, e.g. with one derived from its robots.txt `Crawl-delay`
    /// or `Request-rate` directive. Starts a fresh window immediately; takes effect on the next
    /// `acquire` for that host.
    pub async fn set_host_budget(&self, host: &str, budget: Budget) {
        let _ = self.tx.send(Command::SetHostBudget { host: host.to_string(), budget }).await;
    }
}

async fn run(global_budget: Budget, default_per_host_budget: Budget, mut rx: mpsc::Receiver<Command>) {
    let mut global = Window::new(global_budget);
    let mut per_host: HashMap<String, Window> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::SetHostBudget { host, budget } => {
                per_host.insert(host, Window::new(budget));
            }
            Command::Acquire { host, reply } => {
                loop {
                    let now = Instant::now();
                    let host_window =
                        per_host.entry(host.clone()).or_insert_with(|| Window::new(default_per_host_budget));
                    let global_wait = global.wait_for_slot(now);
                    let host_wait = host_window.wait_for_slot(now);

                    match (global_wait, host_wait) {
                        (None, None) => {
                            global.record(now);
                            host_window.record(now);
                            break;
                        }
                        (wait_a, wait_b) => {
                            let longest = wait_a.into_iter().chain(wait_b).max().unwrap_or(Duration::ZERO);
                            sleep(longest).await;
                        }
                    }
                }
                let _ = reply.send(());
            }
        }
    }
}
