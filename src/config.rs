//! Explicit configuration record loaded from a YAML document.
//!
//! The source kept a module-level global (`config.Config`, an `Enum` built from the parsed
//! YAML at import time) that every other module reached into directly. Here configuration is a
//! plain, immutable value produced once at startup and handed to every component constructor --
//! no component mutates it, and nothing reads it through a global.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- Crawl policy ---
    pub allowed_sites: HashSet<String>,
    pub blocked_sites: HashSet<String>,
    pub limit_sites_to_allowed_sites: bool,
    pub scraping_sites: Vec<String>,
    pub ignore_url_fragments: bool,
    pub days_till_next_page_check: i64,
    pub allow_duplicates_despite_timing: bool,

    // --- Rate limiting ---
    pub site_request_interval_seconds: u64,
    pub site_requests_in_interval: u32,
    pub global_request_interval_seconds: u64,
    pub global_requests_in_interval: u32,
    pub seconds_between_scraping_on_same_site: u64,

    // --- Threading ---
    pub threading_timeout: u64,
    pub daemon_wait_time_seconds: u64,

    // --- PageRank ---
    pub page_rank_multiplier: f64,
    pub page_rank_interval_seconds: u64,
    pub page_rank_memory_rows: i64,
    pub page_rank_iters_after_last_change: u32,
    pub page_rank_final_cycles: u32,
    pub page_rank_strength: f64,

    // --- Query ---
    pub results_per_search: usize,

    // --- Store ---
    pub database_path: String,
    pub auto_reset_on_db_init_changes: bool,

    // --- Fetcher ---
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            allowed_sites: HashSet::new(),
            blocked_sites: HashSet::new(),
            limit_sites_to_allowed_sites: false,
            scraping_sites: Vec::new(),
            ignore_url_fragments: true,
            days_till_next_page_check: 7,
            allow_duplicates_despite_timing: false,

            site_request_interval_seconds: 1,
            site_requests_in_interval: 2,
            global_request_interval_seconds: 1,
            global_requests_in_interval: 10,
            seconds_between_scraping_on_same_site: 0,

            threading_timeout: 30,
            daemon_wait_time_seconds: 60,

            page_rank_multiplier: 0.85,
            page_rank_interval_seconds: 30,
            page_rank_memory_rows: 500,
            page_rank_iters_after_last_change: 3,
            page_rank_final_cycles: 2,
            page_rank_strength: 1.0,

            results_per_search: 10,

            database_path: "crawlrank.db".to_string(),
            auto_reset_on_db_init_changes: true,

            user_agent: "crawlrank/0.1 (+https://example.invalid/bot)".to_string(),
        }
    }
}

impl Config {
    /// Load and merge a YAML document from disk into a `Config`, starting from `Config::default()`
    /// for any key the document omits.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config = serde_yaml::from_str("scraping_sites:\n  - https://a.test/\n").unwrap();
        assert_eq!(config.scraping_sites, vec!["https://a.test/".to_string()]);
        assert_eq!(config.page_rank_multiplier, 0.85);
        assert!(config.ignore_url_fragments);
    }

    #[test]
    fn full_document_overrides_every_field() {
        let yaml = r#"
allowed_sites: ["a.test"]
blocked_sites: ["b.test"]
limit_sites_to_allowed_sites: true
scraping_sites: ["https://a.test/"]
ignore_url_fragments: false
days_till_next_page_check: 3
allow_duplicates_despite_timing: true
site_request_interval_seconds: 2
site_requests_in_interval: 5
global_request_interval_seconds: 1
global_requests_in_interval: 20
seconds_between_scraping_on_same_site: 1
threading_timeout: 10
daemon_wait_time_seconds: 120
page_rank_multiplier: 0.9
page_rank_interval_seconds: 60
page_rank_memory_rows: 200
page_rank_iters_after_last_change: 5
page_rank_final_cycles: 1
page_rank_strength: 0.5
results_per_search: 25
database_path: "other.db"
auto_reset_on_db_init_changes: false
user_agent: "custom-agent/1.0"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.limit_sites_to_allowed_sites);
        assert_eq!(config.days_till_next_page_check, 3);
        assert_eq!(config.database_path, "other.db");
        assert_eq!(config.user_agent, "custom-agent/1.0");
    }
}
