//! robots.txt handling in support of the site worker (C6).
//!
//! `robotstxt::DefaultMatcher` answers the binary allow/deny question but does not expose
//! `Crawl-delay`/`Request-rate`, so those are hand-scanned out of the raw text, mirroring the
//! approach taken by the closest reference crawler in this corpus.

use std::time::Duration;

use robotstxt::DefaultMatcher;

use crate::ratelimit::Budget;

/// The policy extracted from one host's robots.txt: the matcher content itself (kept so
/// `can_fetch` can be re-evaluated per path without refetching) plus the optional rate overrides
/// it names for this host.
pub struct RobotsPolicy {
    content: String,
    pub crawl_delay: Option<Duration>,
    pub request_rate: Option<(u32, Duration)>,
}

impl RobotsPolicy {
    pub fn parse(content: String) -> RobotsPolicy {
        let crawl_delay = parse_crawl_delay(&content);
        let request_rate = parse_request_rate(&content);
        RobotsPolicy { content, crawl_delay, request_rate }
    }

    /// An empty/missing robots.txt is treated as "allow everything", matching the convention
    /// that absence of a robots.txt imposes no restriction.
    pub fn empty() -> RobotsPolicy {
        RobotsPolicy { content: String::new(), crawl_delay: None, request_rate: None }
    }

    pub fn can_fetch(&self, user_agent: &str, url: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }
        DefaultMatcher::default().one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// The per-host rate budget this robots.txt implies, if any. `Request-rate` wins when both
    /// are present since it names the request count explicitly; `Crawl-delay` otherwise becomes
    /// a budget of one request per that many seconds.
    pub fn rate_budget(&self) -> Option<Budget> {
        if let Some((count, window)) = self.request_rate {
            return Some(Budget::new(count.max(1), window));
        }
        self.crawl_delay.map(|delay| Budget::new(1, delay))
    }
}

/// Hand-scan for a `Crawl-delay: <seconds>` directive, since `robotstxt` only answers
/// allow/deny. Takes the first value found anywhere in the document -- real robots.txt files
/// rarely scope `Crawl-delay` per user-agent group in a way worth modeling more precisely here.
fn parse_crawl_delay(content: &str) -> Option<Duration> {
    for line in content.lines() {
        let line = line.trim();
        let Some((directive, value)) = line.split_once(':') else { continue };
        if directive.trim().eq_ignore_ascii_case("crawl-delay") {
            if let Ok(seconds) = value.trim().parse::<f64>() {
                return Some(Duration::from_secs_f64(seconds.max(0.0)));
            }
        }
    }
    None
}

/// Hand-scan for a `Request-rate: <requests>/<seconds>` directive (e.g. `1/10` or `1/10s`),
/// same rationale as `parse_crawl_delay`.
fn parse_request_rate(content: &str) -> Option<(u32, Duration)> {
    for line in content.lines() {
        let line = line.trim();
        let Some((directive, value)) = line.split_once(':') else { continue };
        if !directive.trim().eq_ignore_ascii_case("request-rate") {
            continue;
        }
        let value = value.trim().trim_end_matches(['s', 'S']);
        let Some((count, seconds)) = value.split_once('/') else { continue };
        if let (Ok(count), Ok(seconds)) = (count.trim().parse::<u32>(), seconds.trim().parse::<f64>()) {
            return Some((count.max(1), Duration::from_secs_f64(seconds.max(0.0))));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_robots_allows_everything() {
        let policy = RobotsPolicy::empty();
        assert!(policy.can_fetch("*", "https://a.test/anything"));
    }

    #[test]
    fn disallow_all_blocks_every_path() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /\n".to_string());
        assert!(!policy.can_fetch("*", "https://a.test/x"));
    }

    #[test]
    fn specific_disallow_blocks_only_that_prefix() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /private/\n".to_string());
        assert!(!policy.can_fetch("*", "https://a.test/private/x"));
        assert!(policy.can_fetch("*", "https://a.test/public/x"));
    }

    #[test]
    fn crawl_delay_is_parsed_in_seconds() {
        let policy = RobotsPolicy::parse("User-agent: *\nCrawl-delay: 5\n".to_string());
        assert_eq!(policy.crawl_delay, Some(Duration::from_secs(5)));
    }

    #[test]
    fn absent_crawl_delay_is_none() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /x\n".to_string());
        assert_eq!(policy.crawl_delay, None);
    }

    #[test]
    fn fractional_crawl_delay_is_supported() {
        let policy = RobotsPolicy::parse("Crawl-delay: 0.5\n".to_string());
        assert_eq!(policy.crawl_delay, Some(Duration::from_millis(500)));
    }

    #[test]
    fn request_rate_is_parsed_as_count_over_seconds() {
        let policy = RobotsPolicy::parse("User-agent: *\nRequest-rate: 1/10\n".to_string());
        assert_eq!(policy.request_rate, Some((1, Duration::from_secs(10))));
    }

    #[test]
    fn request_rate_accepts_a_trailing_unit_suffix() {
        let policy = RobotsPolicy::parse("Request-rate: 3/20s\n".to_string());
        assert_eq!(policy.request_rate, Some((3, Duration::from_secs(20))));
    }

    #[test]
    fn rate_budget_prefers_request_rate_over_crawl_delay() {
        let policy = RobotsPolicy::parse("Crawl-delay: 5\nRequest-rate: 2/10\n".to_string());
        let budget = policy.rate_budget().unwrap();
        assert_eq!(budget.limit, 2);
        assert_eq!(budget.window, Duration::from_secs(10));
    }

    #[test]
    fn rate_budget_falls_back_to_crawl_delay() {
        let policy = RobotsPolicy::parse("Crawl-delay: 5\n".to_string());
        let budget = policy.rate_budget().unwrap();
        assert_eq!(budget.limit, 1);
        assert_eq!(budget.window, Duration::from_secs(5));
    }

    #[test]
    fn rate_budget_is_none_without_either_directive() {
        let policy = RobotsPolicy::parse("User-agent: *\nDisallow: /x\n".to_string());
        assert!(policy.rate_budget().is_none());
    }
}
