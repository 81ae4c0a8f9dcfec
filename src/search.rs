//! C9: combine term frequency of a query against a page with that page's PageRank score.
//!
//! Mirrors the source's `websearch.py` ranking: candidates are any page indexing at least one
//! query token, scored by a normalized term-frequency-match fraction scaled by rank, not a full
//! BM25/TF-IDF model -- the corpus's own PageRank-adjacent search engine does the same simple
//! thing deliberately, see the open question on scoring sophistication in the design notes.

use crate::error::StoreError;
use crate::store::Store;
use crate::tokens::tokenize;
use crate::weburl::PageUrl;

/// One scored search result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPage {
    pub url: PageUrl,
    pub score: f64,
}

/// Score and rank every page that indexes at least one stemmed token of `query`, returning the
/// top `limit` by descending score. `page_rank_strength` is `config.page_rank_strength`, passed
/// explicitly rather than threading a whole `Config` through the scorer.
pub async fn search(
    store: &Store,
    query: &str,
    limit: usize,
    page_rank_strength: f64,
) -> Result<Vec<ScoredPage>, StoreError> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = store.query_candidates(query_tokens.token_names()).await?;
    let query_len = query_tokens.total_tokens() as f64;

    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let page_tokens = store.page_tokens(candidate.url.clone()).await?;

        let term_relevance: f64 = query_tokens
            .tokens()
            .filter_map(|qt| page_tokens.get(&qt.name).map(|&count| count as f64 * qt.count as f64))
            .sum::<f64>()
            / query_len;

        let score = term_relevance * (1.0 + (candidate.rank - 1.0) * page_rank_strength);
        scored.push(ScoredPage { url: candidate.url, score });
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    async fn populated_store() -> Store {
        let store = Store::open(":memory:", true, false).await.unwrap();
        let rust_page = PageUrl::from_parts("a.test", "/rust");
        let other_page = PageUrl::from_parts("a.test", "/other");
        store.upsert_page(rust_page.clone(), Utc::now()).await.unwrap();
        store.upsert_page(other_page.clone(), Utc::now()).await.unwrap();

        store
            .replace_tokens(rust_page.clone(), HashMap::from([("rust".into(), 5), ("crab".into(), 1)]))
            .await
            .unwrap();
        store
            .replace_tokens(other_page.clone(), HashMap::from([("weather".into(), 3)]))
            .await
            .unwrap();
        store.set_temp_rank(rust_page, 2.0).await.unwrap();
        store.set_temp_rank(other_page, 1.0).await.unwrap();
        store.commit_temp_ranks().await.unwrap();
        store
    }

    #[tokio::test]
    async fn empty_query_returns_no_results() {
        let store = Store::open(":memory:", true, false).await.unwrap();
        let results = search(&store, "   ", 10, 1.0).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn only_matching_pages_are_returned() {
        let store = populated_store().await;
        let results = search(&store, "rust", 10, 1.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, PageUrl::from_parts("a.test", "/rust"));
    }

    #[tokio::test]
    async fn higher_rank_boosts_score_for_equal_term_relevance() {
        let store = Store::open(":memory:", true, false).await.unwrap();
        let high = PageUrl::from_parts("a.test", "/high");
        let low = PageUrl::from_parts("a.test", "/low");
        store.upsert_page(high.clone(), Utc::now()).await.unwrap();
        store.upsert_page(low.clone(), Utc::now()).await.unwrap();
        store.replace_tokens(high.clone(), HashMap::from([("rust".into(), 1)])).await.unwrap();
        store.replace_tokens(low.clone(), HashMap::from([("rust".into(), 1)])).await.unwrap();
        store.set_temp_rank(high.clone(), 3.0).await.unwrap();
        store.set_temp_rank(low.clone(), 1.0).await.unwrap();
        store.commit_temp_ranks().await.unwrap();

        let results = search(&store, "rust", 10, 1.0).await.unwrap();
        assert_eq!(results[0].url, high);
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let store = Store::open(":memory:", true, false).await.unwrap();
        for i in 0..5 {
            let page = PageUrl::from_parts("a.test", format!("/{i}"));
            store.upsert_page(page.clone(), Utc::now()).await.unwrap();
            store.replace_tokens(page, HashMap::from([("rust".into(), 1)])).await.unwrap();
        }
        let results = search(&store, "rust", 2, 1.0).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
