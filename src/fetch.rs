//! C5: turn one URL into outbound links and indexable text.
//!
//! Mirrors the source's page-handling step (strip `<script>`/`<style>`, walk anchors, hand the
//! remaining text to the tokenizer) but against `scraper`/`reqwest` instead of BeautifulSoup and
//! `requests`. `scraper` has no in-place DOM mutation, so "decompose script/style before reading
//! text" becomes: tokenize the whole document, then tokenize just the `<script>`/`<style>`
//! subtrees and subtract their counts back out.

use std::collections::HashMap;

use scraper::{Html, Selector};

use crate::error::FetchError;
use crate::tokens::{tokenize, TokenContainer};
use crate::weburl::PageUrl;

/// The result of successfully fetching and parsing one page.
pub struct FetchedPage {
    pub links: HashMap<PageUrl, u32>,
    pub tokens: TokenContainer,
}

/// Fetch `url` with `client` and extract its links and tokens.
///
/// The caller is responsible for having already cleared `url` through the rate limiter and the
/// robots/allow-list policy gate (§4.6) -- this function only handles the HTTP exchange and
/// parsing, never policy.
pub async fn fetch(client: &reqwest::Client, url: &PageUrl, ignore_url_fragments: bool) -> Result<FetchedPage, FetchError> {
    let text = get_text(client, url).await?;
    Ok(parse(url, &text, ignore_url_fragments))
}

/// Fetch raw response text for `url`, mapping any transport failure to `FetchError::Transient`.
pub async fn get_text(client: &reqwest::Client, url: &PageUrl) -> Result<String, FetchError> {
    let response = client
        .get(url.to_url_string())
        .send()
        .await
        .map_err(|e| FetchError::Transient { url: url.clone(), source: e.into() })?;

    let response = response.error_for_status().map_err(|e| FetchError::Transient {
        url: url.clone(),
        source: e.into(),
    })?;

    response
        .text()
        .await
        .map_err(|e| FetchError::Transient { url: url.clone(), source: e.into() })
}

/// Parse an already-fetched response body into links and tokens. Split out from [`fetch`] so
/// callers who already hold the bytes (tests, or a future offline re-index command) don't need
/// to refetch.
pub fn parse(origin: &PageUrl, body: &str, ignore_url_fragments: bool) -> FetchedPage {
    let document = Html::parse_document(body);
    let anchor_selector = Selector::parse("a[href]").expect("static selector is always valid");

    let mut links: HashMap<PageUrl, u32> = HashMap::new();
    for element in document.select(&anchor_selector) {
        let Some(href) = element.value().attr("href") else { continue };
        if let Ok(target) = PageUrl::parse(href, Some(origin), ignore_url_fragments) {
            *links.entry(target).or_insert(0) += 1;
        }
    }

    FetchedPage { links, tokens: visible_text_tokens(&document) }
}

/// `scraper` has no in-place node removal, so "decompose script/style before extracting text"
/// (the source's literal `soup.script.decompose()`) becomes: tokenize the whole document, then
/// tokenize just the `<script>`/`<style>` subtrees and subtract their counts back out.
fn visible_text_tokens(document: &Html) -> TokenContainer {
    let root_selector = Selector::parse("html").expect("static selector is always valid");
    let noise_selector = Selector::parse("script, style").expect("static selector is always valid");

    let whole_text: String = document
        .select(&root_selector)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join(" ");
    let noise_text: String = document
        .select(&noise_selector)
        .flat_map(|el| el.text())
        .collect::<Vec<_>>()
        .join(" ");

    let mut tokens = tokenize(&whole_text);
    let noise = tokenize(&noise_text);
    for name in noise.token_names() {
        if let Some(noise_count) = noise.get_count(&name) {
            tokens.subtract(&name, noise_count);
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_links_relative_to_origin() {
        let origin = PageUrl::from_parts("a.test", "/dir/");
        let page = parse(
            &origin,
            r#"<html><body><a href="other">one</a><a href="https://b.test/x">two</a></body></html>"#,
            true,
        );
        assert_eq!(page.links.len(), 2);
        assert!(page.links.contains_key(&PageUrl::from_parts("a.test", "/dir/other")));
        assert!(page.links.contains_key(&PageUrl::from_parts("b.test", "/x")));
    }

    #[test]
    fn duplicate_links_are_counted() {
        let origin = PageUrl::from_parts("a.test", "/");
        let page = parse(
            &origin,
            r#"<a href="/x">one</a><a href="/x">two</a><a href="/x">three</a>"#,
            true,
        );
        assert_eq!(page.links.get(&PageUrl::from_parts("a.test", "/x")), Some(&3));
    }

    #[test]
    fn script_and_style_text_is_excluded_from_tokens() {
        let origin = PageUrl::from_parts("a.test", "/");
        let page = parse(
            &origin,
            r#"<html><body>
                <script>var secretWord = "zzzqux";</script>
                <style>.zzzqux { color: red; }</style>
                <p>hello world</p>
            </body></html>"#,
            true,
        );
        assert!(page.tokens.get_count("zzzqux").is_none());
        assert!(page.tokens.len() > 0);
    }

    #[test]
    fn malformed_href_is_skipped_not_fatal() {
        let origin = PageUrl::from_parts("a.test", "/");
        let page = parse(&origin, r#"<a href="">empty</a><a href="/ok">ok</a>"#, true);
        assert!(page.links.contains_key(&PageUrl::from_parts("a.test", "/ok")));
    }
}
