//! C1: canonical identity of a page.
//!
//! A `PageUrl` is the `(host, path)` pair every other component keys off of: the store's page
//! rows, link edges and postings are all addressed by it. Two `PageUrl`s compare equal, and
//! hash the same, iff their canonical pair matches -- this is load-bearing for
//! `HashSet`/`HashMap` dedup throughout the crawl pipeline.

use std::fmt;

use url::Url;

use crate::error::UrlError;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct PageUrl {
    host: String,
    /// Everything after the host: path, and query string if present. Always starts with `/`.
    path: String,
}

impl PageUrl {
    /// Construct directly from an already-canonical `(host, path)` pair, e.g. when rehydrating a
    /// row read back from the store. `path` is normalized defensively but is expected to already
    /// be in canonical form.
    pub fn from_parts(host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = normalize_path(&path.into());
        PageUrl { host: host.into(), path }
    }

    /// Parse `raw` into a canonical `PageUrl`.
    ///
    /// `raw` may be absolute (`https://a.test/x`) or relative to `parent` (`/x`, `x`,
    /// `//a.test/x`). If `raw` has no host of its own, the host is inherited from `parent`. If
    /// neither `raw` nor `parent` supplies a host, parsing fails -- the distilled spec requires
    /// this to be handled at the dispatcher's ingress (logged and dropped), not raised through
    /// every call site, so callers should match on `Err` and drop rather than propagate with `?`
    /// across worker boundaries.
    pub fn parse(raw: &str, parent: Option<&PageUrl>, ignore_fragments: bool) -> Result<Self, UrlError> {
        let resolved = match parent {
            Some(parent) => {
                let base = Url::parse(&format!("https://{}{}", parent.host, parent.path))
                    .map_err(|_| UrlError::NoHost { raw: raw.to_string() })?;
                base.join(raw).ok()
            }
            None => Url::parse(raw).ok(),
        };

        let mut resolved = match resolved {
            Some(url) if url.has_host() => url,
            _ => return Err(UrlError::NoHost { raw: raw.to_string() }),
        };

        let _ = resolved.set_scheme("https");
        if ignore_fragments {
            resolved.set_fragment(None);
        }

        let host = resolved.host_str().unwrap_or_default().to_string();
        let mut path = resolved.path().to_string();
        if let Some(query) = resolved.query() {
            path.push('?');
            path.push_str(query);
        }
        if ignore_fragments {
            // fragment already stripped above
        } else if let Some(fragment) = resolved.fragment() {
            path.push('#');
            path.push_str(fragment);
        }

        Ok(PageUrl { host, path: normalize_path(&path) })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reconstruct a fetchable `https://host/path` string.
    pub fn to_url_string(&self) -> String {
        format!("https://{}{}", self.host, self.path)
    }

    /// A `PageUrl` standing for this host's `robots.txt`, used as the `parent` when resolving
    /// the robots.txt location itself.
    pub fn robots_txt(&self) -> PageUrl {
        PageUrl { host: self.host.clone(), path: "/robots.txt".to_string() }
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_url_string())
    }
}

fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if !path.starts_with('/') {
        format!("/{path}")
    } else {
        path.to_string()
    }
}
