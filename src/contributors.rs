//! Contributors-via-HEAD (design doc §4.7, REDESIGN FLAGS: kept as a
//! best-effort secondary path, never blocking collection on failure).
//!
//! Grounded on `GitHubAPI.get_repository_contributors_count` in
//! `github_api.py`: a `HEAD /repos/{owner}/{repo}/contributors?per_page=1`
//! request, where the last page number in the `Link` header's `rel="last"`
//! entry is the contributor count (GitHub paginates one contributor per
//! page when `per_page=1`). No `Link` header means zero contributors; a
//! `Link` header without a `last` relation means exactly one page.

use crate::error::HttpError;
use crate::http_client::HttpClient;
use reqwest::header::HeaderMap;

/// Best-effort lookup: any failure (network, parse, missing repo) is
/// swallowed to `None` by the caller rather than aborting collection, since
/// this path supplements the GraphQL-sourced aggregate counts rather than
/// gating them.
pub async fn contributor_count(client: &HttpClient, owner: &str, repo: &str) -> Result<u64, HttpError> {
    let path = format!("repos/{owner}/{repo}/contributors");
    let headers = client.head(&path, &[("per_page", "1"), ("anon", "true")]).await?;
    Ok(parse_contributor_count(&headers))
}

fn parse_contributor_count(headers: &HeaderMap) -> u64 {
    let Some(link) = headers.get("Link").and_then(|v| v.to_str().ok()) else {
        return 0;
    };
    match last_page_number(link) {
        Some(n) => n,
        None => 1,
    }
}

/// Parses the `page=N` query parameter out of the `rel="last"` entry of a
/// `Link` header, e.g. `<https://api.github.com/...&page=42>; rel="last"`.
fn last_page_number(link_header: &str) -> Option<u64> {
    link_header
        .split(',')
        .find(|segment| segment.contains("rel=\"last\""))
        .and_then(|segment| segment.split("page=").nth(1))
        .and_then(|after_page| after_page.split(['&', '>']).next())
        .and_then(|digits| digits.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers_with_link(link: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Link", HeaderValue::from_str(link).unwrap());
        headers
    }

    #[test]
    fn no_link_header_means_zero_contributors() {
        assert_eq!(parse_contributor_count(&HeaderMap::new()), 0);
    }

    #[test]
    fn link_without_last_relation_means_one_page() {
        let headers = headers_with_link(
            "<https://api.github.com/repositories/1/contributors?per_page=1&page=2>; rel=\"next\"",
        );
        assert_eq!(parse_contributor_count(&headers), 1);
    }

    #[test]
    fn last_relation_page_number_is_the_contributor_count() {
        let headers = headers_with_link(
            "<https://api.github.com/repositories/1/contributors?per_page=1&page=2>; rel=\"next\", \
             <https://api.github.com/repositories/1/contributors?per_page=1&page=42>; rel=\"last\"",
        );
        assert_eq!(parse_contributor_count(&headers), 42);
    }
}
