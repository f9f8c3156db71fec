//! Cursor pagination
//!
//! List endpoints page through sorted name lists with `n` (page size) and
//! `last` (exclusive cursor) query parameters, advertising the next page in
//! an RFC 5988 `Link` header.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

/// Largest page a client can request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Query parameters accepted by paginated list endpoints.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListQuery {
    /// Requested page size.
    pub n: Option<usize>,
    /// Exclusive cursor: return entries strictly after this value.
    pub last: Option<String>,
}

impl ListQuery {
    /// The effective page size, capped at [`MAX_PAGE_SIZE`].
    pub fn page_size(&self) -> usize {
        self.n.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE)
    }
}

/// One page of results plus the `Link` header for the next page, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Entries in this page, sorted ascending.
    pub items: Vec<String>,
    /// `Link` header value advertising the next page.
    pub link: Option<String>,
}

/// Slice a page out of a name list.
///
/// The input is sorted and deduplicated first, so pagination is stable across
/// requests regardless of insertion order. The link is only produced when
/// entries remain beyond this page.
pub fn paginate(mut names: Vec<String>, query: &ListQuery, base: &str) -> Page {
    names.sort();
    names.dedup();

    let start = match &query.last {
        Some(last) => names.partition_point(|name| name <= last),
        None => 0,
    };

    let size = query.page_size();
    let end = (start + size).min(names.len());
    let items: Vec<String> = names[start..end].to_vec();

    let link = if end < names.len() && !items.is_empty() {
        let last = items.last().map(String::as_str).unwrap_or_default();
        let cursor = utf8_percent_encode(last, NON_ALPHANUMERIC);
        Some(format!("<{base}?last={cursor}&n={size}>; rel=\"next\""))
    } else {
        None
    };

    Page { items, link }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn full_list_fits_one_page() {
        let page = paginate(names(&["b", "a", "c"]), &ListQuery::default(), "/v2/x/tags/list");
        assert_eq!(page.items, names(&["a", "b", "c"]));
        assert!(page.link.is_none());
    }

    #[test]
    fn link_points_past_the_page() {
        let query = ListQuery {
            n: Some(2),
            last: None,
        };
        let page = paginate(names(&["a", "b", "c", "d"]), &query, "/v2/x/tags/list");
        assert_eq!(page.items, names(&["a", "b"]));
        assert_eq!(
            page.link.as_deref(),
            Some("</v2/x/tags/list?last=b&n=2>; rel=\"next\"")
        );
    }

    #[test]
    fn following_links_visits_everything_once() {
        let all = names(&["v1", "v10", "v2", "v3", "v4", "v5"]);
        let mut seen = Vec::new();
        let mut last = None;

        loop {
            let query = ListQuery {
                n: Some(2),
                last: last.clone(),
            };
            let page = paginate(all.clone(), &query, "/list");
            seen.extend(page.items.iter().cloned());
            if page.link.is_none() {
                break;
            }
            last = page.items.last().cloned();
        }

        let mut expected = all.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn zero_page_size() {
        let query = ListQuery {
            n: Some(0),
            last: None,
        };
        let page = paginate(names(&["a", "b"]), &query, "/list");
        assert!(page.items.is_empty());
        assert!(page.link.is_none());
    }

    #[test]
    fn oversized_n_is_capped() {
        let query = ListQuery {
            n: Some(100_000),
            last: None,
        };
        assert_eq!(query.page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn cursor_is_percent_encoded() {
        let query = ListQuery {
            n: Some(1),
            last: None,
        };
        let page = paginate(names(&["a/b", "c"]), &query, "/list");
        assert_eq!(
            page.link.as_deref(),
            Some("</list?last=a%2Fb&n=1>; rel=\"next\"")
        );
    }
}
