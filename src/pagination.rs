use crate::config::PaginationConfig;
use crate::crawlers::frontier::PageRequest;
use crate::extract::parse_selectors;
use crate::text::element_visible_text;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// "Next page" controls, most specific first
const NEXT_SELECTORS: &[&str] = &[
    r#"[data-test="pagination-next"]"#,
    r#"[data-ev-label="pagination_next_page"]"#,
    r#"button[aria-label="Next"]"#,
    r#"a[aria-label="Next"]"#,
    r#"button[aria-label="Next page"]"#,
    r#"a[aria-label="Next page"]"#,
    r#"a[rel="next"]"#,
    ".pagination-next",
    "li.next a",
];

/// Labels accepted when no selector matches
const NEXT_LABELS: &[&str] = &["next", "next page", "next ›", "next »", "›", "»"];

/// Decides whether a further page exists and where it lives
#[derive(Debug, Clone)]
pub struct PaginationController {
    scheme: PaginationConfig,
    max_pages: u32,
}

impl PaginationController {
    pub fn new(scheme: PaginationConfig, max_pages: u32) -> Self {
        Self { scheme, max_pages }
    }

    /// The request for the page after `current`, or `None` when the results
    /// cap was hit, `max_pages` was reached, or the page shows no enabled
    /// next control.
    pub fn next_request(&self, html: &str, current: &PageRequest, cap_reached: bool) -> Option<PageRequest> {
        if cap_reached {
            ::log::debug!("Result cap reached, not paginating past page {}", current.page);
            return None;
        }
        if current.page >= self.max_pages {
            ::log::info!("Reached max pages ({})", self.max_pages);
            return None;
        }
        if !has_next_control(html) {
            ::log::info!("No more pages available after page {}", current.page);
            return None;
        }

        let next_page = current.page + 1;
        let url = self.page_url(&current.url, next_page)?;
        ::log::info!("Enqueuing page {}: {}", next_page, url);
        Some(PageRequest::new(url, next_page))
    }

    /// URL of page `page` (1-based) derived from `current_url`
    pub fn page_url(&self, current_url: &str, page: u32) -> Option<String> {
        let mut url = match Url::parse(current_url) {
            Ok(url) => url,
            Err(e) => {
                ::log::warn!("Cannot paginate unparsable URL {}: {}", current_url, e);
                return None;
            }
        };
        let (param, value) = match &self.scheme {
            PaginationConfig::PageNumber { param } => (param.as_str(), page.to_string()),
            PaginationConfig::Offset { param, page_size } => (
                param.as_str(),
                (page.saturating_sub(1) as usize * page_size).to_string(),
            ),
        };
        set_query_param(&mut url, param, &value);
        Some(url.to_string())
    }
}

/// Replace (or add) one query parameter, keeping the others in order
fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let pairs = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<Vec<_>>();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
        query.append_pair(name, value);
    }
}

/// Whether the markup shows a next-page control that is not disabled
pub fn has_next_control(html: &str) -> bool {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    for selector in parse_selectors(NEXT_SELECTORS) {
        if let Some(control) = root.select(&selector).next() {
            return !is_disabled(control);
        }
    }

    // Text fallback for controls with no usable attributes
    let Ok(clickable) = Selector::parse("button, a") else {
        return false;
    };
    root.select(&clickable)
        .find(|el| {
            let label = element_visible_text(*el).to_lowercase();
            NEXT_LABELS.contains(&label.as_str())
        })
        .is_some_and(|el| !is_disabled(el))
}

fn is_disabled(control: ElementRef<'_>) -> bool {
    let flagged = |el: &ElementRef<'_>| {
        let element = el.value();
        element.attr("disabled").is_some()
            || element.attr("aria-disabled") == Some("true")
            || element.attr("hidden").is_some()
            || element.classes().any(|c| c.eq_ignore_ascii_case("disabled"))
    };
    if flagged(&control) {
        return true;
    }
    control
        .parent()
        .and_then(ElementRef::wrap)
        .is_some_and(|parent| flagged(&parent))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_scheme() -> PaginationController {
        PaginationController::new(PaginationConfig::default(), 20)
    }

    const NEXT_ENABLED: &str =
        r#"<html><body><nav><button data-test="pagination-next">Next</button></nav></body></html>"#;

    #[test]
    fn test_next_control_detection() {
        assert!(has_next_control(NEXT_ENABLED));
        assert!(!has_next_control(
            r#"<html><body><button data-test="pagination-next" disabled>Next</button></body></html>"#
        ));
        assert!(!has_next_control(
            r#"<html><body><a aria-label="Next" aria-disabled="true">Next</a></body></html>"#
        ));
        assert!(!has_next_control(
            r#"<html><body><ul><li class="next disabled"><a href="?page=3">Next</a></li></ul></body></html>"#
        ));
        assert!(!has_next_control("<html><body><p>Only page</p></body></html>"));
    }

    #[test]
    fn test_text_fallback() {
        assert!(has_next_control(
            r#"<html><body><div class="pager"><button>Next</button></div></body></html>"#
        ));
        assert!(!has_next_control(
            r#"<html><body><button>Next steps for your career</button></body></html>"#
        ));
    }

    #[test]
    fn test_page_number_url() {
        let controller = page_scheme();
        let current = PageRequest::new("https://example/search?q=test", 1);
        let next = controller.next_request(NEXT_ENABLED, &current, false).unwrap();
        assert_eq!(next.url, "https://example/search?q=test&page=2");
        assert_eq!(next.page, 2);
        assert_eq!(next.retries, 0);

        let current = PageRequest::new("https://example/search?page=2&q=test", 2);
        let next = controller.next_request(NEXT_ENABLED, &current, false).unwrap();
        assert_eq!(next.url, "https://example/search?q=test&page=3");
    }

    #[test]
    fn test_offset_url() {
        let controller = PaginationController::new(
            PaginationConfig::Offset {
                param: "start".to_string(),
                page_size: 25,
            },
            20,
        );
        assert_eq!(
            controller.page_url("https://example/search?q=x", 3).unwrap(),
            "https://example/search?q=x&start=50"
        );
        assert_eq!(
            controller.page_url("https://example/search?q=x&start=50", 1).unwrap(),
            "https://example/search?q=x&start=0"
        );
    }

    #[test]
    fn test_stops_at_cap_and_max_pages() {
        let controller = PaginationController::new(PaginationConfig::default(), 3);
        let page3 = PageRequest::new("https://example/search?page=3", 3);
        assert!(controller.next_request(NEXT_ENABLED, &page3, false).is_none());

        let page1 = PageRequest::new("https://example/search", 1);
        assert!(controller.next_request(NEXT_ENABLED, &page1, true).is_none());
        assert!(controller.next_request(NEXT_ENABLED, &page1, false).is_some());
    }
}
