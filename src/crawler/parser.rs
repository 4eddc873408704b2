//! HTML page analysis
//!
//! This module extracts everything the worker's admission filters and link discovery
//! need from a fetched page:
//! - Title and declared language
//! - `<meta name="robots">` directives
//! - The canonical link
//! - Followable anchors, resolved against `<base href>` when present
//!
//! Parsed DOM trees are not `Send`, so the analysis returns owned data only.

use crate::url::resolve_href;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageAnalysis {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Value of `<html lang>`, if declared and non-empty
    pub lang: Option<String>,

    /// Lowercased content of `<meta name="robots">`
    pub robots_meta: Option<String>,

    /// `<link rel="canonical">` resolved against the document URL
    pub canonical: Option<Url>,

    /// Followable anchors (absolute http/https URLs), in document order
    pub links: Vec<Url>,
}

impl PageAnalysis {
    /// False only when the page declares a non-English language
    pub fn is_english(&self) -> bool {
        self.lang.as_deref().map_or(true, is_english)
    }

    pub fn noindex(&self) -> bool {
        self.robots_meta
            .as_deref()
            .is_some_and(|content| content.contains("noindex"))
    }

    pub fn nofollow(&self) -> bool {
        self.robots_meta
            .as_deref()
            .is_some_and(|content| content.contains("nofollow"))
    }
}

/// True for language tags starting with `en` (any case)
pub fn is_english(lang: &str) -> bool {
    lang.trim()
        .get(..2)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("en"))
}

/// Parses HTML content and extracts filters and links
///
/// # Example
///
/// ```
/// use sumi_fleet::crawler::analyze_page;
/// use url::Url;
///
/// let html = r#"<html lang="en"><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let page = analyze_page(html, &Url::parse("https://example.com/").unwrap());
/// assert_eq!(page.title, Some("Test".to_string()));
/// assert_eq!(page.links[0].as_str(), "https://example.com/page");
/// ```
pub fn analyze_page(html: &str, document_url: &Url) -> PageAnalysis {
    let document = Html::parse_document(html);

    PageAnalysis {
        title: extract_title(&document),
        lang: first_attr(&document, "html[lang]", "lang")
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty()),
        robots_meta: extract_robots_meta(&document),
        canonical: extract_canonical(&document, document_url),
        links: extract_links(&document, document_url),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_attr<'a>(document: &'a Html, css: &str, attr: &str) -> Option<&'a str> {
    let selector = selector(css)?;
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr(attr))
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = selector("title")?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_robots_meta(document: &Html) -> Option<String> {
    let meta = selector("meta[name][content]")?;

    document
        .select(&meta)
        .find(|element| {
            element
                .value()
                .attr("name")
                .is_some_and(|name| name.trim().eq_ignore_ascii_case("robots"))
        })
        .and_then(|element| element.value().attr("content"))
        .map(str::to_ascii_lowercase)
}

fn has_rel(element: &ElementRef<'_>, value: &str) -> bool {
    element.value().attr("rel").is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case(value))
    })
}

fn extract_canonical(document: &Html, document_url: &Url) -> Option<Url> {
    let links = selector("link[rel][href]")?;

    document
        .select(&links)
        .find(|element| has_rel(element, "canonical"))
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| document_url.join(href.trim()).ok())
        .filter(is_http)
}

/// Extracts all followable links from the HTML document
///
/// **Exclude:**
/// - anchors whose own `rel` contains `nofollow`
/// - anchors with a non-English `hreflang`
/// - empty and fragment-only hrefs
/// - anything that does not resolve to an http(s) URL (`javascript:`, `mailto:`, ...)
fn extract_links(document: &Html, document_url: &Url) -> Vec<Url> {
    let Some(anchors) = selector("a[href]") else {
        return Vec::new();
    };
    let base_href = first_attr(document, "base[href]", "href")
        .map(str::trim)
        .filter(|href| !href.is_empty());

    let mut links = Vec::new();
    for element in document.select(&anchors) {
        if has_rel(&element, "nofollow") {
            continue;
        }

        if let Some(hreflang) = element.value().attr("hreflang") {
            if !hreflang.trim().is_empty() && !is_english(hreflang) {
                continue;
            }
        }

        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        if let Some(url) = resolve_href(document_url, base_href, href).filter(is_http) {
            links.push(url);
        }
    }

    links
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
