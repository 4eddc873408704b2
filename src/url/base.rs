use url::Url;

/// Resolves an anchor `href` against the document URL and an in-document `<base href>`
///
/// The base is first resolved against the document. An href that starts with `/` (or
/// carries its own scheme) overrides the base path entirely; any other relative href is
/// appended to the base's path before the final resolution, so dot segments in either
/// part are applied in order.
///
/// Returns `None` when either value cannot be resolved into a URL.
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::resolve_with_base;
/// use url::Url;
///
/// let page = Url::parse("http://example.com/base/").unwrap();
/// let url = resolve_with_base(&page, "./sub/", "x.html").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/base/sub/x.html");
/// ```
pub fn resolve_with_base(document: &Url, base_href: &str, href: &str) -> Option<Url> {
    let base = document.join(base_href.trim()).ok()?;
    let href = href.trim();

    if href.starts_with('/') || has_scheme(href) {
        return base.join(href).ok();
    }

    base.join(&join_paths(base.path(), href)).ok()
}

/// Resolves an href either against a `<base href>` (when present) or the document URL
pub fn resolve_href(document: &Url, base_href: Option<&str>, href: &str) -> Option<Url> {
    match base_href {
        Some(base) => resolve_with_base(document, base, href),
        None => document.join(href.trim()).ok(),
    }
}

fn join_paths(base_path: &str, href: &str) -> String {
    format!("{}/{}", base_path.trim_end_matches('/'), href)
}

fn has_scheme(href: &str) -> bool {
    match href.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}
