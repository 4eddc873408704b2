use crate::UrlError;
use url::Url;

/// Normalizes a URL according to Sumi-Fleet's canonicalization rules
///
/// The normalized form is the URL's identity: it keys the visited records, picks the
/// shard, and names the per-host politeness state. It is never used for fetching.
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Force the `http` scheme (default port dropped accordingly)
/// 3. Lowercase the host and strip unnecessary dots (`example.com.` -> `example.com`)
/// 4. Normalize the path:
///    - Decode percent-escapes of unreserved characters, uppercase the rest
///    - Remove a trailing directory index (`index.html`, `default.asp`, ...)
///    - Remove dot segments and duplicate slashes
///    - Remove trailing slash (except for root /)
/// 5. Remove fragment
/// 6. Sort query parameters by key; drop an empty query
///
/// # Examples
///
/// ```
/// use sumi_fleet::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.COM//a/./b/index.html?z=1&a=2#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/b?a=2&z=1");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_parsed(url)
}

/// Normalizes an already parsed URL
pub fn normalize_parsed(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.scheme() == "https" {
        url.set_scheme("http")
            .map_err(|_| UrlError::Parse(format!("cannot force http scheme on {}", url)))?;
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?;
    let normalized_host = normalize_host(host);
    if normalized_host.is_empty() {
        return Err(UrlError::MissingHost);
    }
    if normalized_host != host {
        url.set_host(Some(&normalized_host))
            .map_err(|e| UrlError::Parse(format!("Failed to set host: {}", e)))?;
    }

    let path = normalize_path(&remove_directory_index(&normalize_escapes(url.path())));
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = sorted_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Lowercases a host and strips leading, trailing and repeated dots
fn normalize_host(host: &str) -> String {
    host.to_lowercase()
        .split('.')
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Decodes escapes of unreserved characters and uppercases the remaining ones
fn normalize_escapes(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &path[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                if value.is_ascii_alphanumeric() || matches!(value, b'-' | b'.' | b'_' | b'~') {
                    out.push(value as char);
                } else {
                    out.push('%');
                    out.push_str(&hex.to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

/// Removes a trailing `index.*` or `default.*` segment with a 1-4 character extension
fn remove_directory_index(path: &str) -> String {
    let (dir, last) = match path.rfind('/') {
        Some(pos) => path.split_at(pos + 1),
        None => ("", path),
    };

    let lower = last.to_ascii_lowercase();
    let is_index = ["index.", "default."].iter().any(|stem| {
        lower.strip_prefix(stem).is_some_and(|ext| {
            (1..=4).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
    });

    if is_index {
        dir.to_string()
    } else {
        path.to_string()
    }
}

/// Normalizes a URL path by removing dot segments, duplicate and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Returns query parameters stably sorted by key
fn sorted_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}
