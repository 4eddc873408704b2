//! URL context: the unit of work that crosses every queue boundary
//!
//! A [`UrlContext`] pairs the URL exactly as discovered with its normalized form and,
//! for discovered links, the referring page. It is rebuilt from its wire record at every
//! hop, so nothing holds on to one for longer than a single processing step.

use crate::url::normalize::normalize_parsed;
use crate::{UrlError, UrlResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use url::Url;

/// Separates the two base64 segments of a wire record. Never produced by base64.
pub const RECORD_DELIMITER: char = ':';

const ROBOTS_TXT_PATH: &str = "/robots.txt";

/// A discovered URL together with its canonical form and referrer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlContext {
    url: Url,
    normalized_url: Url,
    source_url: Option<Url>,
    normalized_source_url: Option<Url>,
}

impl UrlContext {
    /// Parses and normalizes a raw URL string
    ///
    /// # Errors
    ///
    /// Fails with a `UrlError` if the URL is malformed, not HTTP(S), or has no host.
    pub fn parse(raw: &str, source: Option<&Url>) -> UrlResult<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
        Self::from_url(url, source.cloned())
    }

    /// Builds a context from an already parsed URL
    ///
    /// A source that cannot be normalized is dropped rather than failing the target.
    pub fn from_url(url: Url, source: Option<Url>) -> UrlResult<Self> {
        let normalized_url = normalize_parsed(url.clone())?;

        let (source_url, normalized_source_url) = match source {
            Some(src) => match normalize_parsed(src.clone()) {
                Ok(normalized) => (Some(src), Some(normalized)),
                Err(e) => {
                    tracing::debug!("Dropping unusable source URL {}: {}", src, e);
                    (None, None)
                }
            },
            None => (None, None),
        };

        Ok(Self {
            url,
            normalized_url,
            source_url,
            normalized_source_url,
        })
    }

    /// The URL exactly as discovered; this is what gets fetched
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn normalized_url(&self) -> &Url {
        &self.normalized_url
    }

    /// The referring page, if any
    pub fn source_url(&self) -> Option<&Url> {
        self.source_url.as_ref()
    }

    pub fn normalized_source_url(&self) -> Option<&Url> {
        self.normalized_source_url.as_ref()
    }

    /// Politeness and routing key: normalized host plus any non-default port
    pub fn host_key(&self) -> String {
        let host = self.normalized_url.host_str().unwrap_or_default();
        match self.normalized_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Stable content hash of the normalized URL, used as the visited-record key
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_url.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True if the normalized path is `/robots.txt` (case-insensitive)
    pub fn is_robots_url(&self) -> bool {
        self.normalized_url
            .path()
            .eq_ignore_ascii_case(ROBOTS_TXT_PATH)
    }

    /// Context for this host's robots.txt, keeping the current source chain
    pub fn robots_context(&self) -> UrlResult<Self> {
        let robots_url = self
            .normalized_url
            .join(ROBOTS_TXT_PATH)
            .map_err(|e| UrlError::Parse(e.to_string()))?;

        Ok(Self {
            url: robots_url.clone(),
            normalized_url: robots_url,
            source_url: self.source_url.clone(),
            normalized_source_url: self.normalized_source_url.clone(),
        })
    }

    /// True if both contexts name the same resource
    pub fn same_resource(&self, other: &UrlContext) -> bool {
        self.normalized_url.as_str() == other.normalized_url.as_str()
    }

    /// Encodes `(url, source)` as `base64(url):base64(source-or-empty)`
    pub fn serialize(&self) -> String {
        let source = self.source_url.as_ref().map(Url::as_str).unwrap_or("");
        format!(
            "{}{}{}",
            STANDARD.encode(self.url.as_str()),
            RECORD_DELIMITER,
            STANDARD.encode(source)
        )
    }

    /// Decodes a wire record produced by [`UrlContext::serialize`]
    ///
    /// # Errors
    ///
    /// Returns `UrlError::Decode` for a record that is structurally malformed, is not
    /// valid base64/UTF-8, or whose target URL cannot be normalized. Such a record is
    /// unrecoverable and callers drop it.
    pub fn deserialize(record: &str) -> UrlResult<Self> {
        let mut parts = record.split(RECORD_DELIMITER);
        let (target, source) = match (parts.next(), parts.next(), parts.next()) {
            (Some(target), Some(source), None) if !target.is_empty() => (target, source),
            _ => {
                return Err(UrlError::Decode(format!(
                    "expected two '{}'-separated segments",
                    RECORD_DELIMITER
                )))
            }
        };

        let target = decode_segment(target)?;
        let source = decode_segment(source)?;

        let url = Url::parse(&target)
            .map_err(|e| UrlError::Decode(format!("bad target URL '{}': {}", target, e)))?;

        let source = if source.is_empty() {
            None
        } else {
            match Url::parse(&source) {
                Ok(src) => Some(src),
                Err(e) => {
                    tracing::warn!("Ignoring unparsable source '{}': {}", source, e);
                    None
                }
            }
        };

        Self::from_url(url, source).map_err(|e| UrlError::Decode(e.to_string()))
    }
}

fn decode_segment(segment: &str) -> UrlResult<String> {
    let bytes = STANDARD
        .decode(segment)
        .map_err(|e| UrlError::Decode(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| UrlError::Decode(format!("invalid UTF-8: {}", e)))
}
