//! Units of work flowing between the coordinator and workers

use crate::url::UrlContext;
use crate::UrlResult;
use url::Url;

/// A job claimed by a worker, classified once when it is decoded
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Fetch and store a host's robots.txt
    Robots(UrlContext),
    /// Fetch, filter and index a page
    Content(UrlContext),
}

impl Job {
    pub fn from_context(ctx: UrlContext) -> Self {
        if ctx.is_robots_url() {
            Self::Robots(ctx)
        } else {
            Self::Content(ctx)
        }
    }

    /// Decodes a queue record into a job
    pub fn decode(record: &str) -> UrlResult<Self> {
        UrlContext::deserialize(record).map(Self::from_context)
    }

    pub fn context(&self) -> &UrlContext {
        match self {
            Self::Robots(ctx) | Self::Content(ctx) => ctx,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Robots(_) => "robots",
            Self::Content(_) => "content",
        }
    }
}

/// URLs discovered by a worker, bound for the global queue
#[derive(Debug, Clone, PartialEq)]
pub struct LinkBatch {
    /// Referrer recorded with every link in the batch
    pub source: Option<Url>,
    pub links: Vec<Url>,
}

impl LinkBatch {
    pub fn new(source: Option<Url>, links: Vec<Url>) -> Self {
        Self { source, links }
    }

    pub fn single(source: Option<Url>, link: Url) -> Self {
        Self::new(source, vec![link])
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
