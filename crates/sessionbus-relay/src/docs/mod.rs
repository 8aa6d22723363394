//! Repository documentation lookup, served as a protocol runtime.

mod cache;
mod github;
mod runtime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use cache::CachedDocs;
pub use github::GithubDocs;
pub use runtime::DocsRuntime;

/// Documentation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum DocsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream error ({status}) for {url}")]
    Upstream { status: u16, url: String },

    #[error("No documentation found for {0}")]
    NotFound(String),

    #[error("Invalid repository id: {0}")]
    InvalidRepo(String),

    #[error("Documentation cache unavailable: {0}")]
    Cache(#[from] StoreError),
}

/// One ranked excerpt returned by [`DocsBackend::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: usize,
    pub excerpt: String,
}

#[async_trait]
pub trait DocsBackend: Send + Sync {
    /// Full documentation text for `owner/repo`.
    async fn fetch_docs(&self, repo_id: &str) -> Result<String, DocsError>;

    /// Excerpts of the documentation matching `query`, best first.
    async fn search(&self, repo_id: &str, query: &str) -> Result<Vec<SearchHit>, DocsError>;
}

/// Maximum hits returned by a search.
pub const SEARCH_LIMIT: usize = 5;
const EXCERPT_CHARS: usize = 500;

/// Split `owner/repo`, rejecting anything that could escape the path.
pub fn parse_repo_id(repo_id: &str) -> Result<(&str, &str), DocsError> {
    let valid = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match repo_id.split_once('/') {
        Some((owner, repo)) if valid(owner) && valid(repo) => Ok((owner, repo)),
        _ => Err(DocsError::InvalidRepo(repo_id.to_string())),
    }
}

/// Rank blank-line separated paragraphs of `content` by query term hits.
pub fn rank_paragraphs(content: &str, query: &str, limit: usize) -> Vec<SearchHit> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|paragraph| {
            let lower = paragraph.to_lowercase();
            let score: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
            (score > 0).then(|| SearchHit {
                score,
                excerpt: paragraph.chars().take(EXCERPT_CHARS).collect(),
            })
        })
        .collect();
    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.truncate(limit);
    hits
}
