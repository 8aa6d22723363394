//! Documentation fetched from raw GitHub content.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use sessionbus_core::config::DocsConfig;
use tracing::debug;

use super::{DocsBackend, DocsError, SEARCH_LIMIT, SearchHit, parse_repo_id, rank_paragraphs};

/// Files tried in order; the first one present wins.
const DOC_FILES: [&str; 2] = ["llms.txt", "README.md"];

/// Reads `llms.txt`, falling back to `README.md`, from the default branch.
#[derive(Debug, Clone)]
pub struct GithubDocs {
    http: reqwest::Client,
    base_url: String,
}

impl GithubDocs {
    pub fn new(config: &DocsConfig) -> Result<Self, DocsError> {
        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .user_agent(concat!("sessionbus/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: config.raw_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn file_url(&self, owner: &str, repo: &str, file: &str) -> String {
        format!("{}/{owner}/{repo}/HEAD/{file}", self.base_url)
    }
}

#[async_trait]
impl DocsBackend for GithubDocs {
    async fn fetch_docs(&self, repo_id: &str) -> Result<String, DocsError> {
        let (owner, repo) = parse_repo_id(repo_id)?;
        for file in DOC_FILES {
            let url = self.file_url(owner, repo, file);
            let resp = self.http.get(&url).send().await?;
            match resp.status() {
                StatusCode::NOT_FOUND => {
                    debug!(repo_id, file, "Documentation file missing");
                }
                status if status.is_success() => {
                    debug!(repo_id, file, "Documentation fetched");
                    return Ok(resp.text().await?);
                }
                status => {
                    return Err(DocsError::Upstream {
                        status: status.as_u16(),
                        url,
                    });
                }
            }
        }
        Err(DocsError::NotFound(repo_id.to_string()))
    }

    async fn search(&self, repo_id: &str, query: &str) -> Result<Vec<SearchHit>, DocsError> {
        let content = self.fetch_docs(repo_id).await?;
        Ok(rank_paragraphs(&content, query, SEARCH_LIMIT))
    }
}
