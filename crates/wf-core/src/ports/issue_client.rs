//! `IssueClient` / `GitHubClient` -- referenced only by interface. Concrete
//! issue tracker and GitHub/GitLab PR machinery lives outside this crate;
//! these traits exist so a driver extension point can depend on them
//! without pulling in an HTTP stack here.

use async_trait::async_trait;
use wf_store::DomainError;

#[derive(Debug, Clone)]
pub struct IssueRef {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait IssueClient: Send + Sync {
    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueRef, DomainError>;
    async fn close_issue(&self, issue: &IssueRef) -> Result<(), DomainError>;
}

#[derive(Debug, Clone)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[async_trait]
pub trait GitHubClient: Send + Sync {
    async fn open_pull_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequestRef, DomainError>;
}
