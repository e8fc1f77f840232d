//! Abstract contracts the core consumes: `Agent`/`AgentRegistry`,
//! `GitClient`, `IssueClient`/`GitHubClient`. `WorkflowWorktreeManager`
//! lives in `crate::git` since this crate ships its concrete implementation
//! rather than treating it as a pluggable backend.

pub mod agent;
pub mod git_client;
pub mod issue_client;
pub mod registry;

pub use agent::{Agent, AgentEvent, AgentHandle, Capabilities, ExecuteOptions, NoopAgent, RateLimits};
pub use git_client::GitClient;
pub use issue_client::{GitHubClient, IssueClient, IssueRef, PullRequestRef};
pub use registry::{AgentRegistry, PhaseEnablement};
