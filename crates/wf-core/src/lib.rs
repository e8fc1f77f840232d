//! Orchestration core: the consensus engine, task scheduler, git isolation
//! manager, reasoning-effort normalization, and the top-level phase driver
//! that ties them together over a `wf_store::SqliteStateManager`.

pub mod consensus;
pub mod driver;
pub mod git;
pub mod ports;
pub mod reasoning;
pub mod scheduler;

pub use driver::{PhaseDriver, PhaseDriverConfig};
pub use git::{MergeOutcome, MergeStrategy, WorkflowGitInfo, WorkflowWorktreeManager, WorktreeError};
pub use ports::{Agent, AgentRegistry, Capabilities, ExecuteOptions, NoopAgent, PhaseEnablement};
pub use scheduler::TaskScheduler;
