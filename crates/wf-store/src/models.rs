//! Domain model: the data this crate persists and operates on.
//!
//! Enum types follow the same Display/FromStr/dedicated-parse-error shape
//! throughout, so callers can round-trip any status through a string (CLI
//! args, SQL columns, JSON) without a separate mapping table.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One step of the fixed pipeline a workflow is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refine,
    Analyze,
    Plan,
    Execute,
    Done,
}

impl Phase {
    /// The next phase in the pipeline, or `None` at the terminal phase.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Refine => Some(Self::Analyze),
            Self::Analyze => Some(Self::Plan),
            Self::Plan => Some(Self::Execute),
            Self::Execute => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// The previous phase in the pipeline, or `None` at the first phase.
    pub fn prev(self) -> Option<Phase> {
        match self {
            Self::Refine => None,
            Self::Analyze => Some(Self::Refine),
            Self::Plan => Some(Self::Analyze),
            Self::Execute => Some(Self::Plan),
            Self::Done => Some(Self::Execute),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Refine => "refine",
            Self::Analyze => "analyze",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

impl FromStr for Phase {
    type Err = PhaseParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // "optimize" is accepted as a synonym for "refine": some source
            // material uses the other observed phase enumeration.
            "refine" | "optimize" => Ok(Self::Refine),
            "analyze" => Ok(Self::Analyze),
            "plan" => Ok(Self::Plan),
            "execute" => Ok(Self::Execute),
            "done" => Ok(Self::Done),
            other => Err(PhaseParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseParseError(pub String);

impl fmt::Display for PhaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid phase: {:?}", self.0)
    }
}

impl std::error::Error for PhaseParseError {}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Aborted,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkflowStatus {
    type Err = WorkflowStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            other => Err(WorkflowStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowStatusParseError(pub String);

impl fmt::Display for WorkflowStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid workflow status: {:?}", self.0)
    }
}

impl std::error::Error for WorkflowStatusParseError {}

// ---------------------------------------------------------------------------
// ArtifactType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Analysis,
    Plan,
    Code,
    Test,
    Documentation,
    Log,
    Consensus,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Analysis => "analysis",
            Self::Plan => "plan",
            Self::Code => "code",
            Self::Test => "test",
            Self::Documentation => "documentation",
            Self::Log => "log",
            Self::Consensus => "consensus",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analysis" => Ok(Self::Analysis),
            "plan" => Ok(Self::Plan),
            "code" => Ok(Self::Code),
            "test" => Ok(Self::Test),
            "documentation" => Ok(Self::Documentation),
            "log" => Ok(Self::Log),
            "consensus" => Ok(Self::Consensus),
            other => Err(ArtifactTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactTypeParseError(pub String);

impl fmt::Display for ArtifactTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact type: {:?}", self.0)
    }
}

impl std::error::Error for ArtifactTypeParseError {}

// ---------------------------------------------------------------------------
// AgentEventType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    Started,
    Thinking,
    ToolUse,
    Chunk,
    Progress,
    Completed,
    Error,
}

impl fmt::Display for AgentEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::Chunk => "chunk",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for AgentEventType {
    type Err = AgentEventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "thinking" => Ok(Self::Thinking),
            "tool_use" => Ok(Self::ToolUse),
            "chunk" => Ok(Self::Chunk),
            "progress" => Ok(Self::Progress),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(AgentEventTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentEventTypeParseError(pub String);

impl fmt::Display for AgentEventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid agent event type: {:?}", self.0)
    }
}

impl std::error::Error for AgentEventTypeParseError {}

// ---------------------------------------------------------------------------
// Execution mode / worktree mode / merge strategy
// ---------------------------------------------------------------------------

/// How a workflow's tasks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    MultiAgent,
    Interactive,
    SingleAgent,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MultiAgent => "multi_agent",
            Self::Interactive => "interactive",
            Self::SingleAgent => "single_agent",
        };
        f.write_str(s)
    }
}

impl FromStr for ExecutionMode {
    type Err = ExecutionModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi_agent" => Ok(Self::MultiAgent),
            "interactive" => Ok(Self::Interactive),
            "single_agent" => Ok(Self::SingleAgent),
            other => Err(ExecutionModeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionModeParseError(pub String);

impl fmt::Display for ExecutionModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid execution mode: {:?}", self.0)
    }
}

impl std::error::Error for ExecutionModeParseError {}

/// When the scheduler is allowed to run tasks inside the same worktree mode
/// concurrently. See `DESIGN.md` Open Question 3 for why this collapses the
/// source's two observed settings shapes into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeMode {
    Always,
    Parallel,
    Disabled,
}

impl fmt::Display for WorktreeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Always => "always",
            Self::Parallel => "parallel",
            Self::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

impl FromStr for WorktreeMode {
    type Err = WorktreeModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(Self::Always),
            "parallel" => Ok(Self::Parallel),
            "disabled" => Ok(Self::Disabled),
            other => Err(WorktreeModeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorktreeModeParseError(pub String);

impl fmt::Display for WorktreeModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worktree mode: {:?}", self.0)
    }
}

impl std::error::Error for WorktreeModeParseError {}

/// How a task branch is integrated into its workflow branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Sequential,
    Parallel,
    Rebase,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Rebase => "rebase",
        };
        f.write_str(s)
    }
}

impl FromStr for MergeStrategy {
    type Err = MergeStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "rebase" => Ok(Self::Rebase),
            other => Err(MergeStrategyParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeStrategyParseError(pub String);

impl fmt::Display for MergeStrategyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid merge strategy: {:?}", self.0)
    }
}

impl std::error::Error for MergeStrategyParseError {}

// ---------------------------------------------------------------------------
// Reasoning effort (see wf-core::reasoning for the normalization logic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Xhigh => "xhigh",
        };
        f.write_str(s)
    }
}

impl FromStr for ReasoningEffort {
    type Err = ReasoningEffortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "minimal" => Ok(Self::Minimal),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            // "max" is a cross-family alias for the highest supported level.
            "xhigh" | "max" => Ok(Self::Xhigh),
            other => Err(ReasoningEffortParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReasoningEffortParseError(pub String);

impl fmt::Display for ReasoningEffortParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reasoning effort: {:?}", self.0)
    }
}

impl std::error::Error for ReasoningEffortParseError {}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub phase: Phase,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub dependencies: Vec<Uuid>,
    pub retries: i32,
    pub max_retries: i32,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub outputs: Vec<Artifact>,
    pub worktree_path: Option<PathBuf>,
    pub last_commit: Option<String>,
    pub files_modified: Vec<String>,
    pub branch: Option<String>,
    pub resumable: bool,
    pub resume_hint: Option<String>,
    pub merge_pending: bool,
    pub merge_commit: Option<String>,
}

impl Task {
    pub fn new(phase: Phase, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
            name: name.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            agent: None,
            model: None,
            dependencies: Vec::new(),
            retries: 0,
            max_retries: 3,
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            started_at: None,
            completed_at: None,
            error: None,
            outputs: Vec::new(),
            worktree_path: None,
            last_commit: None,
            files_modified: Vec::new(),
            branch: None,
            resumable: false,
            resume_hint: None,
            merge_pending: false,
            merge_commit: None,
        }
    }

    /// Ready iff pending and every dependency has completed.
    pub fn is_ready(&self, all: &HashMap<Uuid, Task>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| {
                all.get(dep)
                    .map(|t| t.status == TaskStatus::Completed)
                    .unwrap_or(false)
            })
    }

    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retries < self.max_retries
    }

    /// Reset a failed, retryable task back to `pending`, bumping `retries`.
    pub fn reset(&mut self) {
        self.retries += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.error = None;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(error.into());
    }

    pub fn mark_skipped(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = TaskStatus::Skipped;
        self.completed_at = Some(now);
        self.error = Some(error.into());
    }
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub task_id: Option<Uuid>,
    pub phase: Phase,
    pub path: Option<PathBuf>,
    pub content: Option<String>,
    pub metadata: serde_json::Value,
    pub size: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Error building an artifact: neither `content` nor `path` was given.
#[derive(Debug, Clone)]
pub struct ArtifactContentRequiredError;

impl fmt::Display for ArtifactContentRequiredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("artifact must carry either `content` or `path`")
    }
}

impl std::error::Error for ArtifactContentRequiredError {}

impl Artifact {
    pub fn new(
        artifact_type: ArtifactType,
        phase: Phase,
        task_id: Option<Uuid>,
        content: Option<String>,
        path: Option<PathBuf>,
    ) -> Result<Self, ArtifactContentRequiredError> {
        if content.as_ref().map(String::is_empty).unwrap_or(true)
            && path.is_none()
        {
            return Err(ArtifactContentRequiredError);
        }
        let size = content.as_ref().map(|c| c.len() as i64).unwrap_or(0);
        let checksum = crate::checksum::hex_digest(content.as_deref().unwrap_or("").as_bytes());
        Ok(Self {
            id: Uuid::new_v4(),
            artifact_type,
            task_id,
            phase,
            path,
            content,
            metadata: serde_json::Value::Null,
            size,
            checksum,
            created_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Blueprint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleAgentConfig {
    pub agent: String,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub enabled: bool,
    pub agent: String,
    pub threshold: f64,
    #[serde(default)]
    pub per_phase_thresholds: HashMap<Phase, f64>,
    pub min_rounds: u32,
    pub max_rounds: u32,
    pub warning_threshold: f64,
    pub stagnation_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            agent: "moderator".to_owned(),
            threshold: 0.8,
            per_phase_thresholds: HashMap::new(),
            min_rounds: 1,
            max_rounds: 5,
            warning_threshold: 0.5,
            stagnation_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    pub enabled: bool,
    pub agent: Option<String>,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub execution_mode: ExecutionMode,
    pub single_agent: Option<SingleAgentConfig>,
    #[serde(default)]
    pub phase_timeouts: HashMap<Phase, i64>,
    pub consensus: ConsensusConfig,
    pub refiner: RefinerConfig,
    pub synthesizer: Option<String>,
    pub plan_synthesizer: Option<String>,
    pub max_retries: i32,
    pub timeout: i64,
    pub dry_run: bool,
    pub worktree_mode: WorktreeMode,
    pub merge_strategy: MergeStrategy,
    pub base_branch: String,
    pub analyze_agents: Vec<String>,
}

impl Blueprint {
    /// `blueprint.phases.<phase>.timeout`, falling back to the global
    /// `blueprint.timeout` (Open Question 4).
    pub fn effective_phase_timeout(&self, phase: Phase) -> i64 {
        self.phase_timeouts.get(&phase).copied().unwrap_or(self.timeout)
    }

    /// Per-phase consensus threshold, falling back to the scalar threshold.
    pub fn threshold_for(&self, phase: Phase) -> f64 {
        self.consensus
            .per_phase_thresholds
            .get(&phase)
            .copied()
            .unwrap_or(self.consensus.threshold)
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::MultiAgent,
            single_agent: None,
            phase_timeouts: HashMap::new(),
            consensus: ConsensusConfig::default(),
            refiner: RefinerConfig::default(),
            synthesizer: None,
            plan_synthesizer: None,
            max_retries: 3,
            timeout: 3600,
            dry_run: false,
            worktree_mode: WorktreeMode::Parallel,
            merge_strategy: MergeStrategy::Sequential,
            base_branch: "main".to_owned(),
            analyze_agents: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow (in-memory aggregate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowMetrics {
    pub total_tokens_in: i64,
    pub total_tokens_out: i64,
    pub total_cost: f64,
    pub consensus_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub prompt: String,
    pub optimized_prompt: Option<String>,
    pub blueprint: Blueprint,
    pub tasks: HashMap<Uuid, Task>,
    pub task_order: Vec<Uuid>,
    pub current_phase: Phase,
    pub status: WorkflowStatus,
    pub metrics: WorkflowMetrics,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub agent_events: Vec<AgentEvent>,
}

impl Workflow {
    pub fn new(prompt: impl Into<String>, blueprint: Blueprint) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            optimized_prompt: None,
            blueprint,
            tasks: HashMap::new(),
            task_order: Vec::new(),
            current_phase: Phase::Refine,
            status: WorkflowStatus::Pending,
            metrics: WorkflowMetrics::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            agent_events: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.task_order.push(task.id);
        self.tasks.insert(task.id, task);
    }

    pub fn record_event(&mut self, event: AgentEvent) {
        self.agent_events.push(event);
    }

    /// Tasks whose dependencies are satisfied, in `task_order`.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.task_order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.is_ready(&self.tasks))
            .collect()
    }

    /// `true` once every task is terminal, or the remaining non-terminal
    /// tasks can never become ready (a dependency cycle).
    pub fn execute_phase_finished(&self) -> bool {
        let any_running = self.tasks.values().any(|t| t.status == TaskStatus::Running);
        if any_running {
            return false;
        }
        let all_terminal = self.tasks.values().all(|t| t.status.is_terminal());
        if all_terminal {
            return true;
        }
        // Remaining non-terminal tasks: none can ever become ready.
        self.ready_tasks().is_empty()
    }

    /// Non-terminal tasks that can never run because of a dependency cycle.
    pub fn has_dag_cycle(&self) -> bool {
        !self.tasks.values().any(|t| t.status == TaskStatus::Running)
            && self.tasks.values().any(|t| !t.status.is_terminal())
            && self.ready_tasks().is_empty()
    }

    /// Apply a user-scoped subset selection: expand `selected` by transitive
    /// dependency closure, mark every other pending task `skipped`.
    pub fn apply_task_selection(&mut self, selected: &std::collections::HashSet<Uuid>) {
        let mut effective: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
        let mut stack: Vec<Uuid> = selected.iter().copied().collect();
        while let Some(id) = stack.pop() {
            if !effective.insert(id) {
                continue;
            }
            if let Some(task) = self.tasks.get(&id) {
                for dep in &task.dependencies {
                    stack.push(*dep);
                }
            }
        }
        let now = Utc::now();
        for (id, task) in self.tasks.iter_mut() {
            if task.status == TaskStatus::Pending && !effective.contains(id) {
                task.mark_skipped(now, "skipped: not selected for this execution");
            }
        }
    }

    pub fn advance_phase(&mut self) -> Result<(), crate::error::DomainError> {
        match self.current_phase.next() {
            Some(next) => {
                self.current_phase = next;
                Ok(())
            }
            None => Err(crate::error::DomainError::new(
                crate::error::ErrorCategory::Validation,
                "PHASE_TERMINAL",
                "cannot advance past the execute phase",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    pub agent: String,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AgentEvent {
    pub fn new(event_type: AgentEventType, agent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            agent: agent.into(),
            timestamp: Utc::now(),
            message: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// Persisted shape: WorkflowDefinition + WorkflowRun -> WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub prompt: String,
    pub optimized_prompt: Option<String>,
    pub blueprint: Blueprint,
    pub created_at: DateTime<Utc>,
}

/// Kanban-board placement hints carried alongside run state. The core does
/// not interpret these; a UI layer renders them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KanbanFields {
    pub column: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseCheckpoint {
    pub phase: Phase,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub status: WorkflowStatus,
    pub current_phase: Phase,
    pub tasks: HashMap<Uuid, Task>,
    pub task_order: Vec<Uuid>,
    pub agent_events: Vec<AgentEvent>,
    pub metrics: WorkflowMetrics,
    pub checkpoints: Vec<PhaseCheckpoint>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub resume_count: i32,
    pub git_branch: Option<String>,
    #[serde(default)]
    pub kanban: KanbanFields,
}

/// The current schema version this crate writes. Loaders encountering a
/// lower `version` must explicitly upgrade (see `wf-store::upgrade`);
/// anything higher fails loudly rather than silently truncating fields.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub version: i64,
    pub checksum: String,
    pub definition: WorkflowDefinition,
    pub run: WorkflowRun,
}

impl WorkflowState {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        let definition = WorkflowDefinition {
            id: workflow.id,
            prompt: workflow.prompt.clone(),
            optimized_prompt: workflow.optimized_prompt.clone(),
            blueprint: workflow.blueprint.clone(),
            created_at: workflow.created_at,
        };
        let run = WorkflowRun {
            status: workflow.status,
            current_phase: workflow.current_phase,
            tasks: workflow.tasks.clone(),
            task_order: workflow.task_order.clone(),
            agent_events: workflow.agent_events.clone(),
            metrics: workflow.metrics.clone(),
            checkpoints: Vec::new(),
            started_at: workflow.started_at,
            completed_at: workflow.completed_at,
            error: workflow.error.clone(),
            heartbeat_at: None,
            resume_count: 0,
            git_branch: None,
            kanban: KanbanFields::default(),
        };
        let mut state = Self {
            version: CURRENT_SCHEMA_VERSION,
            checksum: String::new(),
            definition,
            run,
        };
        state.checksum = state.compute_checksum();
        state
    }

    pub fn to_workflow(&self) -> Workflow {
        Workflow {
            id: self.definition.id,
            prompt: self.definition.prompt.clone(),
            optimized_prompt: self.definition.optimized_prompt.clone(),
            blueprint: self.definition.blueprint.clone(),
            tasks: self.run.tasks.clone(),
            task_order: self.run.task_order.clone(),
            current_phase: self.run.current_phase,
            status: self.run.status,
            metrics: self.run.metrics.clone(),
            created_at: self.definition.created_at,
            started_at: self.run.started_at,
            completed_at: self.run.completed_at,
            error: self.run.error.clone(),
            agent_events: self.run.agent_events.clone(),
        }
    }

    /// Checksum of the payload body, excluding the checksum field itself.
    pub fn compute_checksum(&self) -> String {
        let payload = serde_json::json!({
            "version": self.version,
            "definition": self.definition,
            "run": self.run,
        });
        let bytes = serde_json::to_vec(&payload).expect("WorkflowState always serializes");
        crate::checksum::hex_digest(&bytes)
    }

    pub fn checksum_is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub prompt: String,
    pub status: WorkflowStatus,
    pub current_phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningWorkflowRecord {
    pub workflow_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub lock_holder_pid: i64,
    pub lock_holder_host: String,
    pub heartbeat_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_roundtrip() {
        let variants = [
            Phase::Refine,
            Phase::Analyze,
            Phase::Plan,
            Phase::Execute,
            Phase::Done,
        ];
        for v in &variants {
            let parsed: Phase = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn phase_optimize_synonym() {
        assert_eq!("optimize".parse::<Phase>().unwrap(), Phase::Refine);
    }

    #[test]
    fn phase_invalid() {
        assert!("bogus".parse::<Phase>().is_err());
    }

    #[test]
    fn phase_next_prev_total_except_ends() {
        assert_eq!(Phase::Refine.prev(), None);
        assert_eq!(Phase::Done.next(), None);
        assert_eq!(Phase::Refine.next(), Some(Phase::Analyze));
        assert_eq!(Phase::Execute.next(), Some(Phase::Done));
    }

    #[test]
    fn task_status_roundtrip() {
        for v in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Skipped,
        ] {
            assert_eq!(v.to_string().parse::<TaskStatus>().unwrap(), v);
        }
    }

    #[test]
    fn workflow_status_roundtrip() {
        for v in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Aborted,
        ] {
            assert_eq!(v.to_string().parse::<WorkflowStatus>().unwrap(), v);
        }
    }

    #[test]
    fn reasoning_effort_total_order() {
        assert!(ReasoningEffort::None < ReasoningEffort::Minimal);
        assert!(ReasoningEffort::Minimal < ReasoningEffort::Low);
        assert!(ReasoningEffort::High < ReasoningEffort::Xhigh);
    }

    #[test]
    fn reasoning_effort_max_alias() {
        assert_eq!("max".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::Xhigh);
    }

    #[test]
    fn task_is_ready_requires_all_deps_completed() {
        let mut all = HashMap::new();
        let dep = Task::new(Phase::Execute, "dep", "");
        let dep_id = dep.id;
        all.insert(dep_id, dep);
        let mut t = Task::new(Phase::Execute, "t", "");
        t.dependencies.push(dep_id);
        all.insert(t.id, t.clone());

        assert!(!t.is_ready(&all));
        all.get_mut(&dep_id).unwrap().status = TaskStatus::Completed;
        assert!(t.is_ready(&all));
    }

    #[test]
    fn task_can_retry_respects_max_retries() {
        let mut t = Task::new(Phase::Execute, "t", "");
        t.status = TaskStatus::Failed;
        t.max_retries = 1;
        assert!(t.can_retry());
        t.retries = 1;
        assert!(!t.can_retry());
    }

    #[test]
    fn artifact_requires_content_or_path() {
        let err = Artifact::new(ArtifactType::Log, Phase::Execute, None, None, None);
        assert!(err.is_err());
        let ok = Artifact::new(
            ArtifactType::Log,
            Phase::Execute,
            None,
            Some("hello".to_owned()),
            None,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn apply_task_selection_closure() {
        let mut wf = Workflow::new("p", Blueprint::default());
        let a = Task::new(Phase::Execute, "a", "");
        let a_id = a.id;
        let mut b = Task::new(Phase::Execute, "b", "");
        b.dependencies.push(a_id);
        let b_id = b.id;
        let c = Task::new(Phase::Execute, "c", "");
        let c_id = c.id;
        wf.add_task(a);
        wf.add_task(b);
        wf.add_task(c);

        let selected = std::collections::HashSet::from([b_id]);
        wf.apply_task_selection(&selected);

        assert_eq!(wf.tasks[&a_id].status, TaskStatus::Pending);
        assert_eq!(wf.tasks[&b_id].status, TaskStatus::Pending);
        assert_eq!(wf.tasks[&c_id].status, TaskStatus::Skipped);
        assert_eq!(
            wf.tasks[&c_id].error.as_deref(),
            Some("skipped: not selected for this execution")
        );
    }

    #[test]
    fn workflow_state_checksum_stable_roundtrip() {
        let wf = Workflow::new("hello", Blueprint::default());
        let state = WorkflowState::from_workflow(&wf);
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.checksum, state.checksum);
        assert!(back.checksum_is_valid());
        assert_eq!(back.definition.id, state.definition.id);
    }
}
