//! Orchestration driver: the state machine that advances a session.
//!
//! A session moves through the phases in [`Phase`] under the driver's
//! control. Each call to [`Driver::run`] or [`Driver::resume`] advances the
//! session until it either pauses at a checkpoint or reaches a terminal
//! phase. A pause is a return: the checkpoint is persisted and the call ends,
//! so no thread ever waits on a human.
//!
//! ```text
//! Planning -> Scheduling <-> Running
//!                 |             |
//!                 +--> Gating <-+
//!                       | -> Checkpointing -> (return) -> Resuming -> Scheduling | Aborted
//!                       | -> Scheduling
//!                       | -> Finalizing -> Finalized
//! ```
//!
//! A stage of Scheduling/Running ends at Gating when nothing is eligible,
//! when the plan's `checkpoint_after` task has just completed, or when a task
//! in the stage failed.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::{
    build_options, checkpoint_reason, Checkpoint, CheckpointContext, CheckpointId,
    CheckpointManager, CheckpointOption, CheckpointResponse, CheckpointStore, MemoryStore,
    OptionAdvisor, ResumeAction,
};
use crate::config::Config;
use crate::core::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::gate::{Analyzer, Conflict, ConsistencyGate, GateLimits};
use crate::orchestration::planner::{plan_or_fallback, FallbackSources, Planner};
use crate::orchestration::resolver;
use crate::orchestration::runner::{RetrievalContext, Retriever, RetrieverRegistry, TaskRunner};
use crate::orchestration::synthesis::{synthesize_or_fallback, Report, Synthesizer};
use crate::session::Session;
use crate::workflow::Phase;

/// Default cap on advisor-proposed checkpoint options.
pub const DEFAULT_MAX_OPTIONS: usize = 4;

/// How eligible tasks are handed to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionMode {
    /// One task at a time in resolver order.
    #[default]
    Sequential,
    /// Up to `max_parallel` independent tasks at once.
    Batch { max_parallel: usize },
}

impl ExecutionMode {
    fn batch_size(self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Batch { max_parallel } => max_parallel.max(1),
        }
    }
}

/// Result of one driver invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Waiting on a response to this checkpoint.
    Paused(Checkpoint),
    Finalized(Report),
    Aborted,
}

/// Why a Scheduling/Running stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageEnd {
    Exhausted,
    CheckpointTask,
    TaskFailed,
}

pub struct Driver {
    planner: Option<Arc<dyn Planner>>,
    runner: TaskRunner,
    gate: ConsistencyGate,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    advisor: Option<Arc<dyn OptionAdvisor>>,
    checkpoints: CheckpointManager,
    mode: ExecutionMode,
    fallback_sources: FallbackSources,
    max_options: usize,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("planner", &self.planner.is_some())
            .field("runner", &self.runner)
            .field("gate", &self.gate)
            .field("synthesizer", &self.synthesizer.is_some())
            .field("advisor", &self.advisor.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Driver {
    pub fn builder() -> DriverBuilder {
        DriverBuilder::default()
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Create a session for `goal`, in Planning.
    pub fn start(&self, goal: &str) -> Session {
        let session = Session::new(goal);
        tracing::info!(session = %session.id.short(), goal, "session started");
        session
    }

    /// Advance until the session pauses or ends.
    ///
    /// # Errors
    /// - `SessionTerminal` if the session is Finalized or Aborted
    /// - `AwaitingResponse` if a checkpoint is pending; use [`resume`](Self::resume)
    pub async fn run(&self, session: &mut Session) -> Result<Outcome> {
        if session.is_terminal() {
            return Err(Error::SessionTerminal(session.id.to_string()));
        }
        if session.is_awaiting_response() {
            return Err(Error::AwaitingResponse(session.id.to_string()));
        }
        self.advance(session, false).await
    }

    /// Apply a checkpoint response, then continue as [`run`](Self::run).
    ///
    /// An unknown action id leaves the session untouched.
    pub async fn resume(
        &self,
        session: &mut Session,
        response: CheckpointResponse,
    ) -> Result<Outcome> {
        if session.is_terminal() {
            return Err(Error::SessionTerminal(session.id.to_string()));
        }
        let checkpoint = session
            .pending_checkpoint
            .clone()
            .ok_or_else(|| Error::NoPendingCheckpoint(session.id.to_string()))?;
        let option = checkpoint
            .option(&response.action_id)
            .cloned()
            .ok_or_else(|| Error::UnknownAction {
                checkpoint: checkpoint.id.to_string(),
                action: response.action_id.clone(),
            })?;

        if !session.phase().can_transition(Phase::Resuming) {
            return Err(Error::InvalidPhaseTransition {
                from: session.phase().to_string(),
                to: Phase::Resuming.to_string(),
            });
        }
        self.checkpoints
            .record_response(&checkpoint.id, response.clone())
            .await?;

        session.transition(Phase::Resuming)?;
        tracing::info!(
            session = %session.id.short(),
            checkpoint = %checkpoint.id,
            action = %option.action_id,
            "resuming"
        );
        if response.feedback.is_some() {
            session.last_feedback = response.feedback;
        }
        session.acknowledge(&checkpoint.conflicts);
        session.pending_checkpoint = None;

        match option.action {
            ResumeAction::Continue => {}
            ResumeAction::NarrowScope { overrides } => {
                tracing::info!(keys = overrides.len(), "narrowing scope");
                session.narrow_scope(&overrides);
            }
            ResumeAction::SkipSource { source } => {
                let skipped = session.skip_source(&source)?;
                tracing::info!(%source, skipped = skipped.len(), "skipping source");
            }
            ResumeAction::StopAndExport => {
                let skipped = session.skip_open()?;
                tracing::info!(skipped = skipped.len(), "stopping for export");
                session.export_requested = true;
            }
            ResumeAction::Abort => {
                session.transition(Phase::Aborted)?;
                tracing::info!(session = %session.id.short(), "session aborted");
                self.checkpoints.save_session(session).await?;
                return Ok(Outcome::Aborted);
            }
        }

        session.transition(Phase::Scheduling)?;
        self.checkpoints.save_session(session).await?;
        self.advance(session, false).await
    }

    /// Resume after a process restart: rebuild the session from the stored
    /// checkpoint and apply `response`.
    ///
    /// # Errors
    /// - `CheckpointNotFound` if the store has no such checkpoint
    /// - `NoPendingCheckpoint` if the stored session already moved past it
    /// - `CheckpointAnswered` if a different action was recorded for it
    pub async fn resume_from_store(
        &self,
        checkpoint_id: &CheckpointId,
        response: CheckpointResponse,
    ) -> Result<(Session, Outcome)> {
        let checkpoint = self
            .checkpoints
            .load(checkpoint_id)
            .await?
            .ok_or_else(|| Error::CheckpointNotFound(checkpoint_id.to_string()))?;

        let session_id = checkpoint.session_id();
        if let Some(stored) = self.checkpoints.load_session(session_id).await? {
            let pending = stored.pending_checkpoint.as_ref().map(|c| &c.id);
            if pending != Some(checkpoint_id) {
                return Err(Error::NoPendingCheckpoint(session_id.to_string()));
            }
        }

        let mut session = Session::from_checkpoint(&checkpoint);
        let outcome = self.resume(&mut session, response).await?;
        Ok((session, outcome))
    }

    /// Apply the response already recorded on a stored checkpoint, as left
    /// by `quest respond`.
    ///
    /// # Errors
    /// - `NoRecordedResponse` if the checkpoint has not been answered
    /// - anything [`resume_from_store`](Self::resume_from_store) returns
    pub async fn resume_recorded(
        &self,
        checkpoint_id: &CheckpointId,
    ) -> Result<(Session, Outcome)> {
        let response = self
            .checkpoints
            .load(checkpoint_id)
            .await?
            .ok_or_else(|| Error::CheckpointNotFound(checkpoint_id.to_string()))?
            .response
            .ok_or_else(|| Error::NoRecordedResponse(checkpoint_id.to_string()))?;
        tracing::info!(
            checkpoint = %checkpoint_id,
            action = %response.action_id,
            "applying recorded response"
        );
        self.resume_from_store(checkpoint_id, response).await
    }

    async fn advance(&self, session: &mut Session, mut forced: bool) -> Result<Outcome> {
        loop {
            match session.phase() {
                Phase::Planning => self.plan(session).await?,
                Phase::Scheduling => {
                    forced = self.run_stage(session).await? == StageEnd::CheckpointTask;
                }
                Phase::Running => self.recover_stage(session)?,
                Phase::Gating => {
                    if let Some(checkpoint) = self.gate(session, forced).await? {
                        return Ok(Outcome::Paused(checkpoint));
                    }
                    forced = false;
                }
                Phase::Finalizing => return self.finalize(session).await,
                Phase::Checkpointing | Phase::Resuming => {
                    return Err(Error::NoPendingCheckpoint(session.id.to_string()));
                }
                Phase::Finalized | Phase::Aborted => {
                    return Err(Error::SessionTerminal(session.id.to_string()));
                }
            }
        }
    }

    /// A session only sits in Running when a stage was cut short. Tasks left
    /// Ready or Running would never be picked up again.
    fn recover_stage(&self, session: &mut Session) -> Result<()> {
        let in_flight: Vec<&str> = session
            .plan
            .as_ref()
            .map(|plan| {
                plan.tasks()
                    .iter()
                    .filter(|t| matches!(t.status, TaskStatus::Ready | TaskStatus::Running))
                    .map(|t| t.id.as_str())
                    .collect()
            })
            .unwrap_or_default();
        if !in_flight.is_empty() {
            return Err(Error::InterruptedStage {
                session: session.id.to_string(),
                tasks: in_flight.join(", "),
            });
        }
        session.transition(Phase::Scheduling)
    }

    async fn plan(&self, session: &mut Session) -> Result<()> {
        let (plan, origin) = plan_or_fallback(
            self.planner.as_deref(),
            &session.goal,
            &self.fallback_sources,
        )
        .await?;
        tracing::info!(
            session = %session.id.short(),
            tasks = plan.len(),
            ?origin,
            "plan ready"
        );
        session.plan = Some(plan);
        session.transition(Phase::Scheduling)?;
        self.checkpoints.save_session(session).await
    }

    /// Run eligible tasks until the stage ends. Leaves the session in Gating.
    async fn run_stage(&self, session: &mut Session) -> Result<StageEnd> {
        let checkpoint_after: Option<TaskId> = session
            .plan
            .as_ref()
            .and_then(|p| p.checkpoint_after().cloned());

        loop {
            let batch: Vec<Task> = match session.plan.as_ref() {
                Some(plan) => resolver::ready_batch(plan.tasks(), self.mode.batch_size())
                    .into_iter()
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            if batch.is_empty() {
                session.transition(Phase::Gating)?;
                return Ok(StageEnd::Exhausted);
            }

            let mut ready = Vec::with_capacity(batch.len());
            for mut task in batch {
                task.mark_ready()?;
                if let Some(plan) = session.plan.as_mut() {
                    plan.replace_task(task.clone())?;
                }
                ready.push(task);
            }

            session.transition(Phase::Running)?;
            let finished = self.execute(ready, session).await?;

            let mut end = None;
            for task in finished {
                match task.status {
                    TaskStatus::Completed => {
                        let result = task.result.clone().unwrap_or(Value::Null);
                        session.findings.record(task.id.clone(), result)?;
                        if checkpoint_after.as_ref() == Some(&task.id) {
                            end = Some(StageEnd::CheckpointTask);
                        }
                    }
                    TaskStatus::Failed => {
                        end = end.or(Some(StageEnd::TaskFailed));
                    }
                    _ => {}
                }
                if let Some(plan) = session.plan.as_mut() {
                    plan.replace_task(task)?;
                }
            }

            if let Some(end) = end {
                session.transition(Phase::Gating)?;
                return Ok(end);
            }
            session.transition(Phase::Scheduling)?;
        }
    }

    /// Run a batch concurrently. Results come back in batch order.
    async fn execute(&self, tasks: Vec<Task>, session: &Session) -> Result<Vec<Task>> {
        let ctx = RetrievalContext {
            goal: &session.goal,
            findings: &session.findings,
        };
        let scope = &session.scope;
        join_all(tasks.into_iter().map(|task| self.runner.run(task, scope, &ctx)))
            .await
            .into_iter()
            .collect()
    }

    /// Evaluate the gate and either pause, go back to Scheduling, or move on
    /// to Finalizing.
    async fn gate(&self, session: &mut Session, forced: bool) -> Result<Option<Checkpoint>> {
        if session.export_requested {
            session.transition(Phase::Finalizing)?;
            return Ok(None);
        }

        let Some(plan) = session.plan.as_ref() else {
            session.transition(Phase::Finalizing)?;
            return Ok(None);
        };

        let verdict = self.gate.evaluate(plan, &session.findings).await;
        let exhausted = plan.is_exhausted();
        session.record_conflicts(&verdict.conflicts);
        let fresh: Vec<Conflict> = session
            .unacknowledged(&verdict.conflicts)
            .into_iter()
            .cloned()
            .collect();
        tracing::info!(
            session = %session.id.short(),
            source = ?verdict.source,
            conflicts = verdict.conflicts.len(),
            new = fresh.len(),
            forced,
            "gate evaluated"
        );

        // Conflicts seen at an earlier checkpoint do not pause again, but a
        // review request with no conflicts attached always does.
        let review =
            verdict.requires_review && (verdict.conflicts.is_empty() || !fresh.is_empty());
        if forced || review {
            session.transition(Phase::Checkpointing)?;
            return self.checkpoint(session, fresh).await.map(Some);
        }

        if exhausted {
            session.transition(Phase::Finalizing)?;
        } else {
            session.transition(Phase::Scheduling)?;
        }
        Ok(None)
    }

    async fn checkpoint(&self, session: &mut Session, conflicts: Vec<Conflict>) -> Result<Checkpoint> {
        let options = match session.plan.as_ref() {
            Some(plan) => {
                let ctx = CheckpointContext {
                    goal: &session.goal,
                    plan,
                    findings: &session.findings,
                    conflicts: &conflicts,
                };
                build_options(self.advisor.as_deref(), &ctx, self.max_options).await
            }
            None => vec![CheckpointOption::abort()],
        };

        let checkpoint = Checkpoint::new(
            checkpoint_reason(&conflicts),
            conflicts,
            options,
            session.snapshot(),
        );
        self.checkpoints.persist(session.id, &checkpoint).await?;
        session.pending_checkpoint = Some(checkpoint.clone());
        self.checkpoints.save_session(session).await?;
        tracing::info!(
            session = %session.id.short(),
            checkpoint = %checkpoint.id,
            reason = %checkpoint.reason,
            "paused at checkpoint"
        );
        Ok(checkpoint)
    }

    async fn finalize(&self, session: &mut Session) -> Result<Outcome> {
        let report = synthesize_or_fallback(
            self.synthesizer.as_deref(),
            &session.goal,
            session.plan.as_ref(),
            &session.findings,
            session.last_feedback.as_deref(),
        )
        .await;
        session.report = Some(report.clone());
        session.transition(Phase::Finalized)?;
        tracing::info!(
            session = %session.id.short(),
            degraded = report.degraded,
            "session finalized"
        );
        self.checkpoints.save_session(session).await?;
        Ok(Outcome::Finalized(report))
    }
}

/// Wires collaborators into a [`Driver`]. Everything is optional except the
/// retrievers a plan actually needs; a missing store defaults to
/// [`MemoryStore`].
#[derive(Default)]
pub struct DriverBuilder {
    planner: Option<Arc<dyn Planner>>,
    registry: RetrieverRegistry,
    analyzer: Option<Arc<dyn Analyzer>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    advisor: Option<Arc<dyn OptionAdvisor>>,
    store: Option<Arc<dyn CheckpointStore>>,
    mode: ExecutionMode,
    fallback_sources: FallbackSources,
    limits: GateLimits,
    max_options: Option<usize>,
}

impl DriverBuilder {
    /// Take execution mode, fallback sources, gate limits and option cap
    /// from `config`.
    pub fn config(mut self, config: &Config) -> Self {
        self.mode = config.execution;
        self.fallback_sources = config.fallback_sources.clone();
        self.limits = config.gate;
        self.max_options = Some(config.max_options);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn retriever(mut self, source: &str, retriever: Arc<dyn Retriever>) -> Self {
        self.registry.register(source, retriever);
        self
    }

    pub fn registry(mut self, registry: RetrieverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn OptionAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn fallback_sources(mut self, sources: FallbackSources) -> Self {
        self.fallback_sources = sources;
        self
    }

    pub fn gate_limits(mut self, limits: GateLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_options(mut self, max: usize) -> Self {
        self.max_options = Some(max);
        self
    }

    pub fn build(self) -> Driver {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn CheckpointStore>);
        Driver {
            planner: self.planner,
            runner: TaskRunner::new(Arc::new(self.registry)),
            gate: ConsistencyGate::new(self.analyzer, self.limits),
            synthesizer: self.synthesizer,
            advisor: self.advisor,
            checkpoints: CheckpointManager::new(store),
            mode: self.mode,
            fallback_sources: self.fallback_sources,
            max_options: self.max_options.unwrap_or(DEFAULT_MAX_OPTIONS),
        }
    }
}
