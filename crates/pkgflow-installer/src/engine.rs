//! Sequential jobs with reverse-order compensation.
//!
//! A job owns its context and an ordered task list. Each `advance` runs
//! exactly one forward action, or while aborting exactly one compensation.
//! The engine itself touches nothing outside the context it owns.

use pkgflow_core::{ErrorCode, InstallError, InstallResult, InstallationKind};
use tracing::{debug, warn};

type Action<C> = Box<dyn FnMut(&mut C) -> InstallResult<()> + Send>;

pub struct Task<C> {
    name: &'static str,
    forward: Action<C>,
    compensation: Option<Action<C>>,
}

impl<C> Task<C> {
    pub fn new(
        name: &'static str,
        forward: impl FnMut(&mut C) -> InstallResult<()> + Send + 'static,
    ) -> Self {
        Self {
            name,
            forward: Box::new(forward),
            compensation: None,
        }
    }

    pub fn with_compensation(
        mut self,
        compensation: impl FnMut(&mut C) -> InstallResult<()> + Send + 'static,
    ) -> Self {
        self.compensation = Some(Box::new(compensation));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// The cursor carried by `Running`, `Paused` and `Aborting` is the index of
/// the next task to run forward, or while aborting the number of tasks whose
/// compensation may still be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running(usize),
    Paused(usize),
    Aborting(usize),
    Finished(JobOutcome),
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Finished(_))
    }

    pub fn wants_advance(self) -> bool {
        matches!(self, Self::Running(_) | Self::Aborting(_))
    }
}

pub trait JobContext: Send {
    fn subject(&self) -> &str;

    fn progress(&self) -> (u8, &'static str);

    /// Called once, after the last task or compensation ran.
    fn finish(&mut self, status: ErrorCode);
}

pub struct Job<C> {
    kind: InstallationKind,
    tasks: Vec<Task<C>>,
    state: JobState,
    context: C,
    failure: Option<InstallError>,
}

impl<C: JobContext> Job<C> {
    pub fn new(kind: InstallationKind, context: C, tasks: Vec<Task<C>>) -> Self {
        Self {
            kind,
            tasks,
            state: JobState::Running(0),
            context,
            failure: None,
        }
    }

    pub fn kind(&self) -> InstallationKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn into_context(self) -> C {
        self.context
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(Task::name).collect()
    }

    pub fn failure(&self) -> Option<&InstallError> {
        self.failure.as_ref()
    }

    pub fn status(&self) -> Option<ErrorCode> {
        match self.state {
            JobState::Finished(JobOutcome::Success) => Some(ErrorCode::Success),
            JobState::Finished(JobOutcome::Failure) => Some(
                self.failure
                    .as_ref()
                    .map(InstallError::code)
                    .unwrap_or(ErrorCode::FatalError),
            ),
            _ => None,
        }
    }

    pub fn advance(&mut self) -> JobState {
        self.state = match self.state {
            JobState::Running(cursor) => self.step_forward(cursor),
            JobState::Aborting(cursor) => self.step_back(cursor),
            other => other,
        };
        self.state
    }

    fn step_forward(&mut self, cursor: usize) -> JobState {
        if cursor >= self.tasks.len() {
            return JobState::Finished(JobOutcome::Success);
        }

        let len = self.tasks.len();
        let task = &mut self.tasks[cursor];
        debug!(kind = self.kind.as_str(), task = task.name, cursor, "running task");
        match (task.forward)(&mut self.context) {
            Ok(()) if cursor + 1 == len => JobState::Finished(JobOutcome::Success),
            Ok(()) => JobState::Running(cursor + 1),
            Err(err) => {
                warn!(
                    kind = self.kind.as_str(),
                    task = task.name,
                    code = %err.code(),
                    "task failed: {err}"
                );
                if self.failure.is_none() {
                    self.failure = Some(err);
                }
                JobState::Aborting(cursor)
            }
        }
    }

    fn step_back(&mut self, cursor: usize) -> JobState {
        if cursor == 0 {
            return JobState::Finished(JobOutcome::Failure);
        }

        let index = cursor - 1;
        let task = &mut self.tasks[index];
        if let Some(compensation) = task.compensation.as_mut() {
            debug!(kind = self.kind.as_str(), task = task.name, "running compensation");
            if let Err(err) = compensation(&mut self.context) {
                warn!(
                    kind = self.kind.as_str(),
                    task = task.name,
                    "compensation failed and was ignored: {err}"
                );
            }
        }

        if index == 0 {
            JobState::Finished(JobOutcome::Failure)
        } else {
            JobState::Aborting(index)
        }
    }

    pub fn pause(&mut self) -> bool {
        match self.state {
            JobState::Running(cursor) => {
                self.state = JobState::Paused(cursor);
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        match self.state {
            JobState::Paused(cursor) => {
                self.state = JobState::Running(cursor);
                true
            }
            _ => false,
        }
    }
}

pub trait RunnableJob: Send {
    fn kind(&self) -> InstallationKind;
    fn subject(&self) -> &str;
    fn state(&self) -> JobState;
    fn advance(&mut self) -> JobState;
    fn pause(&mut self) -> bool;
    fn resume(&mut self) -> bool;
    fn failure(&self) -> Option<&InstallError>;
    fn status(&self) -> Option<ErrorCode>;
    fn progress(&self) -> (u8, &'static str);
    fn on_finished(&mut self, status: ErrorCode);
}

impl<C: JobContext + 'static> RunnableJob for Job<C> {
    fn kind(&self) -> InstallationKind {
        Job::kind(self)
    }

    fn subject(&self) -> &str {
        self.context.subject()
    }

    fn state(&self) -> JobState {
        Job::state(self)
    }

    fn advance(&mut self) -> JobState {
        Job::advance(self)
    }

    fn pause(&mut self) -> bool {
        Job::pause(self)
    }

    fn resume(&mut self) -> bool {
        Job::resume(self)
    }

    fn failure(&self) -> Option<&InstallError> {
        Job::failure(self)
    }

    fn status(&self) -> Option<ErrorCode> {
        Job::status(self)
    }

    fn progress(&self) -> (u8, &'static str) {
        self.context.progress()
    }

    fn on_finished(&mut self, status: ErrorCode) {
        self.context.finish(status);
    }
}
