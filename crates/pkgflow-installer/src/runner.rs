//! Cooperative single-job runner. One queued `Continue` advances the job by
//! one task; the runner re-posts itself until the job pauses or finishes.

use std::fmt;

use crossbeam_channel::{unbounded, Receiver, Sender};
use pkgflow_core::{ErrorCode, InstallationKind};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::engine::{JobState, RunnableJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(pub u64);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("installer is busy with job {0}")]
pub struct Busy(pub JobHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerSignal {
    Continue(JobHandle),
}

pub trait JobObserver: Send {
    fn progress(&mut self, percent: f32, description: &str);
    fn finished(&mut self, id: &str, status: ErrorCode);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {
    fn progress(&mut self, _percent: f32, _description: &str) {}
    fn finished(&mut self, _id: &str, _status: ErrorCode) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub handle: JobHandle,
    pub kind: InstallationKind,
    pub subject: String,
    pub status: ErrorCode,
    pub message: Option<String>,
}

struct ActiveJob {
    handle: JobHandle,
    job: Box<dyn RunnableJob>,
}

#[derive(Default)]
pub struct JobRegistry {
    next_handle: u64,
    active: Option<ActiveJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_start(&mut self, job: Box<dyn RunnableJob>) -> Result<JobHandle, Busy> {
        if let Some(active) = &self.active {
            return Err(Busy(active.handle));
        }
        self.next_handle += 1;
        let handle = JobHandle(self.next_handle);
        self.active = Some(ActiveJob { handle, job });
        Ok(handle)
    }

    pub fn active_handle(&self) -> Option<JobHandle> {
        self.active.as_ref().map(|active| active.handle)
    }

    pub fn get(&self, handle: JobHandle) -> Option<&dyn RunnableJob> {
        self.active
            .as_ref()
            .filter(|active| active.handle == handle)
            .map(|active| active.job.as_ref())
    }

    fn get_mut(&mut self, handle: JobHandle) -> Option<&mut Box<dyn RunnableJob>> {
        self.active
            .as_mut()
            .filter(|active| active.handle == handle)
            .map(|active| &mut active.job)
    }

    pub fn advance(&mut self, handle: JobHandle) -> Option<JobState> {
        self.get_mut(handle).map(|job| job.advance())
    }

    fn take(&mut self, handle: JobHandle) -> Option<Box<dyn RunnableJob>> {
        if self.active_handle() != Some(handle) {
            return None;
        }
        self.active.take().map(|active| active.job)
    }
}

type PluginSweep = Box<dyn FnMut() -> Option<Box<dyn RunnableJob>> + Send>;

pub struct Runner {
    registry: JobRegistry,
    sender: Sender<RunnerSignal>,
    receiver: Receiver<RunnerSignal>,
    observer: Box<dyn JobObserver>,
    sweep: Option<PluginSweep>,
    scheduled: bool,
    last_percent: Option<u8>,
    reports: Vec<JobReport>,
}

impl Runner {
    pub fn new(observer: impl JobObserver + 'static) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            registry: JobRegistry::new(),
            sender,
            receiver,
            observer: Box::new(observer),
            sweep: None,
            scheduled: false,
            last_percent: None,
            reports: Vec::new(),
        }
    }

    /// Called after every successful job; a returned job is started next.
    pub fn with_sweep(
        mut self,
        sweep: impl FnMut() -> Option<Box<dyn RunnableJob>> + Send + 'static,
    ) -> Self {
        self.sweep = Some(Box::new(sweep));
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn is_idle(&self) -> bool {
        self.registry.active_handle().is_none()
    }

    /// Starts the job unless another one is in flight. The rejected job is
    /// dropped without running; the in-flight one is untouched.
    pub fn submit(&mut self, job: Box<dyn RunnableJob>) -> Result<JobHandle, Busy> {
        let kind = job.kind();
        let handle = self.registry.try_start(job)?;
        info!(job = %handle, kind = kind.as_str(), "job started");
        self.last_percent = None;
        self.schedule(handle);
        Ok(handle)
    }

    pub fn pause(&mut self, handle: JobHandle) -> bool {
        let paused = self
            .registry
            .get_mut(handle)
            .map(|job| job.pause())
            .unwrap_or(false);
        if paused {
            debug!(job = %handle, "job paused");
        }
        paused
    }

    pub fn resume(&mut self, handle: JobHandle) -> bool {
        let resumed = self
            .registry
            .get_mut(handle)
            .map(|job| job.resume())
            .unwrap_or(false);
        if resumed {
            debug!(job = %handle, "job resumed");
            self.schedule(handle);
        }
        resumed
    }

    fn schedule(&mut self, handle: JobHandle) {
        if self.scheduled {
            return;
        }
        if self.sender.send(RunnerSignal::Continue(handle)).is_ok() {
            self.scheduled = true;
        }
    }

    pub fn run_once(&mut self) -> bool {
        let Ok(RunnerSignal::Continue(handle)) = self.receiver.try_recv() else {
            return false;
        };
        self.scheduled = false;

        let Some(state) = self.registry.advance(handle) else {
            debug!(job = %handle, "continue for a job that is no longer active");
            return true;
        };
        self.report_progress(handle);

        match state {
            JobState::Finished(_) => self.finish(handle),
            state if state.wants_advance() => self.schedule(handle),
            _ => {}
        }
        true
    }

    pub fn run_until_idle(&mut self) {
        while self.run_once() {}
    }

    pub fn take_reports(&mut self) -> Vec<JobReport> {
        std::mem::take(&mut self.reports)
    }

    fn report_progress(&mut self, handle: JobHandle) {
        let Some((percent, description)) = self.registry.get(handle).map(|job| job.progress())
        else {
            return;
        };
        self.emit_progress(percent, description);
    }

    fn emit_progress(&mut self, percent: u8, description: &str) {
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        self.observer.progress(f32::from(percent), description);
    }

    fn finish(&mut self, handle: JobHandle) {
        let Some(mut job) = self.registry.take(handle) else {
            return;
        };
        let status = job.status().unwrap_or(ErrorCode::FatalError);
        let message = job.failure().map(ToString::to_string);
        job.on_finished(status);
        let (percent, description) = job.progress();
        self.emit_progress(percent, description);

        let subject = job.subject().to_string();
        if status.is_success() {
            info!(job = %handle, package = %subject, "job finished");
        } else {
            warn!(
                job = %handle,
                package = %subject,
                code = %status,
                "job failed: {}",
                message.as_deref().unwrap_or("unknown error")
            );
        }
        self.observer.finished(&subject, status);
        self.reports.push(JobReport {
            handle,
            kind: job.kind(),
            subject,
            status,
            message,
        });
        drop(job);

        if status.is_success() {
            self.sweep_plugins();
        }
    }

    fn sweep_plugins(&mut self) {
        let Some(sweep) = self.sweep.as_mut() else {
            return;
        };
        if let Some(next) = sweep() {
            info!(subject = %next.subject(), "starting plugin whose dependencies are ready");
            if let Err(busy) = self.submit(next) {
                warn!("plugin sweep could not start: {busy}");
            }
        }
    }
}
