//! User-composed movement sequences and their paced playback.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use shared::{
    domain::{Command, StepId},
    sequence::{
        duration_in_bounds, SequenceStep, Template, MAX_STEP_DURATION_MS, MIN_STEP_DURATION_MS,
    },
};
use storage::{SavedSequenceSummary, SequenceStore};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    dispatcher::CommandDispatcher,
    error::SequenceError,
    events::{ClientEvent, NotificationLevel},
    session::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    pub steps_sent: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct SequenceList {
    steps: Vec<SequenceStep>,
    next_id: i64,
}

impl SequenceList {
    fn push(&mut self, command: Command, duration_ms: u64) -> StepId {
        self.next_id += 1;
        let id = StepId(self.next_id);
        self.steps.push(SequenceStep {
            id,
            command,
            duration_ms,
        });
        id
    }

    fn replace(&mut self, steps: Vec<SequenceStep>) {
        let highest = steps.iter().map(|step| step.id.0).max().unwrap_or(0);
        self.next_id = self.next_id.max(highest);
        self.steps = steps;
    }
}

/// Clears the executing flag when a run ends, including early returns.
struct ExecutionGuard<'a>(&'a AtomicBool);

impl<'a> ExecutionGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SequenceExecutor {
    dispatcher: CommandDispatcher,
    session: Arc<Session>,
    store: Arc<dyn SequenceStore>,
    guard: Duration,
    list: Mutex<SequenceList>,
    executing: AtomicBool,
}

impl SequenceExecutor {
    /// `guard` is added to every step's duration before the next step is sent.
    pub fn new(
        dispatcher: CommandDispatcher,
        session: Arc<Session>,
        store: Arc<dyn SequenceStore>,
        guard: Duration,
    ) -> Self {
        Self {
            dispatcher,
            session,
            store,
            guard,
            list: Mutex::new(SequenceList::default()),
            executing: AtomicBool::new(false),
        }
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    pub fn steps(&self) -> Vec<SequenceStep> {
        self.lock_list().steps.clone()
    }

    pub fn len(&self) -> usize {
        self.lock_list().steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of nominal step durations, without pacing guards.
    pub fn total_duration(&self) -> Duration {
        let total_ms = self.lock_list().steps.iter().map(|step| step.duration_ms).sum::<u64>();
        Duration::from_millis(total_ms)
    }

    pub fn append(&self, command: Command, duration_ms: u64) -> Result<StepId, SequenceError> {
        self.ensure_idle()?;
        if !duration_in_bounds(duration_ms) {
            self.session.notify(
                NotificationLevel::Warning,
                format!(
                    "Duration must be between {MIN_STEP_DURATION_MS} and {MAX_STEP_DURATION_MS} ms"
                ),
            );
            return Err(SequenceError::DurationOutOfRange {
                duration_ms,
                min: MIN_STEP_DURATION_MS,
                max: MAX_STEP_DURATION_MS,
            });
        }
        let id = self.lock_list().push(command, duration_ms);
        self.session.notify(
            NotificationLevel::Success,
            format!("Added: {}", command.label()),
        );
        Ok(id)
    }

    /// Returns whether a step with `id` was present.
    pub fn remove(&self, id: StepId) -> Result<bool, SequenceError> {
        self.ensure_idle()?;
        let mut list = self.lock_list();
        let before = list.steps.len();
        list.steps.retain(|step| step.id != id);
        Ok(list.steps.len() != before)
    }

    pub fn clear(&self) -> Result<(), SequenceError> {
        self.ensure_idle()?;
        self.lock_list().steps.clear();
        Ok(())
    }

    /// Replaces the whole list with a built-in pattern.
    pub fn load_template(&self, template: Template) -> Result<usize, SequenceError> {
        self.ensure_idle()?;
        let count = {
            let mut list = self.lock_list();
            list.steps.clear();
            for &(command, duration_ms) in template.steps() {
                list.push(command, duration_ms);
            }
            list.steps.len()
        };
        info!(template = template.name(), steps = count, "sequence: template loaded");
        self.session.notify(
            NotificationLevel::Success,
            format!("Template \"{template}\" loaded ({count} steps)"),
        );
        Ok(count)
    }

    pub fn load_template_named(&self, name: &str) -> Result<usize, SequenceError> {
        let template = name.parse::<Template>().inspect_err(|_| {
            self.session
                .notify(NotificationLevel::Error, "Template not found");
        })?;
        self.load_template(template)
    }

    /// Stores a copy of the current list under `name`, replacing any
    /// sequence already saved with that name.
    pub async fn save(&self, name: &str) -> Result<(), SequenceError> {
        let name = name.trim();
        let snapshot = self.steps();
        if snapshot.is_empty() {
            self.session
                .notify(NotificationLevel::Warning, "Sequence is empty");
            return Err(SequenceError::Empty);
        }
        if name.is_empty() {
            return Err(SequenceError::EmptyName);
        }

        self.store.save_sequence(name, &snapshot).await?;
        info!(name, steps = snapshot.len(), "sequence: saved");
        self.session.notify(
            NotificationLevel::Success,
            format!("Sequence \"{name}\" saved"),
        );
        Ok(())
    }

    /// Replaces the live list with a saved sequence.
    pub async fn load_saved(&self, name: &str) -> Result<usize, SequenceError> {
        self.ensure_idle()?;
        let steps = self
            .store
            .load_sequence(name)
            .await?
            .ok_or_else(|| SequenceError::NotFound(name.to_string()))?;
        // The store read may have raced with an execute request.
        self.ensure_idle()?;
        let count = steps.len();
        self.lock_list().replace(steps);
        info!(name, steps = count, "sequence: saved sequence loaded");
        Ok(count)
    }

    pub async fn saved_sequences(&self) -> Result<Vec<SavedSequenceSummary>, SequenceError> {
        Ok(self.store.list_sequences().await?)
    }

    pub async fn store_health(&self) -> Result<(), SequenceError> {
        Ok(self.store.health_check().await?)
    }

    pub async fn delete_saved(&self, name: &str) -> Result<bool, SequenceError> {
        let deleted = self.store.delete_sequence(name).await?;
        if deleted {
            info!(name, "sequence: saved sequence deleted");
        }
        Ok(deleted)
    }

    /// Name offered for the next save: `Sequence <n+1>`.
    pub async fn suggested_name(&self) -> Result<String, SequenceError> {
        let saved = self.store.list_sequences().await?;
        Ok(format!("Sequence {}", saved.len() + 1))
    }

    /// Plays the list once, in order, waiting each step's duration plus the
    /// guard interval before the next. Only one run may be active; a second
    /// request is rejected rather than queued.
    pub async fn execute(&self) -> Result<ExecutionReport, SequenceError> {
        let steps = self.steps();
        if steps.is_empty() {
            warn!("sequence: execute rejected, list is empty");
            self.session
                .notify(NotificationLevel::Warning, "Sequence is empty");
            return Err(SequenceError::Empty);
        }
        if !self.dispatcher.is_connected() {
            warn!("sequence: execute rejected, channel not connected");
            self.session
                .notify(NotificationLevel::Error, "No active connection");
            return Err(SequenceError::NotConnected);
        }
        let Some(_running) = ExecutionGuard::acquire(&self.executing) else {
            warn!("sequence: execute rejected, already running");
            self.session
                .notify(NotificationLevel::Warning, "A sequence is already running");
            return Err(SequenceError::AlreadyRunning);
        };

        let total = steps.len();
        let started = Instant::now();
        info!(total, guard_ms = self.guard.as_millis() as u64, "sequence: execution started");
        self.session
            .notify(NotificationLevel::Info, "Starting sequence");

        for (index, step) in steps.iter().enumerate() {
            self.session.emit(ClientEvent::SequenceProgress {
                step: index + 1,
                total,
                command: step.command,
            });
            if let Err(source) = self
                .dispatcher
                .send_command(step.command, step.duration_ms, None)
                .await
            {
                error!(step = index + 1, total, %source, "sequence: aborted");
                self.session.emit(ClientEvent::SequenceFinished {
                    steps_sent: index,
                    total,
                    success: false,
                });
                self.session
                    .notify(NotificationLevel::Error, "Sequence failed");
                return Err(SequenceError::Aborted {
                    sent: index,
                    total,
                    source,
                });
            }
            tokio::time::sleep(Duration::from_millis(step.duration_ms) + self.guard).await;
        }

        let elapsed = started.elapsed();
        info!(total, elapsed_ms = elapsed.as_millis() as u64, "sequence: completed");
        self.session.emit(ClientEvent::SequenceFinished {
            steps_sent: total,
            total,
            success: true,
        });
        self.session
            .notify(NotificationLevel::Success, "Sequence completed");
        Ok(ExecutionReport {
            steps_sent: total,
            elapsed,
        })
    }

    fn ensure_idle(&self) -> Result<(), SequenceError> {
        if self.is_executing() {
            warn!("sequence: edit rejected while running");
            return Err(SequenceError::Busy);
        }
        Ok(())
    }

    fn lock_list(&self) -> MutexGuard<'_, SequenceList> {
        self.list.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "tests/sequence_tests.rs"]
mod tests;
