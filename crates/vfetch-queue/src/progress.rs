//! Progress events routed through per-job channels.
//!
//! Every job gets its own unbounded, ordered channel registered under its
//! [`JobId`]. Producers post through a [`ProgressSender`]; at most one
//! [`ProgressSubscription`] drains a job at a time. A subscription dropped
//! before `DONE` parks the receiver again so a reconnecting observer resumes
//! from the first undelivered event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use vfetch_models::{escape_log_line, JobId, JobSnapshot, JobState, ProgressEvent, StageKind};

use crate::error::{QueueError, QueueResult};

struct JobSlot {
    snapshot: JobSnapshot,
    /// Parked receiver; `None` while an observer holds it
    rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    /// `DONE` was delivered to an observer
    drained: bool,
}

impl JobSlot {
    fn is_observed(&self) -> bool {
        self.rx.is_none() && !self.drained
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, JobSlot>,
    latest: Option<JobId>,
}

/// Process-wide registry of job channels.
#[derive(Clone, Default)]
pub struct ProgressHub {
    inner: Arc<Mutex<Registry>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new job in `Queued` state and return its producer handle.
    pub fn create(&self, job_id: JobId, kind: StageKind) -> QueueResult<ProgressSender> {
        let mut registry = self.registry();
        if registry.jobs.contains_key(&job_id) {
            return Err(QueueError::DuplicateJob(job_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        registry.jobs.insert(
            job_id.clone(),
            JobSlot {
                snapshot: JobSnapshot::new(job_id.clone(), kind),
                rx: Some(rx),
                drained: false,
            },
        );
        registry.latest = Some(job_id.clone());
        debug!(job_id = %job_id, kind = %kind, "Registered job channel");

        Ok(ProgressSender {
            job_id,
            hub: self.clone(),
            tx,
            done: Arc::new(Mutex::new(false)),
        })
    }

    /// Attach the single observer for `job_id`.
    pub fn subscribe(&self, job_id: &JobId) -> QueueResult<ProgressSubscription> {
        let mut registry = self.registry();
        let slot = registry
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;

        if slot.drained {
            return Err(QueueError::Drained(job_id.to_string()));
        }
        let rx = slot
            .rx
            .take()
            .ok_or_else(|| QueueError::AlreadyObserved(job_id.to_string()))?;

        Ok(ProgressSubscription {
            job_id: job_id.clone(),
            hub: self.clone(),
            rx: Some(rx),
            finished: false,
        })
    }

    /// Most recently created job still in the registry.
    pub fn latest(&self) -> Option<JobId> {
        self.registry().latest.clone()
    }

    /// Current snapshot of a job.
    pub fn status(&self, job_id: &JobId) -> Option<JobSnapshot> {
        self.registry()
            .jobs
            .get(job_id)
            .map(|slot| slot.snapshot.clone())
    }

    /// Snapshots of every registered job, newest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<_> = self
            .registry()
            .jobs
            .values()
            .map(|slot| slot.snapshot.clone())
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.registry().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().jobs.is_empty()
    }

    /// Number of jobs not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.registry()
            .jobs
            .values()
            .filter(|slot| !slot.snapshot.state.is_terminal())
            .count()
    }

    /// Drop finished jobs nobody is observing once `retention` has passed
    /// since they finished. Returns how many were removed.
    pub fn reap_finished(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::weeks(5200));
        let now = Utc::now();

        let mut registry = self.registry();
        let before = registry.jobs.len();
        registry.jobs.retain(|_, slot| {
            let expired = slot
                .snapshot
                .finished_at
                .map(|finished| now - finished >= retention)
                .unwrap_or(false);
            !(slot.snapshot.state.is_terminal() && expired && !slot.is_observed())
        });
        let removed = before - registry.jobs.len();

        let latest_gone = registry
            .latest
            .as_ref()
            .map(|id| !registry.jobs.contains_key(id))
            .unwrap_or(false);
        if latest_gone {
            registry.latest = None;
        }

        if removed > 0 {
            debug!(removed, "Reaped finished jobs");
        }
        removed
    }

    fn update<R>(&self, job_id: &JobId, f: impl FnOnce(&mut JobSnapshot) -> R) -> Option<R> {
        self.registry()
            .jobs
            .get_mut(job_id)
            .map(|slot| f(&mut slot.snapshot))
    }

    fn release(
        &self,
        job_id: &JobId,
        rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
        finished: bool,
    ) {
        let mut registry = self.registry();
        let Some(slot) = registry.jobs.get_mut(job_id) else {
            return;
        };
        if finished {
            slot.drained = true;
            slot.rx = None;
        } else {
            slot.rx = rx;
            debug!(job_id = %job_id, "Observer detached before DONE, parking channel");
        }
    }
}

/// Producer handle for one job's channel.
#[derive(Clone)]
pub struct ProgressSender {
    job_id: JobId,
    hub: ProgressHub,
    tx: mpsc::UnboundedSender<ProgressEvent>,
    /// Set once `DONE` was enqueued; guards every send
    done: Arc<Mutex<bool>>,
}

impl ProgressSender {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn done_flag(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Post an event. Events after `DONE` are discarded. Only
    /// [`ProgressSender::done`] ends the sequence; an event posted here that
    /// reads as the sentinel is delivered as an escaped log line.
    pub fn emit(&self, mut event: ProgressEvent) {
        if event.is_done() {
            debug!(job_id = %self.job_id, "Escaping sentinel posted as a regular event");
            event.log = event.log.map(escape_log_line);
        }

        let done = self.done_flag();
        if *done {
            debug!(job_id = %self.job_id, "Discarding event posted after DONE");
            return;
        }

        self.hub.update(&self.job_id, |snapshot| {
            if let Some(stage) = &event.stage {
                if snapshot.stage.as_ref() != Some(stage) {
                    snapshot.percent = None;
                }
                snapshot.stage = Some(stage.clone());
            }
            if let Some(percent) = event.percent {
                snapshot.percent = Some(percent);
            }
            if let Some(error) = &event.error {
                snapshot.error = Some(error.clone());
            }
            if let Some(url) = &event.final_url {
                snapshot.final_url = Some(url.clone());
            }
        });

        let _ = self.tx.send(event);
    }

    pub fn stage(&self, label: impl Into<String>, percent: f64) {
        self.emit(ProgressEvent::stage(label, percent));
    }

    pub fn log(&self, line: impl Into<String>) {
        self.emit(ProgressEvent::log(line));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::error(message));
    }

    /// Move the job to `next`. Illegal transitions are refused and logged.
    pub fn set_state(&self, next: JobState) -> bool {
        let job_id = &self.job_id;
        self.hub
            .update(job_id, |snapshot| {
                if !snapshot.state.can_transition_to(next) {
                    warn!(
                        job_id = %job_id,
                        from = %snapshot.state,
                        to = %next,
                        "Refusing illegal job state transition"
                    );
                    return false;
                }
                snapshot.state = next;
                match next {
                    JobState::Running => snapshot.started_at = Some(Utc::now()),
                    JobState::Succeeded | JobState::Failed => {
                        snapshot.finished_at = Some(Utc::now())
                    }
                    JobState::Queued => {}
                }
                true
            })
            .unwrap_or(false)
    }

    /// Current state as recorded in the registry.
    pub fn state(&self) -> Option<JobState> {
        self.hub.update(&self.job_id, |snapshot| snapshot.state)
    }

    /// Enqueue the `DONE` sentinel. Only the first call has an effect;
    /// returns whether this call sent it.
    pub fn done(&self) -> bool {
        let mut done = self.done_flag();
        if *done {
            return false;
        }
        *done = true;

        self.hub.update(&self.job_id, |snapshot| {
            if snapshot.finished_at.is_none() {
                snapshot.finished_at = Some(Utc::now());
            }
        });
        let _ = self.tx.send(ProgressEvent::done());
        true
    }

    pub fn is_done(&self) -> bool {
        *self.done_flag()
    }
}

/// Outcome of one bounded-wait receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Event(ProgressEvent),
    /// Nothing arrived within the wait; the observer should send a keep-alive
    KeepAlive,
    /// The sequence is complete
    Closed,
}

/// Exclusive observer of one job's events.
pub struct ProgressSubscription {
    job_id: JobId,
    hub: ProgressHub,
    rx: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
    finished: bool,
}

impl ProgressSubscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether `DONE` has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait up to `wait` for the next event.
    pub async fn recv(&mut self, wait: Duration) -> Received {
        if self.finished {
            return Received::Closed;
        }
        let Some(rx) = self.rx.as_mut() else {
            return Received::Closed;
        };

        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(event)) => {
                if event.is_done() {
                    self.finished = true;
                }
                Received::Event(event)
            }
            Ok(None) => {
                // Every producer is gone; nothing more can arrive
                self.finished = true;
                Received::Closed
            }
            Err(_) => Received::KeepAlive,
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.hub.release(&self.job_id, self.rx.take(), self.finished);
    }
}
