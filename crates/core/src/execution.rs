//! Per-request execution state.
//!
//! One [`ExecutionContext`] exists per request. It is owned by the request's
//! worker and passed by `&mut` to every operation that emits steps, so the
//! action counter and the timing map are never shared between requests.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::channel::EventSender;
use crate::error::RunError;
use crate::event::{Event, StepDisplay, StepKey, StepStatus};
use crate::plan::ActionPlan;
use crate::timing::TimingTracker;

#[derive(Debug)]
pub struct ExecutionContext {
    request_id: Uuid,
    action_counter: u32,
    completed_actions: u32,
    timings: TimingTracker,
    last_completed: Option<StepKey>,
    events: EventSender,
    token: CancellationToken,
    started: Instant,
    time_limit: Option<Duration>,
}

impl ExecutionContext {
    pub fn new(events: EventSender, token: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action_counter: 0,
            completed_actions: 0,
            timings: TimingTracker::new(),
            last_completed: None,
            events,
            token,
            started: Instant::now(),
            time_limit: None,
        }
    }

    /// Bound the run's wall-clock time. `None` leaves it unbounded.
    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn action_counter(&self) -> u32 {
        self.action_counter
    }

    /// Action steps (ordinal ≥ 1) that finished with `completed`.
    pub fn completed_actions(&self) -> u32 {
        self.completed_actions
    }

    pub fn last_completed(&self) -> Option<StepKey> {
        self.last_completed
    }

    pub fn timings(&self) -> &TimingTracker {
        &self.timings
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_set()
    }

    /// Poll the cancellation flag and the time budget.
    pub fn checkpoint(&self) -> Result<(), RunError> {
        if self.token.is_set() {
            debug!(request_id = %self.request_id, "Cancellation observed at checkpoint");
            return Err(RunError::Cancelled);
        }
        if let Some(limit) = self.time_limit
            && self.started.elapsed() > limit
        {
            return Err(RunError::TimeLimitExceeded {
                limit_secs: limit.as_secs_f64(),
            });
        }
        Ok(())
    }

    /// Advance the action counter and return the new action's key.
    pub fn next_action_key(&mut self) -> StepKey {
        self.action_counter += 1;
        StepKey::action(self.action_counter)
    }

    /// Key for a model call made after the most recent action.
    pub fn reasoning_key(&self) -> StepKey {
        StepKey::reasoning(self.action_counter)
    }

    /// Start timing `key` and publish its `log_start`.
    pub fn begin_step(&mut self, key: StepKey, display: StepDisplay) -> DateTime<Utc> {
        let start_time = self.timings.start(key);
        let label = &display.label;
        debug!(request_id = %self.request_id, step = %key, %label, "Step started");
        self.events.publish(Event::log_start(key, display, start_time));
        start_time
    }

    /// Stop timing `key` and publish its `log_update`. Returns the duration.
    pub fn complete_step(
        &mut self,
        key: StepKey,
        display: StepDisplay,
        status: StepStatus,
    ) -> Option<f64> {
        let duration = self.timings.finish(key);
        if status == StepStatus::Completed {
            self.last_completed = Some(key);
            if !key.is_reasoning() && key.ordinal > 0 {
                self.completed_actions += 1;
            }
        }
        debug!(
            request_id = %self.request_id,
            step = %key,
            ?status,
            duration,
            "Step finished"
        );
        self.events
            .publish(Event::log_update(key, display, status, duration));
        duration
    }

    pub fn status(&self, message: impl Into<String>) {
        self.events.publish(Event::status(message));
    }

    pub fn tool_status(&self, message: impl Into<String>, tool: impl Into<String>) {
        self.events.publish(Event::Status {
            message: message.into(),
            tool: Some(tool.into()),
        });
    }

    /// Publish the `done` terminal event.
    pub fn finish_done(&mut self, answer: impl Into<String>, plan: Option<ActionPlan>) {
        info!(
            request_id = %self.request_id,
            steps = self.completed_actions,
            elapsed_secs = self.elapsed().as_secs_f64(),
            "Request completed"
        );
        self.timings.clear();
        self.events.publish(Event::Done {
            answer: answer.into(),
            steps: self.completed_actions,
            plan,
        });
    }

    /// Publish the terminal event for a failed run: `cancelled` for a
    /// cancellation, `error` with the reason for anything else.
    pub fn finish_failed(&mut self, err: &RunError) {
        let last_step = self.last_completed;
        let event = if err.is_cancelled() {
            info!(request_id = %self.request_id, last_step = ?last_step, "Request cancelled");
            Event::Cancelled {
                message: err.to_string(),
                last_step,
            }
        } else {
            info!(request_id = %self.request_id, error = %err, "Request failed");
            Event::error(err.to_string(), last_step)
        };
        self.timings.clear();
        self.events.publish(event);
    }

    /// Whether a terminal event has already been published for this request.
    pub fn is_finished(&self) -> bool {
        self.events.is_terminated()
    }
}
