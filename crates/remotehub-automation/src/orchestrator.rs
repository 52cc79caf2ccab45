//! Activity orchestration.
//!
//! Runs the steps of an activity in ascending step order:
//! - Sleep `delay_before_ms`, dispatch the step's command, sleep `delay_after_ms`
//! - A failed required step aborts the run
//! - A failed optional step is logged and the run continues
//! - Cancellation is checked before each step and interrupts delays

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use remotehub_core::config::ActivityConfig;
use remotehub_core::model::{Activity, ActivityId, ActivityStep, CommandId, StepId};
use remotehub_core::store;
use remotehub_core::{EventBus, HubEvent, SharedStore, StoreError};
use remotehub_devices::{CommandParams, Dispatcher};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{AutomationError, Result};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// A required step failed.
    Aborted {
        step_id: StepId,
        step_order: u32,
        reason: String,
    },
    Cancelled,
}

/// Result of one attempted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step_id: StepId,
    pub step_order: u32,
    pub command_id: CommandId,
    pub required: bool,
    pub success: bool,
    pub reason: Option<String>,
}

/// Result of one activity run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRunReport {
    pub activity_id: ActivityId,
    pub outcome: RunOutcome,
    /// Attempted steps, in execution order.
    pub steps: Vec<StepReport>,
}

impl ActivityRunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Step orders in the order they ran.
    pub fn executed_orders(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.step_order).collect()
    }

    fn failure(&self) -> (Option<StepId>, Option<String>) {
        match &self.outcome {
            RunOutcome::Completed => (None, None),
            RunOutcome::Aborted {
                step_id, reason, ..
            } => (Some(*step_id), Some(reason.clone())),
            RunOutcome::Cancelled => (None, Some("cancelled".to_string())),
        }
    }
}

/// Executes activities through the dispatcher.
pub struct ActivityOrchestrator {
    store: SharedStore,
    dispatcher: Arc<Dispatcher>,
    event_bus: EventBus,
    config: ActivityConfig,
    running: DashMap<ActivityId, Arc<tokio::sync::Mutex<()>>>,
}

impl ActivityOrchestrator {
    pub fn new(
        store: SharedStore,
        dispatcher: Arc<Dispatcher>,
        event_bus: EventBus,
        config: ActivityConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            event_bus,
            config,
            running: DashMap::new(),
        }
    }

    /// Whether a run of the activity currently holds its lock.
    pub fn is_running(&self, activity_id: ActivityId) -> bool {
        self.running
            .get(&activity_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Run an activity to completion, abort or cancellation.
    ///
    /// Errors are reserved for runs that never start. Step failures and
    /// cancellation are reported through [`ActivityRunReport::outcome`].
    pub async fn execute(
        &self,
        activity_id: ActivityId,
        cancel: &CancellationToken,
    ) -> Result<ActivityRunReport> {
        let activity = store::blocking(&self.store, move |s| s.get_activity(activity_id))
            .await?
            .ok_or(AutomationError::NotFound(activity_id))?;
        if !activity.enabled {
            return Err(AutomationError::Disabled(activity_id));
        }

        let report = if self.config.exclusive_runs {
            let lock = self.running.entry(activity_id).or_default().clone();
            let guard = lock
                .try_lock_owned()
                .map_err(|_| AutomationError::AlreadyRunning(activity_id))?;
            let report = self.run(&activity, cancel).await;
            drop(guard);
            self.running
                .remove_if(&activity_id, |_, lock| Arc::strong_count(lock) == 1);
            report
        } else {
            self.run(&activity, cancel).await
        };

        Ok(report)
    }

    async fn run(&self, activity: &Activity, cancel: &CancellationToken) -> ActivityRunReport {
        let steps = activity.ordered_steps();
        tracing::info!(
            activity_id = activity.id,
            name = %activity.name,
            steps = steps.len(),
            "Activity started"
        );
        self.publish(HubEvent::ActivityStarted {
            activity_id: activity.id,
            name: activity.name.clone(),
            timestamp: Utc::now().timestamp(),
        });

        let mut report = ActivityRunReport {
            activity_id: activity.id,
            outcome: RunOutcome::Completed,
            steps: Vec::with_capacity(steps.len()),
        };

        for step in &steps {
            if !sleep_or_cancel(step.delay_before_ms, cancel).await {
                report.outcome = RunOutcome::Cancelled;
                break;
            }

            let result = self.run_step(step).await;
            let step_report = StepReport {
                step_id: step.id,
                step_order: step.step_order,
                command_id: step.command_id,
                required: step.is_required,
                success: result.is_ok(),
                reason: result.as_ref().err().cloned(),
            };
            self.publish(HubEvent::ActivityStepExecuted {
                activity_id: activity.id,
                step_id: step.id,
                step_order: step.step_order,
                success: step_report.success,
                reason: step_report.reason.clone(),
                timestamp: Utc::now().timestamp(),
            });
            report.steps.push(step_report);

            if let Err(reason) = result {
                if step.is_required {
                    tracing::warn!(
                        activity_id = activity.id,
                        step_id = step.id,
                        step_order = step.step_order,
                        reason = %reason,
                        "Required step failed, aborting activity"
                    );
                    report.outcome = RunOutcome::Aborted {
                        step_id: step.id,
                        step_order: step.step_order,
                        reason,
                    };
                    break;
                }
                tracing::warn!(
                    activity_id = activity.id,
                    step_id = step.id,
                    step_order = step.step_order,
                    reason = %reason,
                    "Optional step failed, continuing"
                );
            }

            if step.delay_after_ms > 0 && !sleep_or_cancel(step.delay_after_ms, cancel).await {
                report.outcome = RunOutcome::Cancelled;
                break;
            }
        }

        self.finish(activity, &report).await;
        report
    }

    async fn run_step(&self, step: &ActivityStep) -> std::result::Result<(), String> {
        let command_id = step.command_id;
        let command = store::blocking(&self.store, move |s| {
            s.get_command(command_id)?
                .ok_or_else(|| StoreError::NotFound(format!("command {}", command_id)))
        })
        .await
        .map_err(|e| e.to_string())?;
        let device_id = command.device_id;
        let device = store::blocking(&self.store, move |s| {
            s.get_device(device_id)?
                .ok_or_else(|| StoreError::NotFound(format!("device {}", device_id)))
        })
        .await
        .map_err(|e| e.to_string())?;

        self.dispatcher
            .dispatch_command(&device, &command, &CommandParams::default())
            .await
            .map(|_| ())
            .map_err(|e| e.reason())
    }

    async fn finish(&self, activity: &Activity, report: &ActivityRunReport) {
        let now = Utc::now();
        let success = report.succeeded();

        if success {
            let activity_id = activity.id;
            let touched = store::blocking(&self.store, move |s| s.touch_activity(activity_id, now)).await;
            if let Err(e) = touched {
                tracing::warn!(activity_id = activity.id, error = %e, "Failed to record last_used");
            }
            tracing::info!(activity_id = activity.id, "Activity completed");
        } else if report.outcome == RunOutcome::Cancelled {
            tracing::info!(activity_id = activity.id, "Activity cancelled");
        }

        let (failed_step, reason) = report.failure();
        self.publish(HubEvent::ActivityCompleted {
            activity_id: activity.id,
            success,
            failed_step,
            reason,
            timestamp: now.timestamp(),
        });
    }

    fn publish(&self, event: HubEvent) {
        self.event_bus.publish_with_source(event, "orchestrator");
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(delay_ms: u64, cancel: &CancellationToken) -> bool {
    if delay_ms == 0 {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
