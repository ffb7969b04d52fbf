use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{task::AbortHandle, time};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    control::validation::{self, CommandRequest},
    db::models::{
        CommandAction, CommandStatus, CommandTransition, DeviceCommand, DeviceType,
    },
    error::{Result, ServiceError},
    store::{ActiveCommandFilter, CommandCounts, Pagination, Store, EXPIRED_MESSAGE},
    window::TimeWindow,
};

pub const DEFAULT_PENDING_LIMIT: u32 = 10;
const SIMULATED_RESPONSE: &str = "simulated execution";
const CANCELLED_MESSAGE: &str = "cancelled by operator";

/// Status change reported by a device or an operator.
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: CommandStatus,
    pub device_response: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: CommandStatus) -> Self {
        Self {
            status,
            device_response: None,
            error_code: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandHistory {
    pub commands: Vec<DeviceCommand>,
    pub counts: CommandCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CommandStatEntry {
    pub command: CommandAction,
    pub status: CommandStatus,
    pub count: u64,
    /// Mean time from `sent` to `completed`, in milliseconds.
    pub avg_response_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeviceTypeStats {
    pub device_type: DeviceType,
    pub total: u64,
    pub commands: Vec<CommandStatEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CommandStats {
    pub time_window: TimeWindow,
    pub total: u64,
    /// Busiest device type first.
    pub by_device_type: Vec<DeviceTypeStats>,
}

/// Queue of commands waiting for (or being executed by) actuators.
///
/// When a simulation delay is configured, every enqueued command is driven
/// through `sent → executing → completed` by a background task after that
/// delay. Any external transition or cancellation aborts the task.
#[derive(Clone)]
pub struct CommandService {
    store: Arc<dyn Store>,
    simulation: Option<Duration>,
    simulations: Arc<Mutex<HashMap<Uuid, AbortHandle>>>,
}

impl CommandService {
    pub fn new(store: Arc<dyn Store>, simulation: Option<Duration>) -> Self {
        Self {
            store,
            simulation,
            simulations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn enqueue(&self, request: CommandRequest) -> Result<DeviceCommand> {
        let command = validation::build_command(request, Utc::now())?;
        self.store.insert_command(&command).await?;
        info!(
            command_id = %command.id,
            device_id = %command.device_id,
            device_type = %command.device_type,
            command = %command.command,
            priority = command.parameters.priority,
            urgent = command.is_urgent,
            "Command queued"
        );
        self.schedule_simulation(command.id);
        Ok(command)
    }

    pub async fn get(&self, id: Uuid) -> Result<DeviceCommand> {
        self.store
            .get_command(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("command", id))
    }

    /// Pending commands for `device_id`, highest priority first, after
    /// cancelling any that expired while queued.
    pub async fn pending_for(&self, device_id: &str, limit: Option<u32>) -> Result<Vec<DeviceCommand>> {
        let limit = check_limit(limit.unwrap_or(DEFAULT_PENDING_LIMIT))?;
        let device_id = validation::device_key(device_id);
        let expired = self.store.expire_pending(Utc::now(), Some(&device_id)).await?;
        if expired > 0 {
            info!(device_id = %device_id, expired, "Expired pending commands cancelled");
        }
        Ok(self.store.pending_commands(&device_id, limit).await?)
    }

    pub async fn last_for(&self, device_id: &str) -> Result<Option<DeviceCommand>> {
        let device_id = validation::device_key(device_id);
        Ok(self.store.latest_command(&device_id).await?)
    }

    /// Moves a command along its lifecycle. Illegal edges are a `Conflict`
    /// and leave the command untouched.
    pub async fn transition(&self, id: Uuid, update: StatusUpdate) -> Result<DeviceCommand> {
        let command = self.apply_transition(id, update).await?;
        self.abort_simulation(id);
        info!(
            command_id = %id,
            device_id = %command.device_id,
            status = %command.status,
            "Command status updated"
        );
        Ok(command)
    }

    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<DeviceCommand> {
        let reason = reason
            .map(|r| r.trim().to_owned())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| CANCELLED_MESSAGE.to_owned());
        let update = StatusUpdate {
            error_message: Some(reason),
            ..StatusUpdate::to(CommandStatus::Cancelled)
        };
        let command = self.apply_transition(id, update).await?;
        self.abort_simulation(id);
        info!(command_id = %id, device_id = %command.device_id, "Command cancelled");
        Ok(command)
    }

    pub async fn history(
        &self,
        device_id: &str,
        status: Option<CommandStatus>,
        limit: Option<u32>,
    ) -> Result<CommandHistory> {
        let limit = check_limit(limit.unwrap_or(Pagination::DEFAULT_LIMIT))?;
        let device_id = validation::device_key(device_id);
        let (commands, counts) = tokio::try_join!(
            self.store.command_history(&device_id, status, limit),
            self.store.command_counts(&device_id),
        )?;
        Ok(CommandHistory { commands, counts })
    }

    pub async fn active(
        &self,
        filter: &ActiveCommandFilter,
        limit: Option<u32>,
    ) -> Result<Vec<DeviceCommand>> {
        let limit = check_limit(limit.unwrap_or(Pagination::DEFAULT_LIMIT))?;
        Ok(self.store.active_commands(filter, limit).await?)
    }

    pub async fn stats(&self, window: TimeWindow) -> Result<CommandStats> {
        let since = Utc::now() - window.duration();
        let rows = self.store.command_stats(since).await?;

        let mut by_type: HashMap<DeviceType, DeviceTypeStats> = HashMap::new();
        for row in rows {
            let entry = by_type.entry(row.device_type).or_insert_with(|| DeviceTypeStats {
                device_type: row.device_type,
                total: 0,
                commands: Vec::new(),
            });
            entry.total += row.count;
            entry.commands.push(CommandStatEntry {
                command: row.command,
                status: row.status,
                count: row.count,
                avg_response_ms: row.avg_response_ms,
            });
        }

        let mut by_device_type: Vec<DeviceTypeStats> = by_type.into_values().collect();
        for stats in &mut by_device_type {
            stats.commands.sort_by(|a, b| {
                b.count
                    .cmp(&a.count)
                    .then_with(|| a.command.as_str().cmp(b.command.as_str()))
                    .then_with(|| a.status.as_str().cmp(b.status.as_str()))
            });
        }
        by_device_type.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| a.device_type.as_str().cmp(b.device_type.as_str()))
        });

        Ok(CommandStats {
            time_window: window,
            total: by_device_type.iter().map(|s| s.total).sum(),
            by_device_type,
        })
    }

    pub async fn count_pending(&self) -> Result<u64> {
        Ok(self.store.count_commands(Some(CommandStatus::Pending)).await?)
    }

    /// Cancels every pending command whose expiry has passed.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.store.expire_pending(now, None).await?)
    }

    /// Deletes finished commands created more than `retention` ago.
    pub async fn purge(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<u64> {
        Ok(self.store.purge_commands(now - retention).await?)
    }

    // -----------------------------------------------------------------------
    // Lifecycle internals
    // -----------------------------------------------------------------------

    async fn apply_transition(&self, id: Uuid, update: StatusUpdate) -> Result<DeviceCommand> {
        let current = self.get(id).await?;
        let now = Utc::now();

        if !current.status.can_transition_to(update.status) {
            return Err(ServiceError::Conflict(format!(
                "command {id} cannot move from {} to {}",
                current.status, update.status
            )));
        }

        if current.status == CommandStatus::Pending
            && current.is_expired(now)
            && !update.status.is_terminal()
        {
            let expire = CommandTransition {
                error_message: Some(EXPIRED_MESSAGE.to_owned()),
                ..CommandTransition::to(CommandStatus::Cancelled, now)
            };
            self.store
                .transition_command(id, CommandStatus::Pending, &expire)
                .await?;
            return Err(ServiceError::Conflict(format!(
                "command {id} {EXPIRED_MESSAGE}"
            )));
        }

        let transition = CommandTransition {
            to: update.status,
            at: now,
            device_response: update.device_response,
            error_code: update.error_code,
            error_message: update.error_message,
        };
        self.store
            .transition_command(id, current.status, &transition)
            .await?
            .ok_or_else(|| {
                ServiceError::Conflict(format!(
                    "command {id} changed while moving to {}; retry",
                    update.status
                ))
            })
    }

    fn schedule_simulation(&self, id: Uuid) {
        let Some(delay) = self.simulation else {
            return;
        };

        let mut simulations = self.simulations.lock().unwrap_or_else(PoisonError::into_inner);
        let service = self.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            for status in [CommandStatus::Sent, CommandStatus::Executing, CommandStatus::Completed] {
                let update = StatusUpdate {
                    device_response: (status == CommandStatus::Completed)
                        .then(|| SIMULATED_RESPONSE.to_owned()),
                    ..StatusUpdate::to(status)
                };
                if let Err(e) = service.apply_transition(id, update).await {
                    match &e {
                        ServiceError::Conflict(_) | ServiceError::NotFound { .. } => {
                            debug!(command_id = %id, error = %e, "Simulated execution stopped")
                        }
                        _ => warn!(command_id = %id, error = %e, "Simulated execution failed"),
                    }
                    break;
                }
            }
            service.forget_simulation(id);
        });
        simulations.insert(id, task.abort_handle());
    }

    fn abort_simulation(&self, id: Uuid) {
        let handle = self
            .simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(handle) = handle {
            handle.abort();
            debug!(command_id = %id, "Simulated execution aborted");
        }
    }

    fn forget_simulation(&self, id: Uuid) {
        self.simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[cfg(test)]
    fn running_simulations(&self) -> usize {
        self.simulations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn check_limit(limit: u32) -> Result<u32> {
    if limit == 0 || limit > Pagination::MAX_LIMIT {
        return Err(ServiceError::validation(format!(
            "limit must be between 1 and {}",
            Pagination::MAX_LIMIT
        )));
    }
    Ok(limit)
}
