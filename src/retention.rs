use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{error, info};

use crate::{alerts::AlertService, control::CommandService};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub expired_commands: u64,
    pub purged_alerts: u64,
    pub purged_commands: u64,
}

/// Periodic housekeeping: cancels expired pending commands and deletes old
/// resolved alerts and finished commands. Readings are never purged.
pub struct RetentionService {
    alerts: AlertService,
    commands: CommandService,
    interval: Duration,
    alert_retention: chrono::Duration,
    command_retention: chrono::Duration,
}

impl RetentionService {
    pub fn new(
        alerts: AlertService,
        commands: CommandService,
        interval: Duration,
        alert_retention_days: i64,
        command_retention_days: i64,
    ) -> Self {
        Self {
            alerts,
            commands,
            interval,
            alert_retention: chrono::Duration::days(alert_retention_days),
            command_retention: chrono::Duration::days(command_retention_days),
        }
    }

    /// Runs the retention loop indefinitely.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Retention loop started");
        let mut ticker = time::interval(self.interval);

        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(report) if report != RetentionReport::default() => info!(
                    expired_commands = report.expired_commands,
                    purged_alerts = report.purged_alerts,
                    purged_commands = report.purged_commands,
                    "Retention pass finished"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Retention pass failed"),
            }
        }
    }

    pub async fn run_once(&self) -> anyhow::Result<RetentionReport> {
        let now = Utc::now();
        Ok(RetentionReport {
            expired_commands: self.commands.expire_pending(now).await?,
            purged_alerts: self.alerts.purge(now, self.alert_retention).await?,
            purged_commands: self.commands.purge(now, self.command_retention).await?,
        })
    }
}
