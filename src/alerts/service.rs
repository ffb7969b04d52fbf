use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::{
    db::models::{Alert, AlertTransition},
    error::{Result, ServiceError},
    store::{AlertFilter, AlertStats, Page, Pagination, SortOrder, Store},
    window::TimeWindow,
};

pub const DEFAULT_ACTOR: &str = "operator";
const MAX_BULK_IDS: usize = 1000;

#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn Store>,
}

impl AlertService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(
        &self,
        filter: &AlertFilter,
        order: SortOrder,
        page: Pagination,
    ) -> Result<Page<Alert>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(ServiceError::validation("`from` must not be after `to`"));
            }
        }
        Ok(self.store.list_alerts(filter, order, page).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Alert> {
        self.store
            .get_alert(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("alert", id))
    }

    pub async fn acknowledge(&self, id: Uuid, by: Option<String>) -> Result<Alert> {
        let by = actor(by);
        let alert = self
            .apply(id, AlertTransition::Acknowledge { by: by.clone(), at: Utc::now() })
            .await?;
        info!(alert_id = %id, by = %by, "Alert acknowledged");
        Ok(alert)
    }

    /// Acknowledges every still-unacknowledged alert among `ids`. Unknown ids
    /// are skipped; returns how many alerts changed.
    pub async fn bulk_acknowledge(&self, ids: &[Uuid], by: Option<String>) -> Result<u64> {
        if ids.is_empty() {
            return Err(ServiceError::validation("ids must not be empty"));
        }
        if ids.len() > MAX_BULK_IDS {
            return Err(ServiceError::validation(format!(
                "at most {MAX_BULK_IDS} ids can be acknowledged at once"
            )));
        }
        let by = actor(by);
        let changed = self.store.acknowledge_alerts(ids, &by, Utc::now()).await?;
        info!(requested = ids.len(), acknowledged = changed, by = %by, "Alerts acknowledged");
        Ok(changed)
    }

    pub async fn resolve(&self, id: Uuid, notes: Option<String>) -> Result<Alert> {
        let notes = notes.map(|n| n.trim().to_owned()).filter(|n| !n.is_empty());
        let alert = self
            .apply(id, AlertTransition::Resolve { notes, at: Utc::now() })
            .await?;
        info!(alert_id = %id, "Alert resolved");
        Ok(alert)
    }

    pub async fn reactivate(&self, id: Uuid) -> Result<Alert> {
        let alert = self
            .apply(id, AlertTransition::Reactivate { at: Utc::now() })
            .await?;
        info!(alert_id = %id, "Alert reactivated");
        Ok(alert)
    }

    pub async fn mark_false_alarm(&self, id: Uuid, by: Option<String>) -> Result<Alert> {
        let by = actor(by);
        let alert = self
            .apply(id, AlertTransition::FalseAlarm { by: by.clone(), at: Utc::now() })
            .await?;
        info!(alert_id = %id, by = %by, "Alert marked as false alarm");
        Ok(alert)
    }

    pub async fn stats(&self, window: TimeWindow) -> Result<AlertStats> {
        let since = Utc::now() - window.duration();
        Ok(self.store.alert_stats(since).await?)
    }

    pub async fn count_unacknowledged(&self) -> Result<u64> {
        Ok(self.store.count_alerts(&AlertFilter::unacknowledged()).await?)
    }

    /// Deletes non-critical alerts resolved more than `retention` ago, and
    /// alerts past their own expiry.
    pub async fn purge(&self, now: DateTime<Utc>, retention: Duration) -> Result<u64> {
        Ok(self.store.purge_alerts(now - retention, now).await?)
    }

    async fn apply(&self, id: Uuid, transition: AlertTransition) -> Result<Alert> {
        self.store
            .transition_alert(id, &transition)
            .await?
            .ok_or_else(|| ServiceError::not_found("alert", id))
    }
}

fn actor(by: Option<String>) -> String {
    by.map(|b| b.trim().to_owned())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_owned())
}
