use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::storage::{AlertKey, AlertRow, AlertStore, AlertUpsert, StorageResult};
use crate::{AlertDraft, Device, HealthStatus, ScanResult, UnifiedComponent, UrgencyLevel};

/// What happened to an alert during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChange {
    Raised,
    Changed,
    Resolved,
}

/// One accepted change, pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDelta {
    pub change: AlertChange,
    pub alert: AlertRow,
}

/// Turns a scan's drafts into stored alerts.
///
/// Drafts update the active alert for their key or open a new one. OK
/// components of a successful scan resolve their active alert, unless a
/// draft of the same scan shares the key. Failed scans change nothing.
#[derive(Clone)]
pub struct AlertReconciler {
    store: Arc<dyn AlertStore>,
}

impl AlertReconciler {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Authoritative urgency: a business rule if one matches, otherwise the
    /// provisional urgency of the draft.
    pub async fn urgency_for(&self, draft: &AlertDraft, business_type: Option<&str>) -> UrgencyLevel {
        let Some(business_type) = business_type else {
            return draft.urgency_level;
        };

        match self
            .store
            .urgency_rule(business_type, draft.component_type.hardware_code())
            .await
        {
            Ok(Some(level)) => level,
            Ok(None) => draft.urgency_level,
            Err(e) => {
                warn!("urgency rule lookup failed, keeping provisional urgency: {e}");
                draft.urgency_level
            }
        }
    }

    /// Upserts one draft and returns the alert id, plus a delta when the
    /// alert is new or its health or urgency changed.
    pub async fn upsert(
        &self,
        draft: &AlertDraft,
        business_type: Option<&str>,
    ) -> StorageResult<(i64, Option<AlertDelta>)> {
        let urgency = self.urgency_for(draft, business_type).await;
        let outcome = self
            .store
            .upsert_alert(AlertUpsert::from_draft(draft, urgency, Utc::now()))
            .await?;

        let delta = outcome.is_visible_change().then(|| AlertDelta {
            change: if outcome.created {
                AlertChange::Raised
            } else {
                AlertChange::Changed
            },
            alert: outcome.alert.clone(),
        });

        Ok((outcome.alert.id, delta))
    }

    /// Resolves the active alert of a component that just read healthy.
    pub async fn resolve_healthy(
        &self,
        device_id: &str,
        component: &UnifiedComponent,
    ) -> StorageResult<Option<AlertDelta>> {
        if component.health_status != HealthStatus::Ok {
            return Ok(None);
        }

        let key = AlertKey::new(device_id, component.component_type, &component.component_name);
        let resolved = self.store.resolve_alert(&key, Utc::now()).await?;

        Ok(resolved.map(|alert| AlertDelta {
            change: AlertChange::Resolved,
            alert,
        }))
    }

    /// Applies a whole scan result. Store failures are logged per alert and
    /// do not stop the remaining ones.
    #[instrument(skip(self, device, result), fields(device = %device.id))]
    pub async fn reconcile(&self, device: &Device, result: &ScanResult) -> Vec<AlertDelta> {
        if !result.success {
            debug!("scan failed, leaving alerts untouched");
            return Vec::new();
        }

        let mut deltas = Vec::new();
        let drafted: HashSet<AlertKey> = result
            .alerts
            .iter()
            .map(|d| AlertKey::new(&d.device_id, d.component_type, &d.component_name))
            .collect();

        for draft in &result.alerts {
            match self.upsert(draft, device.business_type.as_deref()).await {
                Ok((_, Some(delta))) => deltas.push(delta),
                Ok((_, None)) => {}
                Err(e) => warn!(
                    "failed to store alert for {} {}: {e}",
                    draft.component_type, draft.component_name
                ),
            }
        }

        let healthy = result.components.iter().filter(|c| {
            c.is_present()
                && !drafted.contains(&AlertKey::new(&device.id, c.component_type, &c.component_name))
        });
        for component in healthy {
            match self.resolve_healthy(&device.id, component).await {
                Ok(Some(delta)) => deltas.push(delta),
                Ok(None) => {}
                Err(e) => warn!(
                    "failed to resolve alert for {} {}: {e}",
                    component.component_type, component.component_name
                ),
            }
        }

        debug!("{} alert changes", deltas.len());
        deltas
    }
}
