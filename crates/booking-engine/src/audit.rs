//! Change history for reservations.
//!
//! Every mutation appends one [`AuditEntry`] per touched reservation inside the
//! same transaction as the change, and mirrors it to `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::error::EngineError;
use crate::model::{ActionContext, Actor, Reservation, ReservationId};
use crate::store::StoreTx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    TimeChanged,
    Duplicated,
    SeriesCreated,
    SeriesUpdated,
    Deleted,
    Restored,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::TimeChanged => "time_changed",
            Self::Duplicated => "duplicated",
            Self::SeriesCreated => "series_created",
            Self::SeriesUpdated => "series_updated",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
        }
    }
}

/// One field's value before and after a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub reservation_id: ReservationId,
    pub action: AuditAction,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

impl AuditEntry {
    pub fn new(
        reservation_id: ReservationId,
        action: AuditAction,
        ctx: &ActionContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            reservation_id,
            action,
            actor: ctx.actor.clone(),
            at: ctx.now,
            message: message.into(),
            changes: Vec::new(),
        }
    }

    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }
}

/// Tracked fields that differ between two versions of a reservation.
pub fn field_changes(old: &Reservation, new: &Reservation) -> Vec<FieldChange> {
    let pairs = [
        ("guest_name", json!(old.guest.name), json!(new.guest.name)),
        ("guest_room_number", json!(old.guest.room_number), json!(new.guest.room_number)),
        ("status", json!(old.status.as_str()), json!(new.status.as_str())),
        ("start", json!(old.start().to_rfc3339()), json!(new.start().to_rfc3339())),
        ("service_id", json!(old.service_id), json!(new.service_id)),
        ("specialist_id", json!(old.specialist_id), json!(new.specialist_id)),
        ("room_id", json!(old.room_id), json!(new.room_id)),
    ];
    pairs
        .into_iter()
        .filter(|(_, o, n)| o != n)
        .map(|(field, old, new)| FieldChange {
            field: field.to_string(),
            old,
            new,
        })
        .collect()
}

/// Append an entry and log it.
pub(crate) fn record<T: StoreTx + ?Sized>(
    tx: &mut T,
    entry: AuditEntry,
) -> Result<(), EngineError> {
    info!(
        reservation = %entry.reservation_id,
        action = entry.action.as_str(),
        actor = %entry.actor,
        changes = entry.changes.len(),
        "{}",
        entry.message
    );
    tx.append_audit(entry)
}
