// ── Sync results ──

use serde::Serialize;
use strum::Display;

use crate::error::{CoreError, ErrorKind};
use crate::model::{DeviceId, EntityType};
use crate::store::UpsertOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncDirection {
    Import,
    Mirror,
    Prune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Partial,
    Failure,
}

/// Why one record could not be synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-record effect of a sync step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChange {
    Created,
    Updated,
    Unchanged,
    Deleted,
}

impl From<UpsertOutcome> for RecordChange {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Created => Self::Created,
            UpsertOutcome::Updated => Self::Updated,
            UpsertOutcome::Unchanged => Self::Unchanged,
        }
    }
}

/// Summary of one sync run.
///
/// `succeeded + failed == total`; records skipped by filters are counted
/// separately and are not part of `total`. A cancelled run is `partial`
/// (or `failure` when nothing succeeded) even with no record errors.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub device_id: DeviceId,
    pub entity_type: EntityType,
    pub direction: SyncDirection,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
    pub dry_run: bool,
    /// The run stopped early on cancellation.
    pub cancelled: bool,
    pub outcome: SyncOutcome,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Success
    }
}

/// Accumulator for one run, consumed by `finish`.
#[derive(Debug)]
pub(crate) struct SyncTally {
    device_id: DeviceId,
    entity_type: EntityType,
    direction: SyncDirection,
    dry_run: bool,
    created: usize,
    updated: usize,
    unchanged: usize,
    deleted: usize,
    skipped: usize,
    errors: Vec<RecordError>,
    cancelled: bool,
}

impl SyncTally {
    pub(crate) fn new(
        device_id: DeviceId,
        entity_type: EntityType,
        direction: SyncDirection,
        dry_run: bool,
    ) -> Self {
        Self {
            device_id,
            entity_type,
            direction,
            dry_run,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            skipped: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub(crate) fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub(crate) fn record(&mut self, change: RecordChange) {
        match change {
            RecordChange::Created => self.created += 1,
            RecordChange::Updated => self.updated += 1,
            RecordChange::Unchanged => self.unchanged += 1,
            RecordChange::Deleted => self.deleted += 1,
        }
    }

    pub(crate) fn fail(&mut self, key: impl Into<String>, err: &CoreError) {
        self.errors.push(RecordError {
            key: key.into(),
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub(crate) fn skip(&mut self) {
        self.skipped += 1;
    }

    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub(crate) fn finish(self) -> SyncResult {
        let succeeded = self.created + self.updated + self.unchanged + self.deleted;
        let failed = self.errors.len();
        let total = succeeded + failed;
        // A cancelled run never reached some records, so it cannot succeed.
        let outcome = if (failed > 0 && failed == total) || (self.cancelled && succeeded == 0) {
            SyncOutcome::Failure
        } else if failed > 0 || self.cancelled {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Success
        };

        SyncResult {
            device_id: self.device_id,
            entity_type: self.entity_type,
            direction: self.direction,
            total,
            succeeded,
            failed,
            created: self.created,
            updated: self.updated,
            unchanged: self.unchanged,
            deleted: self.deleted,
            skipped: self.skipped,
            errors: self.errors,
            dry_run: self.dry_run,
            cancelled: self.cancelled,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally() -> SyncTally {
        SyncTally::new(
            DeviceId::new("r1"),
            EntityType::PppSecret,
            SyncDirection::Mirror,
            false,
        )
    }

    fn boom() -> CoreError {
        CoreError::Rejected {
            device: DeviceId::new("r1"),
            message: "failure: bad profile".into(),
        }
    }

    #[test]
    fn empty_run_is_success() {
        let result = tally().finish();
        assert_eq!(result.total, 0);
        assert_eq!(result.outcome, SyncOutcome::Success);
    }

    #[test]
    fn outcome_rules() {
        let mut partial = tally();
        partial.record(RecordChange::Created);
        partial.fail("bob", &boom());
        let partial = partial.finish();
        assert_eq!(partial.outcome, SyncOutcome::Partial);
        assert_eq!(partial.succeeded + partial.failed, partial.total);
        assert_eq!(partial.errors[0].kind, ErrorKind::Protocol);

        let mut failure = tally();
        failure.fail("amy", &boom());
        failure.fail("bob", &boom());
        assert_eq!(failure.finish().outcome, SyncOutcome::Failure);
    }

    #[test]
    fn cancelled_run_is_never_success() {
        let mut untouched = tally();
        untouched.cancel();
        assert_eq!(untouched.finish().outcome, SyncOutcome::Failure);

        let mut halfway = tally();
        halfway.record(RecordChange::Created);
        halfway.cancel();
        let halfway = halfway.finish();
        assert_eq!(halfway.outcome, SyncOutcome::Partial);
        assert!(!halfway.is_success());
        assert_eq!(halfway.succeeded + halfway.failed, halfway.total);
    }

    #[test]
    fn skipped_records_stay_out_of_total() {
        let mut t = tally();
        t.skip();
        t.record(RecordChange::Unchanged);
        let result = t.finish();
        assert_eq!(result.total, 1);
        assert_eq!(result.skipped, 1);
    }
}
