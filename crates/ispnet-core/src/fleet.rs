// ── Fleet fan-out ──
//
// Runs one async operation per device with bounded concurrency. Each
// device is reported exactly once; devices not yet started when the run
// is cancelled are reported as skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{DeviceId, DeviceKind};

/// Which devices a fleet operation targets.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    pub ids: Vec<DeviceId>,
    pub kind: Option<DeviceKind>,
    /// Every registered device (optionally narrowed by `kind`).
    pub all: bool,
}

impl DeviceSelector {
    pub fn ids(ids: impl IntoIterator<Item = DeviceId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn all(kind: Option<DeviceKind>) -> Self {
        Self {
            ids: Vec::new(),
            kind,
            all: true,
        }
    }
}

#[derive(Debug)]
pub enum FleetOutcome<T> {
    Completed(T),
    Failed(CoreError),
    Skipped,
}

/// Per-device outcomes of a fleet run, ordered by device id.
#[derive(Debug)]
pub struct FleetReport<T> {
    pub results: BTreeMap<DeviceId, FleetOutcome<T>>,
}

impl<T> FleetReport<T> {
    pub fn completed(&self) -> impl Iterator<Item = (&DeviceId, &T)> {
        self.results.iter().filter_map(|(id, outcome)| match outcome {
            FleetOutcome::Completed(value) => Some((id, value)),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = (&DeviceId, &CoreError)> {
        self.results.iter().filter_map(|(id, outcome)| match outcome {
            FleetOutcome::Failed(err) => Some((id, err)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &DeviceId> {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, FleetOutcome::Skipped))
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Every device completed.
    pub fn all_completed(&self) -> bool {
        self.results
            .values()
            .all(|outcome| matches!(outcome, FleetOutcome::Completed(_)))
    }
}

/// Run `op` for each distinct device, at most `concurrency` at a time.
pub async fn run_fleet<T, F, Fut>(
    devices: impl IntoIterator<Item = DeviceId>,
    concurrency: usize,
    cancel: &CancellationToken,
    op: F,
) -> FleetReport<T>
where
    F: Fn(DeviceId) -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut seen = BTreeSet::new();
    let targets: Vec<DeviceId> = devices
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect();
    debug!(devices = targets.len(), concurrency, "starting fleet run");

    let op = &op;
    let results = futures::stream::iter(targets)
        .map(|id| async move {
            if cancel.is_cancelled() {
                return (id, FleetOutcome::Skipped);
            }
            let outcome = match op(id.clone()).await {
                Ok(value) => FleetOutcome::Completed(value),
                Err(CoreError::Cancelled) => FleetOutcome::Skipped,
                Err(e) => FleetOutcome::Failed(e),
            };
            (id, outcome)
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<BTreeMap<_, _>>()
        .await;

    FleetReport { results }
}
