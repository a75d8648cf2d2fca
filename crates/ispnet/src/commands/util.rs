//! Shared helpers for command handlers.

use std::io::IsTerminal;

use ispnet_core::{
    CoreError, DeviceId, DeviceKind, DeviceSelector, EntityType, FleetOutcome, FleetReport,
};
use uuid::Uuid;

use crate::cli::{EntityArg, KindArg, SelectorArgs};
use crate::error::CliError;

pub fn kind(arg: KindArg) -> DeviceKind {
    match arg {
        KindArg::Router => DeviceKind::Router,
        KindArg::Olt => DeviceKind::Olt,
    }
}

pub fn entity(arg: EntityArg) -> EntityType {
    match arg {
        EntityArg::Pool => EntityType::IpPool,
        EntityArg::Profile => EntityType::PppProfile,
        EntityArg::Secret => EntityType::PppSecret,
        EntityArg::Onu => EntityType::Onu,
    }
}

pub fn selector(args: &SelectorArgs) -> DeviceSelector {
    if args.all {
        return DeviceSelector::all(args.kind.map(kind));
    }
    DeviceSelector {
        ids: args.devices.iter().map(|d| DeviceId::new(d.as_str())).collect(),
        kind: args.kind.map(kind),
        all: false,
    }
}

pub fn parse_uuid(field: &str, value: &str) -> Result<Uuid, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a valid id"),
    })
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

// ── Fleet results ───────────────────────────────────────────────────

/// A fleet report split into what worked and what did not.
pub struct Settled<T> {
    pub completed: Vec<(DeviceId, T)>,
    pub failures: Vec<(DeviceId, CoreError)>,
    pub skipped: Vec<DeviceId>,
}

impl<T> Settled<T> {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failures.len() + self.skipped.len()
    }

    /// Report failures on stderr and turn the run into an exit status.
    ///
    /// A single-device run surfaces that device's own error.
    pub fn finish(self) -> Result<(), CliError> {
        let total = self.total();
        for (device, err) in &self.failures {
            eprintln!("{device}: {err}");
        }
        for device in &self.skipped {
            eprintln!("{device}: skipped (interrupted)");
        }

        let failed = self.failures.len();
        if total == 1 {
            if let Some((_, err)) = self.failures.into_iter().next() {
                return Err(err.into());
            }
        }
        if failed > 0 {
            return Err(CliError::Partial { failed, total });
        }
        if !self.skipped.is_empty() {
            return Err(CliError::Cancelled);
        }
        Ok(())
    }
}

pub fn settle<T>(report: FleetReport<T>) -> Settled<T> {
    let mut settled = Settled {
        completed: Vec::new(),
        failures: Vec::new(),
        skipped: Vec::new(),
    };
    for (device, outcome) in report.results {
        match outcome {
            FleetOutcome::Completed(value) => settled.completed.push((device, value)),
            FleetOutcome::Failed(err) => settled.failures.push((device, err)),
            FleetOutcome::Skipped => settled.skipped.push(device),
        }
    }
    settled
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn report(outcomes: Vec<(&str, FleetOutcome<u32>)>) -> FleetReport<u32> {
        FleetReport {
            results: outcomes
                .into_iter()
                .map(|(id, outcome)| (DeviceId::new(id), outcome))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn single_device_failure_keeps_its_exit_code() {
        let settled = settle(report(vec![(
            "r1",
            FleetOutcome::Failed(CoreError::device_not_found(&DeviceId::new("r1"))),
        )]));
        let err = settled.finish().err();
        assert!(matches!(err, Some(CliError::NotFound { .. })));
    }

    #[test]
    fn mixed_fleet_is_partial() {
        let settled = settle(report(vec![
            ("r1", FleetOutcome::Completed(1)),
            ("r2", FleetOutcome::Failed(CoreError::Cancelled)),
            ("r3", FleetOutcome::Skipped),
        ]));
        assert_eq!(settled.total(), 3);
        assert_eq!(settled.completed.len(), 1);
        let err = settled.finish().err();
        assert!(matches!(err, Some(CliError::Partial { failed: 1, total: 3 })));
    }

    #[test]
    fn selector_all_ignores_ids() {
        let args = SelectorArgs {
            devices: Vec::new(),
            kind: Some(KindArg::Olt),
            all: true,
        };
        let sel = selector(&args);
        assert!(sel.all);
        assert_eq!(sel.kind, Some(DeviceKind::Olt));
    }
}
