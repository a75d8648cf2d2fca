// ── Health monitor ──
//
// Each probe is bounded by `probe_timeout`. A probe that fails to reach
// the device yields an `offline` report, not an error; only an unknown
// device id is an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use ispnet_api::routeros::menu;
use ispnet_api::{Oid, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{CoreError, DeviceResultExt};
use crate::fleet::run_fleet;
use crate::model::{
    DeviceDescriptor, DeviceId, DeviceKind, DeviceStatus, FleetHealth, HealthReport,
    ResourceSample,
};
use crate::notify::{Event, Notifier, notify_quietly};
use crate::registry::DeviceRegistry;
use crate::session::{DeviceTransport, release};
use crate::store::HealthLog;
use crate::vendor::SYS_DESCR;

#[async_trait]
pub trait HealthMonitor: Send + Sync {
    /// Probe one device and record the result.
    async fn check_device(&self, device: &DeviceId) -> Result<HealthReport, CoreError>;

    /// Probe many devices concurrently. One failure never hides another.
    async fn check_fleet(&self, devices: Vec<DeviceId>, cancel: &CancellationToken)
    -> FleetHealth;
}

/// Probe thresholds and limits, taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    pub probe_timeout: Duration,
    pub cpu_warning_pct: f64,
    pub memory_warning_pct: f64,
    pub concurrency: usize,
}

impl From<&EngineConfig> for ProbeSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            cpu_warning_pct: config.cpu_warning_pct,
            memory_warning_pct: config.memory_warning_pct,
            concurrency: config.concurrency,
        }
    }
}

/// What a successful probe found.
struct ProbeReading {
    resources: Option<ResourceSample>,
    message: String,
}

pub struct DeviceHealthMonitor {
    registry: Arc<dyn DeviceRegistry>,
    transport: Arc<dyn DeviceTransport>,
    log: Arc<dyn HealthLog>,
    notifier: Arc<dyn Notifier>,
    settings: ProbeSettings,
}

impl DeviceHealthMonitor {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        transport: Arc<dyn DeviceTransport>,
        log: Arc<dyn HealthLog>,
        notifier: Arc<dyn Notifier>,
        settings: ProbeSettings,
    ) -> Self {
        Self {
            registry,
            transport,
            log,
            notifier,
            settings,
        }
    }

    async fn probe(&self, descriptor: &DeviceDescriptor) -> Result<ProbeReading, CoreError> {
        match descriptor.kind {
            DeviceKind::Router => self.probe_router(descriptor).await,
            DeviceKind::Olt => self.probe_olt(descriptor).await,
        }
    }

    async fn probe_router(&self, descriptor: &DeviceDescriptor) -> Result<ProbeReading, CoreError> {
        let device = &descriptor.id;
        let mut session = self.transport.open_router(descriptor).await?;
        let rows = session
            .print(menu::SYSTEM_RESOURCE, &[])
            .await
            .for_device(device);
        release(session, device).await;

        let row = rows?.into_iter().next().ok_or_else(|| CoreError::Protocol {
            device: device.clone(),
            message: "empty /system/resource reply".into(),
        })?;
        let sample = resource_sample(&row);
        let message = self.assess(&sample).unwrap_or_else(|| "ok".into());
        Ok(ProbeReading {
            resources: Some(sample),
            message,
        })
    }

    async fn probe_olt(&self, descriptor: &DeviceDescriptor) -> Result<ProbeReading, CoreError> {
        let device = &descriptor.id;
        let oid: Oid = SYS_DESCR.parse().for_device(device)?;
        let mut session = self.transport.open_snmp(descriptor).await?;
        let value = session.get(&oid).await.for_device(device)?;
        if value.is_exception() {
            return Err(CoreError::Protocol {
                device: device.clone(),
                message: "sysDescr not available".into(),
            });
        }
        Ok(ProbeReading {
            resources: None,
            message: value.as_text().unwrap_or_else(|| "ok".into()),
        })
    }

    /// Threshold breach description, if any.
    fn assess(&self, sample: &ResourceSample) -> Option<String> {
        let mut breaches = Vec::new();
        if let Some(cpu) = sample.cpu_load_pct.filter(|c| *c >= self.settings.cpu_warning_pct) {
            breaches.push(format!("cpu load {cpu:.0}%"));
        }
        if let Some(mem) = sample
            .memory_used_pct
            .filter(|m| *m >= self.settings.memory_warning_pct)
        {
            breaches.push(format!("memory used {mem:.0}%"));
        }
        (!breaches.is_empty()).then(|| breaches.join(", "))
    }

    fn report(
        &self,
        device: &DeviceId,
        outcome: Result<ProbeReading, CoreError>,
        elapsed: Duration,
    ) -> HealthReport {
        let checked_at = Utc::now();
        let latency_ms = u64::try_from(elapsed.as_millis()).ok();
        match outcome {
            Ok(reading) => {
                let degraded = reading
                    .resources
                    .as_ref()
                    .and_then(|s| self.assess(s))
                    .is_some();
                HealthReport {
                    device_id: device.clone(),
                    reachable: true,
                    latency_ms,
                    status: if degraded {
                        DeviceStatus::Warning
                    } else {
                        DeviceStatus::Online
                    },
                    message: reading.message,
                    resources: reading.resources,
                    error: None,
                    checked_at,
                }
            }
            Err(e) => {
                let unreachable = matches!(
                    e,
                    CoreError::Connection { .. } | CoreError::Timeout { .. }
                );
                HealthReport {
                    device_id: device.clone(),
                    reachable: !unreachable,
                    latency_ms: (!unreachable).then_some(latency_ms).flatten(),
                    status: if unreachable {
                        DeviceStatus::Offline
                    } else {
                        DeviceStatus::Warning
                    },
                    message: e.to_string(),
                    resources: None,
                    error: Some(e.kind()),
                    checked_at,
                }
            }
        }
    }

    async fn record(&self, report: &HealthReport, previous: DeviceStatus) {
        let device = &report.device_id;
        self.registry
            .record_status(device, report.status, report.checked_at)
            .await;
        if let Err(e) = self.log.record_health_check(report).await {
            warn!(device = %device, error = %e, "health log write failed");
        }

        let was_offline = previous == DeviceStatus::Offline;
        let is_offline = report.status == DeviceStatus::Offline;
        let event = match (was_offline, is_offline) {
            (false, true) => Some(Event::DeviceUnreachable {
                device_id: device.clone(),
                reason: report.message.clone(),
            }),
            (true, false) => Some(Event::DeviceRecovered {
                device_id: device.clone(),
            }),
            _ => None,
        };
        if let Some(event) = event {
            notify_quietly(self.notifier.as_ref(), event).await;
        }
    }
}

#[async_trait]
impl HealthMonitor for DeviceHealthMonitor {
    async fn check_device(&self, device: &DeviceId) -> Result<HealthReport, CoreError> {
        let descriptor = self.registry.resolve(device).await?;
        let previous = self
            .registry
            .get(device)
            .await
            .map_or(DeviceStatus::Unknown, |d| d.status);

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.settings.probe_timeout,
            self.probe(&descriptor),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Timeout {
                device: device.clone(),
                timeout: self.settings.probe_timeout,
            }),
        };
        let report = self.report(device, outcome, started.elapsed());

        if report.is_healthy() {
            debug!(device = %device, status = %report.status, latency_ms = ?report.latency_ms, "probe ok");
        } else if report.reachable {
            warn!(device = %device, message = %report.message, "probe failed");
        } else {
            warn!(device = %device, message = %report.message, "device unreachable");
        }
        self.record(&report, previous).await;
        Ok(report)
    }

    async fn check_fleet(
        &self,
        devices: Vec<DeviceId>,
        cancel: &CancellationToken,
    ) -> FleetHealth {
        let fleet = run_fleet(devices, self.settings.concurrency, cancel, |id| async move {
            self.check_device(&id).await
        })
        .await;

        let mut health = FleetHealth::default();
        for (id, err) in fleet.failed() {
            health.errors.push((id.clone(), err.to_string()));
        }
        health.skipped = fleet.skipped().cloned().collect();
        for (_, report) in fleet.completed() {
            if report.is_healthy() {
                health.healthy += 1;
            } else {
                health.unhealthy += 1;
            }
            health.reports.push(report.clone());
        }

        info!(
            devices = fleet.len(),
            healthy = health.healthy,
            unhealthy = health.unhealthy,
            errors = health.errors.len(),
            skipped = health.skipped.len(),
            "fleet health check finished"
        );
        health
    }
}

/// Parse a `/system/resource` row. Missing or garbled fields stay `None`.
fn resource_sample(row: &Row) -> ResourceSample {
    let number = |key: &str| row.get(key).and_then(|v| v.trim().parse::<f64>().ok());
    let memory_used_pct = match (number("free-memory"), number("total-memory")) {
        (Some(free), Some(total)) if total > 0.0 => Some((total - free) / total * 100.0),
        _ => None,
    };
    ResourceSample {
        cpu_load_pct: number("cpu-load"),
        memory_used_pct,
        uptime: row.get("uptime").map(str::to_owned),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn resource_row_parses() {
        let row = Row::from([
            ("cpu-load", "12"),
            ("free-memory", "250"),
            ("total-memory", "1000"),
            ("uptime", "3d04:05:06"),
        ]);
        let sample = resource_sample(&row);
        assert_eq!(sample.cpu_load_pct, Some(12.0));
        assert!((sample.memory_used_pct.unwrap() - 75.0).abs() < f64::EPSILON);
        assert_eq!(sample.uptime.as_deref(), Some("3d04:05:06"));
    }

    #[test]
    fn garbled_resource_fields_are_none() {
        let row = Row::from([("cpu-load", "n/a"), ("total-memory", "0")]);
        let sample = resource_sample(&row);
        assert_eq!(sample.cpu_load_pct, None);
        assert_eq!(sample.memory_used_pct, None);
        assert_eq!(sample.uptime, None);
    }
}
