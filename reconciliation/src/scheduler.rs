//! Auto-open job
//!
//! Periodically asks the roster which riders are on shift today and opens
//! their daily report if it does not exist yet. Failures are logged and the
//! loop keeps running.

use crate::service::DailyReconciliation;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::Actor;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Rider on shift, as reported by the roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftStart {
    /// Rider ID
    pub rider_id: String,
    /// When the shift started
    pub started_at: DateTime<Utc>,
}

/// Shift roster collaborator
#[async_trait]
pub trait RiderRoster: Send + Sync {
    /// Riders whose shift started on `date`
    async fn riders_on_shift(&self, date: NaiveDate) -> anyhow::Result<Vec<ShiftStart>>;
}

/// Roster kept in memory
#[derive(Debug, Default)]
pub struct InMemoryRoster {
    shifts: RwLock<Vec<(NaiveDate, ShiftStart)>>,
}

impl InMemoryRoster {
    /// Create empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shift start on a business day
    pub fn start_shift(&self, date: NaiveDate, rider_id: impl Into<String>, started_at: DateTime<Utc>) {
        self.shifts.write().push((
            date,
            ShiftStart {
                rider_id: rider_id.into(),
                started_at,
            },
        ));
    }
}

#[async_trait]
impl RiderRoster for InMemoryRoster {
    async fn riders_on_shift(&self, date: NaiveDate) -> anyhow::Result<Vec<ShiftStart>> {
        Ok(self
            .shifts
            .read()
            .iter()
            .filter(|(d, _)| *d == date)
            .map(|(_, s)| s.clone())
            .collect())
    }
}

/// Opens daily reports for riders on shift
pub struct AutoOpenJob {
    service: Arc<DailyReconciliation>,
    roster: Arc<dyn RiderRoster>,
    interval: Duration,
}

impl std::fmt::Debug for AutoOpenJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoOpenJob")
            .field("interval", &self.interval)
            .finish()
    }
}

impl AutoOpenJob {
    /// Create job with the configured interval
    pub fn new(
        service: Arc<DailyReconciliation>,
        roster: Arc<dyn RiderRoster>,
        interval: Duration,
    ) -> Self {
        Self {
            service,
            roster,
            interval,
        }
    }

    /// Spawn the job loop; abort the handle to stop it
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run the job loop forever
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Starting daily report auto-open job");

        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;

            let today = self.service.calendar().today();
            if let Err(e) = self.run_once(today).await {
                warn!("Auto-open sweep failed: {}", e);
            }
        }
    }

    /// One sweep for `date`. Returns how many riders now have a report.
    pub async fn run_once(&self, date: NaiveDate) -> Result<usize> {
        let shifts = self
            .roster
            .riders_on_shift(date)
            .await
            .map_err(|e| crate::Error::Collaborator(format!("Roster lookup failed: {:#}", e)))?;

        let system = Actor::system();
        let mut opened = 0;
        for shift in &shifts {
            match self
                .service
                .open_report(&shift.rider_id, date, shift.started_at, &system)
            {
                Ok(_) => opened += 1,
                Err(e) => warn!(rider_id = %shift.rider_id, error = %e, "Auto-open failed"),
            }
        }

        debug!(date = %date, riders = shifts.len(), opened, "Auto-open sweep done");
        Ok(opened)
    }
}
