//! Periodic scan windows with gated publication
//!
//! Discovery runs for a fixed window at the start of every cycle. Hits update
//! the registry live, but consumers only ever see the snapshot taken when a
//! window closes, after pruning everything that failed to reappear in it.
//! The scheduler is purely time-driven: the caller asks for the next deadline
//! and calls [`ScanScheduler::poll`] once it has passed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{validate_interval, ScanConfig};
use crate::errors::{ConfigError, RadioError};
use crate::protocol::SERVICE_UUID;
use crate::radio::CentralRadio;
use crate::registry::DeviceRegistry;
use crate::types::PeerDescriptor;

/// A discovery window currently open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanWindow {
    start: Instant,
    closes_at: Instant,
}

// ----------------------------------------------------------------------------
// Scan Scheduler
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ScanScheduler {
    interval: Duration,
    window_len: Duration,
    scanning: bool,
    window: Option<ScanWindow>,
    next_cycle: Option<Instant>,
    published: Vec<PeerDescriptor>,
}

impl ScanScheduler {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            interval: config.interval,
            window_len: config.window,
            scanning: false,
            window: None,
            next_cycle: None,
            published: Vec::new(),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_window_open(&self) -> bool {
        self.window.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn window_len(&self) -> Duration {
        self.window_len
    }

    /// Last snapshot published at a window boundary
    pub fn last_snapshot(&self) -> &[PeerDescriptor] {
        &self.published
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let close = self.window.map(|w| w.closes_at);
        match (close, self.next_cycle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run one cycle immediately and schedule the rest every `interval`.
    ///
    /// Returns false if scanning was already on.
    pub fn start<R: CentralRadio + ?Sized>(&mut self, radio: &mut R, now: Instant) -> bool {
        if self.scanning {
            return false;
        }
        self.scanning = true;
        info!(interval = ?self.interval, window = ?self.window_len, "Periodic scanning started");
        self.run_cycle(radio, now);
        self.next_cycle = Some(now + self.interval);
        true
    }

    /// Cancel the schedule and halt discovery.
    ///
    /// Returns the last completed snapshot for republication; a half-filled
    /// window is discarded. `None` if scanning was already off.
    pub fn stop<R: CentralRadio + ?Sized>(&mut self, radio: &mut R) -> Option<Vec<PeerDescriptor>> {
        if !self.scanning {
            return None;
        }
        self.scanning = false;
        self.next_cycle = None;
        self.window = None;
        issue(radio.stop_scan(), "stop scan");
        info!("Periodic scanning stopped");
        Some(self.published.clone())
    }

    /// Change the cycle interval.
    ///
    /// When scanning, the pending cycle is cancelled and the next one is
    /// scheduled a full new interval from `now`; an open window is left alone.
    pub fn set_interval(&mut self, interval: Duration, now: Instant) -> Result<(), ConfigError> {
        validate_interval(interval, self.window_len)?;
        self.interval = interval;
        if self.scanning {
            self.next_cycle = Some(now + interval);
            debug!(?interval, "Scan cycle rescheduled");
        }
        Ok(())
    }

    /// Stop in-flight discovery, open a fresh window at `now` and restart discovery
    pub fn run_cycle<R: CentralRadio + ?Sized>(&mut self, radio: &mut R, now: Instant) {
        if self.window.is_some() {
            issue(radio.stop_scan(), "stop scan");
        }
        self.window = Some(ScanWindow {
            start: now,
            closes_at: now + self.window_len,
        });
        issue(radio.start_scan(Some(SERVICE_UUID)), "start scan");
        debug!("Scan window opened");
    }

    /// Fire every action due at `now`.
    ///
    /// A due window close happens before a due cycle start. Returns the pruned
    /// snapshot when a window closed.
    pub fn poll<R: CentralRadio + ?Sized>(
        &mut self,
        radio: &mut R,
        registry: &mut DeviceRegistry,
        now: Instant,
    ) -> Option<Vec<PeerDescriptor>> {
        let mut snapshot = None;

        if let Some(window) = self.window.filter(|w| w.closes_at <= now) {
            self.window = None;
            issue(radio.stop_scan(), "stop scan");
            let pruned = registry.prune(window.start);
            let current = registry.snapshot();
            debug!(
                visible = current.len(),
                pruned = pruned.len(),
                "Scan window closed"
            );
            self.published = current.clone();
            snapshot = Some(current);
        }

        if let Some(due) = self.next_cycle.filter(|due| *due <= now) {
            let mut next = due + self.interval;
            while next <= now {
                next += self.interval;
            }
            self.next_cycle = Some(next);
            self.run_cycle(radio, now);
        }

        snapshot
    }
}

/// Discovery requests on an unready radio are skipped, never retried
fn issue(result: Result<(), RadioError>, operation: &str) {
    match result {
        Ok(()) => {}
        Err(RadioError::NotReady) => warn!("Radio not ready, skipping {}", operation),
        Err(e) => warn!("Failed to {}: {}", operation, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::VirtualAir;
    use crate::types::{PeerHandle, PeerId};

    fn seen(id: &str, at: Instant) -> PeerDescriptor {
        PeerDescriptor {
            id: PeerId::new(id),
            name: "MacChat".to_string(),
            signal_strength: -50,
            last_seen: at,
            handle: PeerHandle::new(1),
        }
    }

    #[test]
    fn test_window_close_prunes_and_publishes_once() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("central");
        let mut registry = DeviceRegistry::new();
        let mut scheduler = ScanScheduler::new(&ScanConfig::default());
        let t0 = Instant::now();

        registry.upsert(seen("stale", t0 - Duration::from_secs(1)));
        assert!(scheduler.start(&mut radio, t0));
        registry.upsert(seen("fresh", t0 + Duration::from_secs(1)));

        // Window still open: nothing to publish
        assert!(scheduler
            .poll(&mut radio, &mut registry, t0 + Duration::from_secs(2))
            .is_none());
        assert_eq!(scheduler.next_deadline(), Some(t0 + Duration::from_secs(3)));

        let snapshot = scheduler
            .poll(&mut radio, &mut registry, t0 + Duration::from_secs(3))
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, PeerId::new("fresh"));
        assert!(!scheduler.is_window_open());
        assert_eq!(scheduler.next_deadline(), Some(t0 + Duration::from_secs(10)));

        // Nothing further until the next cycle
        assert!(scheduler
            .poll(&mut radio, &mut registry, t0 + Duration::from_secs(5))
            .is_none());
    }

    #[test]
    fn test_stop_republishes_last_completed_snapshot() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("central");
        let mut registry = DeviceRegistry::new();
        let mut scheduler = ScanScheduler::new(&ScanConfig::default());
        let t0 = Instant::now();

        scheduler.start(&mut radio, t0);
        registry.upsert(seen("a", t0));
        scheduler.poll(&mut radio, &mut registry, t0 + Duration::from_secs(3));

        // Next window opens and sees a new peer, then scanning stops mid-window
        scheduler.poll(&mut radio, &mut registry, t0 + Duration::from_secs(10));
        registry.upsert(seen("b", t0 + Duration::from_secs(11)));
        let republished = scheduler.stop(&mut radio).unwrap();

        assert_eq!(republished.len(), 1);
        assert_eq!(republished[0].id, PeerId::new("a"));
        assert_eq!(scheduler.next_deadline(), None);
        assert!(scheduler.stop(&mut radio).is_none());
    }

    #[test]
    fn test_set_interval_reschedules_from_now() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("central");
        let mut registry = DeviceRegistry::new();
        let mut scheduler = ScanScheduler::new(&ScanConfig::default());
        let t0 = Instant::now();

        scheduler.start(&mut radio, t0);
        scheduler.poll(&mut radio, &mut registry, t0 + Duration::from_secs(3));
        scheduler
            .set_interval(Duration::from_secs(20), t0 + Duration::from_secs(4))
            .unwrap();
        assert_eq!(scheduler.next_deadline(), Some(t0 + Duration::from_secs(24)));

        assert!(scheduler
            .set_interval(Duration::from_secs(1), t0 + Duration::from_secs(5))
            .is_err());
        assert_eq!(scheduler.interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_set_interval_while_stopped_applies_on_start() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("central");
        let mut scheduler = ScanScheduler::new(&ScanConfig::default());
        let t0 = Instant::now();

        scheduler.set_interval(Duration::from_secs(4), t0).unwrap();
        assert_eq!(scheduler.next_deadline(), None);

        scheduler.start(&mut radio, t0);
        scheduler.window = None;
        assert_eq!(scheduler.next_deadline(), Some(t0 + Duration::from_secs(4)));
    }

    #[test]
    fn test_late_poll_skips_missed_cycles() {
        let air = VirtualAir::new();
        let (mut radio, _events) = air.central("central");
        let mut registry = DeviceRegistry::new();
        let mut scheduler = ScanScheduler::new(&ScanConfig::default());
        let t0 = Instant::now();

        scheduler.start(&mut radio, t0);
        // Poll far past several boundaries: one close, one new cycle
        let snapshot = scheduler.poll(&mut radio, &mut registry, t0 + Duration::from_secs(35));
        assert!(snapshot.is_some());
        assert!(scheduler.is_window_open());
        assert_eq!(
            scheduler.next_deadline(),
            Some(t0 + Duration::from_secs(38))
        );
    }
}
