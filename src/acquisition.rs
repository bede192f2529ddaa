//! Frame acquisition loop.
//!
//! One loop polls both stream sources at a fixed period and routes each frame
//! into its stream's hand-off slot. A failed read and an occupied slot are
//! handled the same way: the source is closed and reopened. A slow worker
//! therefore costs frames and a reconnect, never memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::StreamKind;
use crate::handoff::HandoffSlot;
use crate::ingest::StreamSource;
use crate::pipeline::Shutdown;

pub const DEFAULT_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

// Upper bound on one sleep between ticks, so shutdown is noticed promptly
// even at very low frame rates.
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Per-stream counters, shared with the pipeline handle.
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    frames_captured: AtomicU64,
    frames_handed_off: AtomicU64,
    frames_dropped: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    connect_failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionStatsSnapshot {
    pub frames_captured: u64,
    pub frames_handed_off: u64,
    pub frames_dropped: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub connect_failures: u64,
}

impl AcquisitionStats {
    pub fn snapshot(&self) -> AcquisitionStatsSnapshot {
        AcquisitionStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_handed_off: self.frames_handed_off.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Connection bookkeeping for one source. Owned by the loop, never shared.
#[derive(Clone, Debug, Default)]
pub struct StreamState {
    pub last_successful_read: Option<Instant>,
    /// Reconnects since the last successful read.
    pub reconnect_attempts: u32,
    pub connected: bool,
}

struct Lane {
    source: Box<dyn StreamSource>,
    slot: Arc<HandoffSlot>,
    state: StreamState,
    stats: Arc<AcquisitionStats>,
}

/// What one tick did for one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    HandedOff,
    /// A frame was read but the slot was still occupied.
    Dropped,
    /// No frame this tick: the read failed or the source was down.
    NoFrame,
}

pub struct AcquisitionLoop {
    lanes: Vec<Lane>,
    period: Duration,
    health_interval: Duration,
    last_health_log: Option<Instant>,
}

impl AcquisitionLoop {
    /// `optical` and `thermal` are paired with the slots their workers drain.
    pub fn new(
        optical: (Box<dyn StreamSource>, Arc<HandoffSlot>),
        thermal: (Box<dyn StreamSource>, Arc<HandoffSlot>),
        period: Duration,
    ) -> Self {
        let lanes = [optical, thermal]
            .into_iter()
            .map(|(source, slot)| Lane {
                source,
                slot,
                state: StreamState::default(),
                stats: Arc::new(AcquisitionStats::default()),
            })
            .collect();
        Self {
            lanes,
            period,
            health_interval: DEFAULT_HEALTH_LOG_INTERVAL,
            last_health_log: None,
        }
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self, stream: StreamKind) -> Option<Arc<AcquisitionStats>> {
        self.lane(stream).map(|lane| lane.stats.clone())
    }

    pub fn state(&self, stream: StreamKind) -> Option<&StreamState> {
        self.lane(stream).map(|lane| &lane.state)
    }

    fn lane(&self, stream: StreamKind) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.source.stream() == stream)
    }

    /// Open every source that is not already open. Connect failures are
    /// logged and left for the next tick to retry.
    pub fn open_all(&mut self) {
        for lane in &mut self.lanes {
            if !lane.source.is_open() {
                connect(lane);
            }
        }
    }

    pub fn close_all(&mut self) {
        for lane in &mut self.lanes {
            lane.source.close();
            lane.state.connected = false;
        }
    }

    /// Read one frame per source and route it.
    pub fn tick_at(&mut self, now: Instant) -> Vec<(StreamKind, TickOutcome)> {
        self.lanes
            .iter_mut()
            .map(|lane| (lane.source.stream(), poll_lane(lane, now)))
            .collect()
    }

    pub fn tick(&mut self) -> Vec<(StreamKind, TickOutcome)> {
        self.tick_at(Instant::now())
    }

    /// Tick at the configured period until shutdown. Sources are opened on
    /// entry and closed on exit.
    pub fn run(&mut self, shutdown: &Shutdown) {
        log::info!(
            "acquisition loop started (period {:.3}s)",
            self.period.as_secs_f64()
        );
        self.open_all();
        let mut next_tick = Instant::now();
        while !shutdown.is_triggered() {
            let now = Instant::now();
            if now < next_tick {
                std::thread::sleep((next_tick - now).min(MAX_IDLE_SLEEP));
                continue;
            }
            self.tick_at(now);
            self.log_health_if_due(now);
            next_tick += self.period;
            if next_tick <= now {
                // Fell behind (slow reconnect); realign instead of bursting.
                next_tick = now + self.period;
            }
        }
        self.close_all();
        log::info!("acquisition loop stopped");
    }

    fn log_health_if_due(&mut self, now: Instant) {
        let due = match self.last_health_log {
            None => {
                self.last_health_log = Some(now);
                false
            }
            Some(last) => now.saturating_duration_since(last) >= self.health_interval,
        };
        if !due {
            return;
        }
        self.last_health_log = Some(now);
        for lane in &self.lanes {
            let s = lane.stats.snapshot();
            log::info!(
                "{} stream health: captured={} handed_off={} dropped={} read_failures={} reconnects={} connected={}",
                lane.source.stream(),
                s.frames_captured,
                s.frames_handed_off,
                s.frames_dropped,
                s.read_failures,
                s.reconnects,
                lane.state.connected
            );
        }
    }
}

fn poll_lane(lane: &mut Lane, now: Instant) -> TickOutcome {
    let stream = lane.source.stream();
    let frame = if lane.source.is_open() {
        match lane.source.read() {
            Ok(frame) => Some(frame),
            Err(err) => {
                log::warn!("{}", err);
                AcquisitionStats::bump(&lane.stats.read_failures);
                None
            }
        }
    } else {
        None
    };

    let outcome = match frame {
        Some(frame) => {
            AcquisitionStats::bump(&lane.stats.frames_captured);
            lane.state.last_successful_read = Some(now);
            lane.state.reconnect_attempts = 0;
            match lane.slot.try_put(frame) {
                Ok(()) => {
                    AcquisitionStats::bump(&lane.stats.frames_handed_off);
                    return TickOutcome::HandedOff;
                }
                Err(_dropped) => {
                    log::warn!("{} worker has not taken the previous frame; dropping", stream);
                    AcquisitionStats::bump(&lane.stats.frames_dropped);
                    TickOutcome::Dropped
                }
            }
        }
        None => TickOutcome::NoFrame,
    };

    reconnect(lane);
    outcome
}

fn reconnect(lane: &mut Lane) {
    lane.source.close();
    lane.state.connected = false;
    lane.state.reconnect_attempts = lane.state.reconnect_attempts.saturating_add(1);
    AcquisitionStats::bump(&lane.stats.reconnects);
    log::warn!(
        "{} stream reconnecting to {} (attempt {})",
        lane.source.stream(),
        lane.source.target(),
        lane.state.reconnect_attempts
    );
    connect(lane);
}

fn connect(lane: &mut Lane) {
    match lane.source.open() {
        Ok(()) => lane.state.connected = true,
        Err(err) => {
            log::warn!("{}", err);
            AcquisitionStats::bump(&lane.stats.connect_failures);
            lane.state.connected = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, PipelineResult};
    use crate::frame::Frame;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        opens: u32,
        closes: u32,
        reads: u32,
    }

    /// Counts calls; reads fail while `fail_reads` is set and opens fail
    /// while `refuse_opens` is non-zero.
    struct CountingSource {
        stream: StreamKind,
        open: bool,
        fail_reads: bool,
        refuse_opens: u32,
        calls: Arc<Mutex<Calls>>,
    }

    impl CountingSource {
        fn new(stream: StreamKind) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let source = Self {
                stream,
                open: false,
                fail_reads: false,
                refuse_opens: 0,
                calls: calls.clone(),
            };
            (source, calls)
        }
    }

    impl StreamSource for CountingSource {
        fn stream(&self) -> StreamKind {
            self.stream
        }

        fn target(&self) -> &str {
            "counting://"
        }

        fn open(&mut self) -> PipelineResult<()> {
            self.calls.lock().unwrap().opens += 1;
            if self.refuse_opens > 0 {
                self.refuse_opens -= 1;
                return Err(PipelineError::ConnectFailed {
                    stream: self.stream,
                    target: "counting://".to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.open = true;
            Ok(())
        }

        fn read(&mut self) -> PipelineResult<Frame> {
            self.calls.lock().unwrap().reads += 1;
            if !self.open || self.fail_reads {
                return Err(PipelineError::ReadFailed {
                    stream: self.stream,
                    reason: "scripted".to_string(),
                });
            }
            Ok(Frame::new(self.stream, 2, 2, vec![0u8; 12]).unwrap())
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().closes += 1;
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    struct Rig {
        acquisition: AcquisitionLoop,
        optical_slot: Arc<HandoffSlot>,
        thermal_slot: Arc<HandoffSlot>,
        optical_calls: Arc<Mutex<Calls>>,
        thermal_calls: Arc<Mutex<Calls>>,
    }

    fn rig(configure_optical: impl FnOnce(&mut CountingSource)) -> Rig {
        let (mut optical, optical_calls) = CountingSource::new(StreamKind::Optical);
        configure_optical(&mut optical);
        let (thermal, thermal_calls) = CountingSource::new(StreamKind::Thermal);
        let optical_slot = Arc::new(HandoffSlot::new());
        let thermal_slot = Arc::new(HandoffSlot::new());
        let mut acquisition = AcquisitionLoop::new(
            (Box::new(optical), optical_slot.clone()),
            (Box::new(thermal), thermal_slot.clone()),
            Duration::from_secs(1),
        );
        acquisition.open_all();
        Rig {
            acquisition,
            optical_slot,
            thermal_slot,
            optical_calls,
            thermal_calls,
        }
    }

    #[test]
    fn healthy_tick_fills_both_slots() {
        let mut rig = rig(|_| {});
        let outcomes = rig.acquisition.tick();
        assert_eq!(
            outcomes,
            vec![
                (StreamKind::Optical, TickOutcome::HandedOff),
                (StreamKind::Thermal, TickOutcome::HandedOff),
            ]
        );
        assert_eq!(rig.optical_slot.try_take().unwrap().stream(), StreamKind::Optical);
        assert_eq!(rig.thermal_slot.try_take().unwrap().stream(), StreamKind::Thermal);
        assert_eq!(rig.optical_calls.lock().unwrap().opens, 1);
        assert_eq!(rig.optical_calls.lock().unwrap().closes, 0);
    }

    #[test]
    fn occupied_slot_drops_frame_and_reconnects() {
        let mut rig = rig(|_| {});
        rig.acquisition.tick();
        // Optical worker is paused: its slot is never drained.
        rig.thermal_slot.try_take().unwrap();

        let outcomes = rig.acquisition.tick();
        assert_eq!(outcomes[0], (StreamKind::Optical, TickOutcome::Dropped));
        assert_eq!(outcomes[1], (StreamKind::Thermal, TickOutcome::HandedOff));

        let calls = rig.optical_calls.lock().unwrap();
        assert_eq!(calls.opens, 2);
        assert_eq!(calls.closes, 1);
        let stats = rig.acquisition.stats(StreamKind::Optical).unwrap().snapshot();
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(rig.thermal_calls.lock().unwrap().closes, 0);
        assert!(rig.optical_slot.is_occupied());
    }

    #[test]
    fn read_failure_reconnects_only_that_stream() {
        let mut rig = rig(|source| source.fail_reads = true);
        let outcomes = rig.acquisition.tick();
        assert_eq!(outcomes[0], (StreamKind::Optical, TickOutcome::NoFrame));
        assert_eq!(outcomes[1], (StreamKind::Thermal, TickOutcome::HandedOff));
        assert_eq!(rig.optical_calls.lock().unwrap().closes, 1);
        assert_eq!(rig.thermal_calls.lock().unwrap().closes, 0);
        assert!(!rig.optical_slot.is_occupied());

        let state = rig.acquisition.state(StreamKind::Optical).unwrap();
        assert_eq!(state.reconnect_attempts, 1);
        assert!(state.last_successful_read.is_none());
    }

    #[test]
    fn refused_connect_is_retried_next_tick() {
        let mut rig = rig(|source| source.refuse_opens = 2);
        assert!(!rig.acquisition.state(StreamKind::Optical).unwrap().connected);

        // Tick 1: source is down, reconnect is refused again.
        assert_eq!(rig.acquisition.tick()[0].1, TickOutcome::NoFrame);
        assert!(!rig.acquisition.state(StreamKind::Optical).unwrap().connected);
        // Tick 2: the reconnect succeeds.
        assert_eq!(rig.acquisition.tick()[0].1, TickOutcome::NoFrame);
        assert!(rig.acquisition.state(StreamKind::Optical).unwrap().connected);
        // Tick 3: frames flow again.
        assert_eq!(rig.acquisition.tick()[0].1, TickOutcome::HandedOff);

        let stats = rig.acquisition.stats(StreamKind::Optical).unwrap().snapshot();
        assert_eq!(stats.connect_failures, 2);
        let state = rig.acquisition.state(StreamKind::Optical).unwrap();
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.last_successful_read.is_some());
    }

    #[test]
    fn run_stops_on_shutdown_and_closes_sources() {
        let rig = rig(|_| {});
        let mut acquisition = rig.acquisition;
        let acquisition_period = Duration::from_millis(10);
        acquisition.period = acquisition_period;
        let shutdown = Shutdown::new();
        let handle = {
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                acquisition.run(&shutdown);
                acquisition
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        let acquisition = handle.join().unwrap();
        assert!(!acquisition.state(StreamKind::Optical).unwrap().connected);
        assert!(rig.optical_calls.lock().unwrap().closes >= 1);
        assert!(rig.optical_calls.lock().unwrap().reads >= 1);
    }
}
