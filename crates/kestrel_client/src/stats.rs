//! Transfer-rate tracking and periodic statistics broadcast.
//!
//! The tracker accepts at most one rate sample per elapsed wall-clock
//! second and keeps a sliding window of the last ten accepted samples;
//! the reported average is the window mean, or `0.0` before the first
//! sample. A broadcaster thread, one per active transfer, pushes a
//! snapshot to the consumer once per second starting immediately, and
//! is stopped and joined when the transfer scope closes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Number of accepted samples kept in the sliding window.
const WINDOW_SIZE: usize = 10;

/// One statistics snapshot. `transferred_octets` is monotone until
/// `completed()` pins it to `expected_octets`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStatistics {
    pub expected_octets: u64,
    pub transferred_octets: u64,
    pub octets_per_second: f64,
}

impl TransferStatistics {
    /// Progress in `[0.0, 1.0]`; `1.0` for zero-length transfers.
    pub fn progress(&self) -> f64 {
        if self.expected_octets == 0 {
            return 1.0;
        }
        (self.transferred_octets as f64 / self.expected_octets as f64).min(1.0)
    }
}

struct SampleWindow {
    samples: VecDeque<u64>,
    pending: u64,
    last_accept: Option<Instant>,
}

/// Windowed throughput estimator. Counters are atomic; only the sample
/// window takes a lock, and only once per second.
pub struct RateTracker {
    expected: u64,
    transferred: AtomicU64,
    completed: AtomicBool,
    window: Mutex<SampleWindow>,
}

impl RateTracker {
    pub fn new(expected_octets: u64) -> Self {
        Self {
            expected: expected_octets,
            transferred: AtomicU64::new(0),
            completed: AtomicBool::new(false),
            window: Mutex::new(SampleWindow {
                samples: VecDeque::with_capacity(WINDOW_SIZE),
                pending: 0,
                last_accept: None,
            }),
        }
    }

    /// Record transferred octets. The octets accumulate into a pending
    /// sample which is accepted into the window at most once per
    /// elapsed second.
    pub fn add(&self, octets: u64) {
        self.transferred.fetch_add(octets, Ordering::Relaxed);
        let mut window = self.window.lock();
        window.pending += octets;
        let ready = match window.last_accept {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(1),
        };
        if ready {
            let sample = window.pending;
            window.pending = 0;
            window.last_accept = Some(Instant::now());
            if window.samples.len() >= WINDOW_SIZE {
                window.samples.pop_front();
            }
            window.samples.push_back(sample);
        }
    }

    /// Force reported progress to 100%.
    pub fn completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    /// Mean of the sample window; `0.0` when no sample was accepted yet
    /// (never NaN).
    pub fn average_octets_per_second(&self) -> f64 {
        let window = self.window.lock();
        if window.samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = window.samples.iter().sum();
        sum as f64 / window.samples.len() as f64
    }

    pub fn snapshot(&self) -> TransferStatistics {
        let transferred = if self.completed.load(Ordering::Acquire) {
            self.expected
        } else {
            self.transferred.load(Ordering::Relaxed)
        };
        TransferStatistics {
            expected_octets: self.expected,
            transferred_octets: transferred,
            octets_per_second: self.average_octets_per_second(),
        }
    }

    #[cfg(test)]
    fn force_accept(&self, octets: u64) {
        self.transferred.fetch_add(octets, Ordering::Relaxed);
        let mut window = self.window.lock();
        if window.samples.len() >= WINDOW_SIZE {
            window.samples.pop_front();
        }
        window.samples.push_back(octets);
        window.last_accept = Some(Instant::now());
    }
}

/// A consumer of statistics snapshots.
pub type StatisticsConsumer = Box<dyn Fn(TransferStatistics) + Send>;

/// Broadcasts one snapshot per second to the consumer, starting
/// immediately. The thread is stopped and joined on drop, so the
/// broadcast is a scoped resource bound to the transfer's lifetime.
pub struct StatisticsBroadcaster {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl StatisticsBroadcaster {
    pub fn start(tracker: Arc<RateTracker>, consumer: StatisticsConsumer) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("kestrel-transfer-stats".into())
            .spawn(move || {
                loop {
                    consumer(tracker.snapshot());
                    // Sleep in short slices so stop() is honoured with a
                    // bounded wait; a final snapshot is emitted on stop
                    // so the consumer observes the terminal state.
                    for _ in 0..10 {
                        if stop_flag.load(Ordering::Acquire) {
                            consumer(tracker.snapshot());
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            })
            .ok();
        if handle.is_none() {
            tracing::warn!("failed to spawn transfer statistics thread");
        }
        Self {
            stop,
            handle,
        }
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatisticsBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_is_zero_with_no_samples() {
        let tracker = RateTracker::new(1000);
        assert_eq!(tracker.average_octets_per_second(), 0.0);
        let snap = tracker.snapshot();
        assert!(!snap.octets_per_second.is_nan());
    }

    #[test]
    fn test_first_add_is_accepted_immediately() {
        let tracker = RateTracker::new(1000);
        tracker.add(100);
        assert_eq!(tracker.average_octets_per_second(), 100.0);
    }

    #[test]
    fn test_second_add_within_a_second_is_not_accepted() {
        let tracker = RateTracker::new(1000);
        tracker.add(100);
        tracker.add(400);
        // The second add stays pending; the window still holds one
        // sample of 100.
        assert_eq!(tracker.average_octets_per_second(), 100.0);
        // But the transferred counter moves regardless.
        assert_eq!(tracker.snapshot().transferred_octets, 500);
    }

    #[test]
    fn test_window_is_bounded_to_ten_samples() {
        let tracker = RateTracker::new(0);
        for i in 0..15u64 {
            tracker.force_accept(i * 10);
        }
        // Window holds samples 5..15: mean of 50..140 = 95.
        assert_eq!(tracker.average_octets_per_second(), 95.0);
    }

    #[test]
    fn test_transferred_is_monotone() {
        let tracker = RateTracker::new(10_000);
        let mut last = 0;
        for _ in 0..20 {
            tracker.add(123);
            let now = tracker.snapshot().transferred_octets;
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_completed_pins_to_expected() {
        let tracker = RateTracker::new(10_000);
        tracker.add(4);
        assert_eq!(tracker.snapshot().transferred_octets, 4);
        tracker.completed();
        // Regardless of bytes actually observed, the snapshot reports
        // the expected total.
        assert_eq!(tracker.snapshot().transferred_octets, 10_000);
        tracker.add(1);
        assert_eq!(tracker.snapshot().transferred_octets, 10_000);
    }

    #[test]
    fn test_progress() {
        let tracker = RateTracker::new(200);
        tracker.add(50);
        let snap = tracker.snapshot();
        assert!((snap.progress() - 0.25).abs() < f64::EPSILON);

        let empty = RateTracker::new(0);
        assert_eq!(empty.snapshot().progress(), 1.0);
    }

    #[test]
    fn test_broadcaster_emits_immediately_and_stops() {
        let tracker = Arc::new(RateTracker::new(100));
        tracker.add(100);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let broadcaster = StatisticsBroadcaster::start(
            tracker,
            Box::new(move |snap| sink.lock().push(snap)),
        );
        // First snapshot is emitted at start, not after one second.
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() && Instant::now() < deadline {
            std::thread::yield_now();
        }
        broadcaster.stop();
        let snaps = seen.lock();
        assert!(!snaps.is_empty());
        assert_eq!(snaps[0].transferred_octets, 100);
    }
}
