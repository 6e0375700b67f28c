//! Data-rate measurement driven purely by chunk arrivals.
//!
//! There is no timer: each chunk carries the current instant, and buckets and
//! windows close when a chunk arrives after their deadline. Two consequences
//! are intentional and covered by tests:
//!
//! * the chunk that closes a bucket is counted in that bucket;
//! * an idle link produces no zero buckets, the bucket simply stays open
//!   until the next chunk.

use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::protocol::{THROUGHPUT_BUCKET, THROUGHPUT_WINDOW};
use crate::types::ThroughputReport;

/// What a single [`ThroughputSampler::on_chunk`] call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleOutcome {
    /// Byte count of the bucket this chunk closed.
    pub closed_bucket: Option<u64>,
    /// Window report, if this chunk closed the reporting window.
    pub report: Option<ThroughputReport>,
}

#[derive(Debug)]
pub struct ThroughputSampler {
    bucket: Duration,
    window: Duration,
    bucket_bytes: u64,
    bucket_start: Option<Instant>,
    samples: Vec<u64>,
    window_start: Option<Instant>,
}

impl Default for ThroughputSampler {
    fn default() -> Self {
        Self::new(THROUGHPUT_WINDOW)
    }
}

impl ThroughputSampler {
    /// A sampler with one-second buckets and the given reporting window.
    pub fn new(window: Duration) -> Self {
        Self {
            bucket: THROUGHPUT_BUCKET,
            window,
            bucket_bytes: 0,
            bucket_start: None,
            samples: Vec::new(),
            window_start: None,
        }
    }

    /// Bytes counted in the bucket that is still open.
    pub fn pending_bytes(&self) -> u64 {
        self.bucket_bytes
    }

    /// Closed bucket counts of the current reporting window, oldest first.
    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    /// Account for one chunk of `len` bytes received at `now`.
    pub fn on_chunk(&mut self, len: usize, now: Instant) -> SampleOutcome {
        let mut outcome = SampleOutcome::default();

        let bucket_start = *self.bucket_start.get_or_insert(now);
        self.bucket_bytes += len as u64;
        if now.duration_since(bucket_start) >= self.bucket {
            let bytes = std::mem::take(&mut self.bucket_bytes);
            self.samples.push(bytes);
            self.bucket_start = None;
            outcome.closed_bucket = Some(bytes);
        }

        let window_start = *self.window_start.get_or_insert(now);
        let elapsed = now.duration_since(window_start);
        if elapsed >= self.window {
            outcome.report = self.report(elapsed);
            self.samples.clear();
            self.window_start = None;
        }

        outcome
    }

    fn report(&self, elapsed: Duration) -> Option<ThroughputReport> {
        if self.samples.is_empty() {
            debug!("throughput window closed with no complete bucket; nothing to report");
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        let mean = sum as f64 / self.samples.len() as f64;
        Some(ThroughputReport {
            bytes_per_sec: mean.round() as u64,
            samples: self.samples.len(),
            window: elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn chunks_within_one_second_share_a_bucket() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::default();
        assert_eq!(s.on_chunk(100, t0), SampleOutcome::default());
        assert_eq!(s.on_chunk(200, t0 + ms(400)), SampleOutcome::default());
        assert_eq!(s.on_chunk(300, t0 + ms(999)), SampleOutcome::default());
        assert_eq!(s.pending_bytes(), 600);
        assert!(s.samples().is_empty());
    }

    #[test]
    fn closing_chunk_is_counted_in_the_bucket_it_closes() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::default();
        s.on_chunk(100, t0);
        s.on_chunk(200, t0 + ms(500));
        let out = s.on_chunk(300, t0 + ms(1000));
        assert_eq!(out.closed_bucket, Some(600));
        assert_eq!(s.samples(), &[600]);
        assert_eq!(s.pending_bytes(), 0);

        // The next chunk opens a fresh bucket at its own arrival time.
        assert_eq!(s.on_chunk(50, t0 + ms(1700)).closed_bucket, None);
        assert_eq!(s.on_chunk(50, t0 + ms(2699)).closed_bucket, None);
        assert_eq!(s.on_chunk(50, t0 + ms(2700)).closed_bucket, Some(150));
    }

    #[test]
    fn one_chunk_per_second_reports_after_sixty_seconds() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::default();
        let mut report = None;
        for sec in 0..=60u64 {
            let out = s.on_chunk(1000, t0 + Duration::from_secs(sec));
            if sec < 60 {
                assert_eq!(out.report, None, "no report before the window closes ({sec}s)");
            } else {
                report = out.report;
            }
        }
        // Buckets open on even seconds and close on odd ones, so each of the
        // 30 samples holds two chunks.
        let report = report.expect("window closes at 60 s");
        assert_eq!(report.samples, 30);
        assert_eq!(report.bytes_per_sec, 2000);
        assert_eq!(report.window, Duration::from_secs(60));
        assert!(s.samples().is_empty(), "reporting clears the window");
    }

    #[test]
    fn report_is_the_rounded_mean_of_the_samples() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::new(Duration::from_secs(10));
        // Two chunks per bucket: one opens it, the next closes it a second later.
        let buckets = [(10u64, 0u64), (20, 1), (15, 6)];
        let mut at = 0u64;
        for (first, second) in buckets {
            s.on_chunk(first as usize, t0 + ms(at));
            s.on_chunk(second as usize, t0 + ms(at + 1000));
            at += 2000;
        }
        assert_eq!(s.samples(), &[10, 21, 21]);
        let out = s.on_chunk(0, t0 + Duration::from_secs(10));
        let report = out.report.unwrap();
        // Mean of [10, 21, 21] is 17.33 → 17.
        assert_eq!(report.samples, 3);
        assert_eq!(report.bytes_per_sec, 17);
    }

    #[test]
    fn idle_gap_does_not_produce_zero_buckets() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::default();
        s.on_chunk(500, t0);
        let out = s.on_chunk(500, t0 + Duration::from_secs(30));
        assert_eq!(out.closed_bucket, Some(1000));
        assert_eq!(s.samples(), &[1000]);
    }

    #[test]
    fn empty_window_does_not_report_and_resets() {
        let t0 = Instant::now();
        let mut s = ThroughputSampler::new(ms(500));
        assert_eq!(s.on_chunk(100, t0).report, None);
        let out = s.on_chunk(100, t0 + ms(600));
        assert_eq!(out, SampleOutcome::default(), "no bucket closed, no report");

        // The window restarted at the next chunk: 600 ms later it has a sample.
        let out = s.on_chunk(100, t0 + ms(1000));
        assert_eq!(out.closed_bucket, Some(300));
        let out = s.on_chunk(0, t0 + ms(1500));
        assert_eq!(out.report.map(|r| r.bytes_per_sec), Some(300));
    }
}
