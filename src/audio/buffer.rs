//! Lock-free sample queue between the network task and the output callback
//!
//! Single producer (the receiver task) and single consumer (the cpal
//! output callback). Neither side ever blocks. Samples enter and leave in
//! whole frames so the channel order survives overflow and underrun.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded queue of interleaved `f32` samples
pub struct SampleQueue {
    queue: ArrayQueue<f32>,
    channels: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
    samples_played: AtomicU64,
}

impl SampleQueue {
    /// Create a new queue holding at most `capacity` samples of
    /// `channels`-wide frames. The capacity is rounded down to whole frames.
    pub fn new(capacity: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = (capacity / channels).max(1);
        Self {
            queue: ArrayQueue::new(frames * channels),
            channels,
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
            samples_played: AtomicU64::new(0),
        }
    }

    /// Push whole frames, dropping those that do not fit along with any
    /// trailing partial frame. Returns the number of samples accepted.
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        let free = self.queue.capacity() - self.queue.len();
        let whole = samples.len() - samples.len() % self.channels;
        let accepted = whole.min(free - free % self.channels);

        for sample in &samples[..accepted] {
            // only this producer pushes, so the space checked above stays free
            let _ = self.queue.push(*sample);
        }
        if accepted < samples.len() {
            self.overflow_count
                .fetch_add(samples.len() - accepted, Ordering::Relaxed);
        }
        accepted
    }

    /// Fill `out` frame by frame, padding with silence on underrun.
    /// A frame still being pushed is left for the next call.
    pub fn fill(&self, out: &mut [f32]) {
        let mut starved = false;
        for frame in out.chunks_mut(self.channels) {
            if frame.len() < self.channels || self.queue.len() < self.channels {
                frame.iter_mut().for_each(|s| *s = 0.0);
                starved = true;
                continue;
            }
            for slot in frame.iter_mut() {
                *slot = self.queue.pop().unwrap_or(0.0);
            }
            self.samples_played
                .fetch_add(self.channels as u64, Ordering::Relaxed);
        }
        if starved {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Samples per frame
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples dropped because the queue was full
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Output callbacks that ran short of samples
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Samples handed to the output device so far
    pub fn samples_played(&self) -> u64 {
        self.samples_played.load(Ordering::Relaxed)
    }

    /// Get fill level as percentage
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a sample queue
pub type SharedSampleQueue = Arc<SampleQueue>;

/// Create a new shared sample queue
pub fn create_shared_queue(capacity: usize, channels: usize) -> SharedSampleQueue {
    Arc::new(SampleQueue::new(capacity, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_overflow_and_underrun() {
        let queue = SampleQueue::new(4, 1);

        assert_eq!(queue.push_slice(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]), 4);
        assert_eq!(queue.overflow_count(), 2);
        assert!((queue.fill_level() - 1.0).abs() < f32::EPSILON);

        let mut out = [1.0f32; 6];
        queue.fill(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
        assert_eq!(queue.underrun_count(), 1);
        assert_eq!(queue.samples_played(), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = create_shared_queue(8, 1);
        queue.push_slice(&[0.5; 5]);
        queue.clear();
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_stereo_overflow_keeps_channel_order() {
        // rounds down to one stereo frame
        let queue = SampleQueue::new(3, 2);
        assert_eq!(queue.capacity(), 2);

        assert_eq!(queue.push_slice(&[-1.0, 1.0, -2.0, 2.0]), 2);
        assert_eq!(queue.overflow_count(), 2);

        let mut out = [0.0f32; 2];
        queue.fill(&mut out);
        assert_eq!(out, [-1.0, 1.0]);

        assert_eq!(queue.push_slice(&[-3.0, 3.0]), 2);
        queue.fill(&mut out);
        assert_eq!(out, [-3.0, 3.0]);
        assert_eq!(queue.samples_played(), 4);
    }

    #[test]
    fn test_partial_frame_is_not_queued() {
        let queue = SampleQueue::new(8, 2);
        assert_eq!(queue.push_slice(&[0.1, 0.2, 0.3]), 2);
        assert_eq!(queue.overflow_count(), 1);

        let mut out = [1.0f32; 4];
        queue.fill(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.0]);
        assert_eq!(queue.underrun_count(), 1);
    }
}
