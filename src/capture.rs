//! The audio capture loop.
//!
//! Each tick pulls one frame from the session's sampler and schedules the next
//! tick. When the cadence comes from is up to the injected [`FrameScheduler`], so the
//! frame rate follows the host and is not fixed.

use std::sync::Arc;
use std::time::Duration;

use voice_session_types::AudioFrame;

use crate::sampler::AudioSampler;

/// Default tick period of [`IntervalScheduler`], roughly one display frame.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(16);

pub type FrameCallback = Box<dyn FnOnce() + Send>;

/// A requested frame. Cancels the request when cancelled or dropped; cancelling a
/// request that already fired does nothing.
pub struct FrameHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The host's frame cadence.
pub trait FrameScheduler: Send + Sync {
    /// Runs `callback` once, at the next frame.
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle;
}

/// Fires each request once after a fixed period on the tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct IntervalScheduler {
    period: Duration,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PERIOD)
    }
}

impl FrameScheduler for IntervalScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let period = self.period;
        let task = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            callback();
        });
        FrameHandle::new(move || task.abort())
    }
}

pub struct CaptureLoop {
    scheduler: Arc<dyn FrameScheduler>,
    tick: Arc<dyn Fn() + Send + Sync>,
    pending: Option<FrameHandle>,
}

impl CaptureLoop {
    /// `tick` is what a fired frame does; the controller uses it to queue the tick
    /// behind any signals already waiting.
    pub fn new<F>(scheduler: Arc<dyn FrameScheduler>, tick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            scheduler,
            tick: Arc::new(tick),
            pending: None,
        }
    }

    pub fn start(&mut self) {
        self.schedule();
    }

    pub fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }

    /// Body of one tick. Returns the captured frame, or `None` once the loop has
    /// stopped because the session is gone or the sampler was released.
    pub fn on_tick(&mut self, connected: bool, sampler: &mut dyn AudioSampler) -> Option<AudioFrame> {
        self.pending = None;
        if !connected || sampler.is_released() {
            tracing::debug!("capture loop stopped");
            return None;
        }
        let frame = sampler.current_frame();
        self.schedule();
        Some(frame)
    }

    fn schedule(&mut self) {
        let tick = self.tick.clone();
        self.pending = Some(self.scheduler.request_frame(Box::new(move || tick())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSampler {
        frames: usize,
        released: bool,
    }

    impl AudioSampler for CountingSampler {
        fn current_frame(&mut self) -> AudioFrame {
            self.frames += 1;
            AudioFrame::new(vec![self.frames as f32 / 10.0; 4])
        }

        fn release(&mut self) {
            self.released = true;
        }

        fn is_released(&self) -> bool {
            self.released
        }
    }

    #[derive(Default)]
    struct QueueScheduler {
        pending: Arc<Mutex<Vec<FrameCallback>>>,
        cancelled: Arc<AtomicUsize>,
    }

    impl FrameScheduler for QueueScheduler {
        fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
            self.pending.lock().unwrap().push(callback);
            let cancelled = self.cancelled.clone();
            FrameHandle::new(move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_tick_reschedules_until_released() {
        let scheduler = Arc::new(QueueScheduler::default());
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut capture = CaptureLoop::new(scheduler.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut sampler = CountingSampler::default();

        capture.start();
        assert!(capture.is_scheduled());

        let frame = capture.on_tick(true, &mut sampler).unwrap();
        assert_eq!(frame.samples(), &[0.1; 4]);
        assert!(capture.is_scheduled());
        assert_eq!(scheduler.pending.lock().unwrap().len(), 2);

        sampler.release();
        assert!(capture.on_tick(true, &mut sampler).is_none());
        assert!(!capture.is_scheduled());
        assert_eq!(sampler.frames, 1);

        for callback in scheduler.pending.lock().unwrap().drain(..) {
            callback();
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tick_stops_when_disconnected() {
        let scheduler = Arc::new(QueueScheduler::default());
        let mut capture = CaptureLoop::new(scheduler.clone(), || {});
        let mut sampler = CountingSampler::default();

        capture.start();
        assert!(capture.on_tick(false, &mut sampler).is_none());
        assert!(!capture.is_scheduled());
        assert_eq!(sampler.frames, 0);
    }

    #[test]
    fn test_cancel() {
        let scheduler = Arc::new(QueueScheduler::default());
        let mut capture = CaptureLoop::new(scheduler.clone(), || {});
        capture.start();
        capture.cancel();
        assert!(!capture.is_scheduled());
        assert!(scheduler.cancelled.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_interval_scheduler_fires_once() {
        let scheduler = IntervalScheduler::new(Duration::from_millis(1));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = scheduler.request_frame(Box::new(move || {
            let _ = tx.send(());
        }));
        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_interval_scheduler_cancel() {
        let scheduler = IntervalScheduler::new(Duration::from_millis(5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let handle = scheduler.request_frame(Box::new(move || {
            let _ = tx.send(());
        }));
        handle.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
