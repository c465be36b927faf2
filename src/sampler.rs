//! Point-in-time reads of a remote audio source.

use std::collections::VecDeque;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use voice_session_types::{AudioFrame, SessionError};

use crate::transport::RemoteAudioTrack;

pub const MIN_FRAME_SIZE: usize = 32;
pub const MAX_FRAME_SIZE: usize = 32768;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SamplerError {
    #[error("analysis frame size must be a power of two in 32..=32768, got {0}")]
    InvalidResolution(usize),
}

impl From<SamplerError> for SessionError {
    fn from(e: SamplerError) -> Self {
        SessionError::AnalyzerInit(e.to_string())
    }
}

pub trait AudioSampler: Send {
    /// The most recent `frame_size` samples of the source.
    fn current_frame(&mut self) -> AudioFrame;

    /// Drops the source. Later frames are silent.
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

pub trait SamplerFactory: Send + Sync {
    fn create(&self, track: RemoteAudioTrack, frame_size: usize) -> Result<Box<dyn AudioSampler>, SamplerError>;
}

/// Keeps a sliding window over the samples drained from a track's ring buffer.
pub struct RingBufferSampler {
    source: Option<HeapCons<f32>>,
    window: VecDeque<f32>,
    frame_size: usize,
}

impl RingBufferSampler {
    pub fn new(source: HeapCons<f32>, frame_size: usize) -> Result<Self, SamplerError> {
        if !frame_size.is_power_of_two() || !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&frame_size) {
            return Err(SamplerError::InvalidResolution(frame_size));
        }
        let mut window = VecDeque::with_capacity(frame_size);
        window.resize(frame_size, 0.0);
        Ok(Self {
            source: Some(source),
            window,
            frame_size,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl AudioSampler for RingBufferSampler {
    fn current_frame(&mut self) -> AudioFrame {
        let Some(source) = self.source.as_mut() else {
            return AudioFrame::silent(self.frame_size);
        };
        while let Some(sample) = source.try_pop() {
            if self.window.len() == self.frame_size {
                self.window.pop_front();
            }
            self.window.push_back(sample);
        }
        AudioFrame::new(self.window.iter().copied().collect())
    }

    fn release(&mut self) {
        self.source = None;
        self.window.clear();
        self.window.resize(self.frame_size, 0.0);
    }

    fn is_released(&self) -> bool {
        self.source.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RingBufferSamplerFactory;

impl SamplerFactory for RingBufferSamplerFactory {
    fn create(&self, track: RemoteAudioTrack, frame_size: usize) -> Result<Box<dyn AudioSampler>, SamplerError> {
        tracing::debug!("creating sampler for track {} ({} samples per frame)", track.sid, frame_size);
        let sampler = RingBufferSampler::new(track.source, frame_size)?;
        Ok(Box::new(sampler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Producer, Split};
    use voice_session_utils::audio::shared_buffer;

    #[test]
    fn test_frame_is_fixed_length_and_zero_padded() {
        let (mut prod, cons) = shared_buffer(256).split();
        let mut sampler = RingBufferSampler::new(cons, 32).unwrap();

        assert_eq!(sampler.current_frame(), AudioFrame::silent(32));

        prod.push_slice(&[0.5, -0.5]);
        let frame = sampler.current_frame();
        assert_eq!(frame.len(), 32);
        assert_eq!(&frame.samples()[30..], &[0.5, -0.5]);
        assert!(frame.samples()[..30].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_window_keeps_most_recent_samples() {
        let (mut prod, cons) = shared_buffer(256).split();
        let mut sampler = RingBufferSampler::new(cons, 32).unwrap();

        let samples: Vec<f32> = (0..40).map(|i| i as f32 / 100.0).collect();
        prod.push_slice(&samples);
        let frame = sampler.current_frame();
        assert_eq!(frame.samples(), &samples[8..]);
    }

    #[test]
    fn test_released_sampler_is_silent() {
        let (mut prod, cons) = shared_buffer(64).split();
        let mut sampler = RingBufferSampler::new(cons, 32).unwrap();
        prod.push_slice(&[0.25; 8]);

        sampler.release();
        assert!(sampler.is_released());
        assert_eq!(sampler.current_frame(), AudioFrame::silent(32));
    }

    #[test]
    fn test_invalid_resolution() {
        for size in [0, 16, 100, 65536] {
            let (_, cons) = shared_buffer(8).split();
            assert_eq!(
                RingBufferSampler::new(cons, size).err(),
                Some(SamplerError::InvalidResolution(size))
            );
        }
    }

    #[test]
    fn test_factory_error_is_analyzer_init() {
        let (_, cons) = shared_buffer(8).split();
        let track = RemoteAudioTrack {
            sid: "TR_1".into(),
            participant_identity: "server".into(),
            source: cons,
        };
        let err = RingBufferSamplerFactory.create(track, 3).err().unwrap();
        assert!(matches!(SessionError::from(err), SessionError::AnalyzerInit(_)));
    }
}
