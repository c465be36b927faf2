//! Background capture and playback streams.
//!
//! A `cpal::Stream` cannot leave the thread that built it, so each stream lives on
//! a dedicated thread that keeps it playing until its owner is dropped.

use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, StreamTrait};
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use crate::{audio, device};

struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> anyhow::Result<(Self, u32)>
    where
        F: FnOnce() -> anyhow::Result<(cpal::Stream, u32)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let started = build().and_then(|(stream, sample_rate)| {
                    stream.play()?;
                    Ok((stream, sample_rate))
                });
                let stream = match started {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on an explicit stop or when the owner goes away.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| anyhow!("audio stream thread exited before starting"))??;

        Ok((
            Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            sample_rate,
        ))
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("audio stream thread panicked");
            }
        }
    }
}

/// Mono microphone capture. Stops when dropped.
pub struct InputCapture {
    _thread: StreamThread,
    sample_rate: u32,
}

impl InputCapture {
    pub fn start<F>(device_name: Option<String>, mut on_samples: F) -> anyhow::Result<Self>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let (thread, sample_rate) = StreamThread::spawn("voice-session-input", move || {
            let input = device::get_or_default_input(device_name.as_deref())?;
            let supported = input.default_input_config()?;
            let channels = supported.channels() as usize;
            let sample_rate = supported.sample_rate().0;
            tracing::debug!("input: device={:?}, config={:?}", input.name().ok(), &supported);

            let stream = input.build_input_stream_raw(
                &supported.config(),
                supported.sample_format(),
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    if let Some(samples) = data.as_slice::<f32>() {
                        on_samples(&audio::downmix(samples, channels));
                    } else if let Some(samples) = data.as_slice::<i16>() {
                        let samples: Vec<f32> = samples.iter().map(|&v| v as f32 / i16::MAX as f32).collect();
                        on_samples(&audio::downmix(&samples, channels));
                    }
                },
                move |err| tracing::error!("an error occurred on input stream: {}", err),
                None,
            )?;
            Ok((stream, sample_rate))
        })?;

        Ok(Self {
            _thread: thread,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Plays mono samples from a ring buffer on every output channel. Stops when dropped.
pub struct OutputPlayback {
    _thread: StreamThread,
    sample_rate: u32,
}

impl OutputPlayback {
    pub fn start(device_name: Option<String>, mut source: HeapCons<f32>) -> anyhow::Result<Self> {
        let (thread, sample_rate) = StreamThread::spawn("voice-session-output", move || {
            let output = device::get_or_default_output(device_name.as_deref())?;
            let supported = output.default_output_config()?;
            if supported.sample_format() != cpal::SampleFormat::F32 {
                return Err(anyhow!("unsupported output sample format: {:?}", supported.sample_format()));
            }
            let channels = supported.channels().max(1) as usize;
            let sample_rate = supported.sample_rate().0;
            tracing::debug!("output: device={:?}, config={:?}", output.name().ok(), &supported);

            let stream = output.build_output_stream(
                &supported.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = source.try_pop().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                },
                move |err| tracing::error!("an error occurred on output stream: {}", err),
                None,
            )?;
            Ok((stream, sample_rate))
        })?;

        Ok(Self {
            _thread: thread,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
