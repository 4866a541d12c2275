//! Hardware output through cpal
//!
//! The stream runs on its own thread (cpal streams are not `Send` on every
//! platform). Scheduled units travel to the real-time callback over a
//! channel; the callback owns the timeline, mixes whatever covers the
//! current position and advances the device clock by the frames it wrote.

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{get_output_device, output_config_for_rate};
use crate::audio::output::{OutputDevice, ScheduledUnit};
use crate::error::AudioError;

enum Command {
    Schedule(PendingUnit),
    Flush,
}

struct UnitFlags {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

struct PendingUnit {
    start_frame: u64,
    samples: Vec<f32>,
    flags: Arc<UnitFlags>,
}

impl PendingUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Callback-side state
struct Renderer {
    commands: Receiver<Command>,
    units: Vec<PendingUnit>,
    position: u64,
    /// End frame of the last accepted unit
    tail: u64,
    frames_played: Arc<AtomicU64>,
    channels: usize,
}

impl Renderer {
    fn render<T>(&mut self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Schedule(mut unit) => {
                    // Late units play late rather than losing their head, and
                    // push back whatever was laid out after them
                    unit.start_frame = unit.start_frame.max(self.position).max(self.tail);
                    self.tail = unit.end_frame();
                    self.units.push(unit);
                }
                Command::Flush => {
                    for unit in self.units.drain(..) {
                        unit.flags.finished.store(true, Ordering::Release);
                    }
                    self.tail = 0;
                }
            }
        }

        let frames = data.len() / self.channels;
        for (i, frame) in data.chunks_mut(self.channels).enumerate() {
            let pos = self.position + i as u64;
            let mut value = 0.0f32;
            for unit in &self.units {
                if pos >= unit.start_frame
                    && pos < unit.end_frame()
                    && !unit.flags.cancelled.load(Ordering::Relaxed)
                {
                    value += unit.samples[(pos - unit.start_frame) as usize];
                }
            }
            let sample = T::from_sample(value.clamp(-1.0, 1.0));
            for out in frame.iter_mut() {
                *out = sample;
            }
        }

        self.position += frames as u64;
        self.frames_played.store(self.position, Ordering::Release);

        let position = self.position;
        self.units.retain(|unit| {
            let done = unit.flags.cancelled.load(Ordering::Relaxed) || unit.end_frame() <= position;
            if done {
                unit.flags.finished.store(true, Ordering::Release);
            }
            !done
        });
    }
}

/// Output device backed by a cpal stream
pub struct CpalOutput {
    sample_rate: u32,
    commands: Sender<Command>,
    frames_played: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open `device_name` (or the default device) at `sample_rate`
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self, AudioError> {
        let device = get_output_device(device_name)?;
        let supported = output_config_for_rate(&device, sample_rate)?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let channels = config.channels;

        let (command_tx, command_rx) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let frames_played = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let renderer = Renderer {
            commands: command_rx,
            units: Vec::with_capacity(16),
            position: 0,
            tail: 0,
            frames_played: frames_played.clone(),
            channels: channels as usize,
        };
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, renderer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping output
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("output thread exited".to_string()));
            }
        }

        tracing::info!(
            "Output stream open: {} Hz, {} channel(s), {:?}",
            sample_rate,
            channels,
            sample_format
        );

        Ok(Self {
            sample_rate,
            commands: command_tx,
            frames_played,
            running,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the output stream
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

impl OutputDevice for CpalOutput {
    fn now(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn schedule(&self, samples: Vec<f32>, start_time: f64) -> Box<dyn ScheduledUnit> {
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let flags = Arc::new(UnitFlags {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });

        let unit = PendingUnit {
            start_frame: (start_time * self.sample_rate as f64).round() as u64,
            samples,
            flags: flags.clone(),
        };
        if self.commands.send(Command::Schedule(unit)).is_err() {
            // Output thread is gone; nothing will ever play this
            flags.finished.store(true, Ordering::Release);
        }

        Box::new(CpalUnit {
            start_time,
            duration,
            flags,
        })
    }

    fn flush(&self) {
        let _ = self.commands.send(Command::Flush);
    }
}

struct CpalUnit {
    start_time: f64,
    duration: f64,
    flags: Arc<UnitFlags>,
}

impl ScheduledUnit for CpalUnit {
    fn cancel(self: Box<Self>) -> Result<(), AudioError> {
        if self.flags.finished.load(Ordering::Acquire) {
            return Err(AudioError::UnitFinished);
        }
        self.flags.cancelled.store(true, Ordering::Release);
        Ok(())
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn duration(&self) -> f64 {
        self.duration
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_typed_stream::<f32>(device, config, renderer),
        cpal::SampleFormat::I16 => build_typed_stream::<i16>(device, config, renderer),
        cpal::SampleFormat::U16 => build_typed_stream::<u16>(device, config, renderer),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render(data),
            |err| tracing::warn!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::CpalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(channels: usize) -> (Renderer, Sender<Command>) {
        let (tx, rx) = unbounded();
        (
            Renderer {
                commands: rx,
                units: Vec::new(),
                position: 0,
                tail: 0,
                frames_played: Arc::new(AtomicU64::new(0)),
                channels,
            },
            tx,
        )
    }

    fn unit(start_frame: u64, samples: Vec<f32>) -> (PendingUnit, Arc<UnitFlags>) {
        let flags = Arc::new(UnitFlags {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        });
        (
            PendingUnit {
                start_frame,
                samples,
                flags: flags.clone(),
            },
            flags,
        )
    }

    #[test]
    fn test_renders_units_back_to_back() {
        let (mut r, tx) = renderer(2);
        let (a, a_flags) = unit(0, vec![0.5; 4]);
        let (b, _) = unit(4, vec![-0.5; 4]);
        tx.send(Command::Schedule(a)).unwrap();
        tx.send(Command::Schedule(b)).unwrap();

        let mut out = vec![0.0f32; 16];
        r.render(&mut out);

        assert_eq!(&out[..8], &[0.5; 8]);
        assert_eq!(&out[8..], &[-0.5; 8]);
        assert_eq!(r.frames_played.load(Ordering::Acquire), 8);
        assert!(a_flags.finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_silence_when_nothing_scheduled() {
        let (mut r, _tx) = renderer(1);
        let mut out = vec![1.0f32; 8];
        r.render(&mut out);
        assert_eq!(out, vec![0.0; 8]);
    }

    #[test]
    fn test_flush_drops_pending_units() {
        let (mut r, tx) = renderer(1);
        let (a, flags) = unit(2, vec![0.25; 4]);
        tx.send(Command::Schedule(a)).unwrap();
        tx.send(Command::Flush).unwrap();

        let mut out = vec![0.0f32; 8];
        r.render(&mut out);
        assert_eq!(out, vec![0.0; 8]);
        assert!(flags.finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_cancelled_unit_is_silent() {
        let (mut r, tx) = renderer(1);
        let (a, flags) = unit(0, vec![0.25; 8]);
        tx.send(Command::Schedule(a)).unwrap();
        flags.cancelled.store(true, Ordering::Release);

        let mut out = vec![0.0f32; 8];
        r.render(&mut out);
        assert_eq!(out, vec![0.0; 8]);
    }

    #[test]
    fn test_late_unit_shifts_following_units() {
        let (mut r, tx) = renderer(1);
        let mut out = vec![0.0f32; 4];
        r.render(&mut out);

        // Laid out for frames 2..6 and 6..10, but the device is already at 4
        let (a, _) = unit(2, vec![0.5; 4]);
        let (b, _) = unit(6, vec![-0.25; 4]);
        tx.send(Command::Schedule(a)).unwrap();
        tx.send(Command::Schedule(b)).unwrap();

        let mut out = vec![0.0f32; 8];
        r.render(&mut out);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[-0.25; 4]);
    }
}
