//! Mikrofon-Aufnahme über cpal
//!
//! Der cpal-Stream ist nicht `Send`, er lebt daher auf einem eigenen Thread.
//! Das Callback mischt auf Mono herunter, resampelt auf 8kHz und schreibt in
//! einen Ring-Buffer, aus dem der Pump-Task frameweise liest.

use super::audio::{
    resample_linear, AudioError, CaptureStream, MicrophoneSource, CAPTURE_RATE, FRAME_SIZE,
    WIRE_RATE,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Buffer Size für den Aufnahme-Ring-Buffer (10 Frames)
const RING_BUFFER_SIZE: usize = FRAME_SIZE * 10;

/// Standard-Eingabegerät des Systems
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError> {
        let buffer = Arc::new(Mutex::new(HeapRb::<f32>::new(RING_BUFFER_SIZE)));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_buffer = Arc::clone(&buffer);
        std::thread::Builder::new()
            .name("vokey-capture".to_string())
            .spawn(move || match start_capture(thread_buffer) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Läuft bis CpalCapture (und damit stop_tx) gedroppt wird
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::info!("Audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| AudioError::StreamBuildError("capture thread exited".to_string()))??;

        Ok(Box::new(CpalCapture {
            buffer,
            _stop: stop_tx,
        }))
    }
}

struct CpalCapture {
    buffer: Arc<Mutex<HeapRb<f32>>>,
    _stop: std_mpsc::Sender<()>,
}

impl CaptureStream for CpalCapture {
    fn read_frame(&mut self) -> Option<Vec<f32>> {
        let mut buffer = self.buffer.lock();
        if buffer.occupied_len() < FRAME_SIZE {
            return None;
        }

        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }
}

/// Startet Audio Capture auf dem Standard-Eingabegerät
fn start_capture(buffer: Arc<Mutex<HeapRb<f32>>>) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;

    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;
    let config = select_best_config(configs.collect())?;

    tracing::info!(
        "Starting audio capture: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    let source_rate = config.sample_rate.0;
    let channels = usize::from(config.channels.max(1));

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                    .collect();

                let samples = resample_linear(&mono, source_rate, WIRE_RATE);

                // Bei vollem Puffer werden neue Samples verworfen
                let mut buffer = buffer.lock();
                for sample in samples {
                    let _ = buffer.try_push(sample);
                }
            },
            |err| {
                tracing::error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    Ok(stream)
}

/// Wählt die beste F32-Konfiguration (48kHz bevorzugt)
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, AudioError> {
    let target_rate = cpal::SampleRate(CAPTURE_RATE);

    let f32_configs: Vec<_> = configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    // Versuche exakt 48kHz zu finden
    if let Some(config) = f32_configs
        .iter()
        .find(|c| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    // Sonst die höchste verfügbare Rate
    f32_configs
        .into_iter()
        .next()
        .map(|c| c.with_max_sample_rate().into())
        .ok_or_else(|| {
            AudioError::UnsupportedConfig("No f32 input configuration found".to_string())
        })
}
