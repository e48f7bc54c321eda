use serde::Serialize;
use serde_json::value::RawValue;
use std::ops::Range;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adc::{ChannelReader, MAX_VALUE};
use crate::config::Config;
use crate::rest::{Delivery, HttpResponse, TransportError};
use crate::shutdown::StopSignal;

/// Consecutive failures tolerated before pausing.
pub const BACKOFF_THRESHOLD: u32 = 10;
pub const BACKOFF_PAUSE: Duration = Duration::from_millis(5000);

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub fn raw_to_voltage(raw: u16, vref: f64) -> f64 {
    raw as f64 / MAX_VALUE as f64 * vref
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub raw: u16,
    pub voltage: f64,
}

// Field order is part of the contract with the receiving service.
#[derive(Serialize)]
struct Payload {
    raw: u16,
    voltage: Box<RawValue>,
}

impl Reading {
    pub fn new(raw: u16, vref: f64) -> Self {
        Reading { raw, voltage: raw_to_voltage(raw, vref) }
    }

    /// `{"raw":<int>,"voltage":<4 decimals>}`, trailing zeros kept.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let voltage = RawValue::from_string(format!("{:.4}", self.voltage))?;
        serde_json::to_string(&Payload { raw: self.raw, voltage })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered(u16),
    Rejected(u16),
    TransportFailed(String),
}

impl DeliveryOutcome {
    pub fn classify(result: Result<HttpResponse, TransportError>, success: &Range<u16>) -> Self {
        match result {
            Ok(response) if success.contains(&response.status) => DeliveryOutcome::Delivered(response.status),
            Ok(response) => {
                debug!(status = response.status, body = %response.body, "Service rejected sample");
                DeliveryOutcome::Rejected(response.status)
            }
            Err(TransportError(message)) => DeliveryOutcome::TransportFailed(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    ReadFailed(String),
    EncodeFailed(String),
    Sent { reading: Reading, outcome: DeliveryOutcome },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopState {
    /// Samples accepted by the service since start.
    pub sample_count: u64,
    /// Read or transport failures since the last success or backoff.
    pub error_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub channel: u8,
    pub vref: f64,
    pub poll_interval: Duration,
    pub endpoint: String,
    pub success_status: Range<u16>,
    pub log_every: u32,
}

impl From<&Config> for SamplerSettings {
    fn from(config: &Config) -> Self {
        SamplerSettings {
            channel: config.channel,
            vref: config.vref,
            poll_interval: config.poll_interval,
            endpoint: config.endpoint.clone(),
            success_status: config.success_status.clone(),
            log_every: config.log_every,
        }
    }
}

/// Periodic read-and-post loop.
///
/// Owns the converter and the delivery client for its whole life; both are
/// dropped when [`Sampler::run`] returns.
pub struct Sampler<R, D, S> {
    reader: R,
    delivery: D,
    sleeper: S,
    settings: SamplerSettings,
    state: LoopState,
}

impl<R: ChannelReader, D: Delivery, S: Sleeper> Sampler<R, D, S> {
    pub fn new(reader: R, delivery: D, sleeper: S, mut settings: SamplerSettings) -> Self {
        settings.log_every = settings.log_every.max(1);
        Sampler {
            reader,
            delivery,
            sleeper,
            settings,
            state: LoopState::default(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// One acquisition: read, convert, post, classify. Never fails; every
    /// problem ends up in the counters and the log.
    pub fn tick(&mut self) -> Tick {
        let raw = match self.reader.read_channel(self.settings.channel) {
            Ok(raw) => raw,
            Err(e) => {
                self.state.error_count += 1;
                error!("ADC read failed: {}", e);
                return Tick::ReadFailed(e.to_string());
            }
        };

        let reading = Reading::new(raw, self.settings.vref);
        let json = match reading.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.state.error_count += 1;
                error!(raw, "Payload encoding failed: {}", e);
                return Tick::EncodeFailed(e.to_string());
            }
        };

        let result = self.delivery.post(&self.settings.endpoint, &json);
        let outcome = DeliveryOutcome::classify(result, &self.settings.success_status);

        match &outcome {
            DeliveryOutcome::Delivered(_) => {
                self.state.sample_count += 1;
                self.state.error_count = 0;
                if self.state.sample_count % self.settings.log_every as u64 == 0 {
                    info!(
                        "Sent {} samples, last: raw={}, voltage={:.4}V",
                        self.state.sample_count, reading.raw, reading.voltage
                    );
                }
            }
            DeliveryOutcome::Rejected(status) => {
                warn!("HTTP {} for sample raw={}, voltage={:.4}V", status, reading.raw, reading.voltage);
            }
            DeliveryOutcome::TransportFailed(message) => {
                self.state.error_count += 1;
                error!("Request failed: {}", message);
            }
        }

        Tick::Sent { reading, outcome }
    }

    fn backoff_if_needed(&mut self) -> bool {
        if self.state.error_count <= BACKOFF_THRESHOLD {
            return false;
        }

        warn!(errors = self.state.error_count, "Multiple errors, backing off...");
        self.sleeper.sleep(BACKOFF_PAUSE);
        self.state.error_count = 0;
        true
    }

    /// Tick until `stop` is raised. The flag is only looked at between ticks,
    /// so an in-flight read, post or sleep always completes.
    pub fn run(mut self, stop: &StopSignal) -> LoopState {
        info!(
            "Starting main loop (poll interval: {} ms)",
            self.settings.poll_interval.as_millis()
        );

        while !stop.is_raised() {
            self.tick();
            self.backoff_if_needed();
            self.sleeper.sleep(self.settings.poll_interval);
        }

        info!("Shutting down after {} samples", self.state.sample_count);
        self.state
    }
}
