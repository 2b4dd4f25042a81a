//! Telemetry payloads and best-effort publishing
//!
//! Every measurement window produces one current reading, and every cycle
//! start or end produces one state record. Payloads follow the
//! variable/value/group/metadata shape of the telemetry endpoint and are sent
//! as a one-element JSON array:
//!
//! ```text
//! [{"variable":"current","unit":"mA","value":2150,"group":"12",
//!   "metadata":{"device_id":"wasmachine 1","cycle_elapsed_seconds":95,"cumulative_seconds":86400}}]
//! ```
//!
//! Delivery is at-most-once. A dropped message is counted and reported to the
//! caller, never retried or buffered: the detector runs on local measurements
//! and does not depend on anything reaching the broker.

use alloc::vec::Vec;
use core::fmt::Write;

use serde::Serialize;
use thiserror_no_std::Error;

use crate::config::{DeviceId, TelemetryConfig};
use crate::metrics::RmsReading;

/// Upper bound of a serialized payload
pub const MAX_PAYLOAD_BYTES: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("payload serialization failed")]
    Serialize,
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("transport is not connected")]
    Disconnected,
    #[error("transport rejected the message")]
    Rejected,
}

/// Network transport collaborator.
pub trait Publisher {
    /// Hand one message to the transport. `false` means it was not sent.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    fn connected(&mut self) -> bool;

    /// Message the broker publishes for us if the link drops uncleanly.
    ///
    /// Transports without last-will support ignore it.
    fn set_last_will(&mut self, _topic: &str, _payload: &[u8]) {}
}

impl<T: Publisher + ?Sized> Publisher for &mut T {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        (**self).publish(topic, payload)
    }

    fn connected(&mut self) -> bool {
        (**self).connected()
    }

    fn set_last_will(&mut self, topic: &str, payload: &[u8]) {
        (**self).set_last_will(topic, payload)
    }
}

/// Cycle figures attached to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleMetadata {
    /// Seconds since the current session started, 0 while idle
    pub cycle_elapsed_seconds: u64,
    pub cumulative_seconds: u64,
}

/// Appliance state as published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateValue {
    On,
    Off,
}

impl StateValue {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "1",
            Self::Off => "2",
        }
    }
}

#[derive(Serialize)]
struct Metadata<'a> {
    device_id: &'a str,
    cycle_elapsed_seconds: u64,
    cumulative_seconds: u64,
}

#[derive(Serialize)]
struct ReadingEntry<'a> {
    variable: &'static str,
    unit: &'static str,
    value: u32,
    group: &'a str,
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct StateEntry<'a> {
    variable: &'static str,
    value: &'static str,
    group: &'a str,
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct OfflineEntry {
    variable: &'static str,
    value: &'static str,
}

type Group = heapless::String<10>;

fn group(session_id: u32) -> Group {
    let mut out = Group::new();
    // u32::MAX has ten digits
    let _ = write!(out, "{}", session_id);
    out
}

pub struct TelemetryEmitter {
    device_id: DeviceId,
    topics: TelemetryConfig,
    max_payload: usize,
    sent: u32,
    dropped: u32,
}

impl TelemetryEmitter {
    pub fn new(device_id: DeviceId, topics: TelemetryConfig) -> Self {
        Self {
            device_id,
            topics,
            max_payload: MAX_PAYLOAD_BYTES,
            sent: 0,
            dropped: 0,
        }
    }

    /// Lower the payload bound, e.g. for a transport with a smaller buffer.
    pub fn with_payload_limit(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.min(MAX_PAYLOAD_BYTES);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn metadata(&self, cycle: CycleMetadata) -> Metadata<'_> {
        Metadata {
            device_id: &self.device_id,
            cycle_elapsed_seconds: cycle.cycle_elapsed_seconds,
            cumulative_seconds: cycle.cumulative_seconds,
        }
    }

    fn encode<T: Serialize>(&self, entry: &T) -> Result<Vec<u8>, TelemetryError> {
        let bytes = serde_json::to_vec(&[entry]).map_err(|_| TelemetryError::Serialize)?;
        if bytes.len() > self.max_payload {
            return Err(TelemetryError::PayloadTooLarge {
                len: bytes.len(),
                max: self.max_payload,
            });
        }
        Ok(bytes)
    }

    pub fn reading_payload(
        &self,
        reading: &RmsReading,
        session_id: u32,
        cycle: CycleMetadata,
    ) -> Result<Vec<u8>, TelemetryError> {
        let group = group(session_id);
        self.encode(&ReadingEntry {
            variable: "current",
            unit: "mA",
            value: reading.milliamps(),
            group: &group,
            metadata: self.metadata(cycle),
        })
    }

    pub fn state_payload(
        &self,
        state: StateValue,
        session_id: u32,
        cycle: CycleMetadata,
    ) -> Result<Vec<u8>, TelemetryError> {
        let group = group(session_id);
        self.encode(&StateEntry {
            variable: "state",
            value: state.as_str(),
            group: &group,
            metadata: self.metadata(cycle),
        })
    }

    /// Last-will payload a transport registers with the broker.
    pub fn offline_payload(&self) -> Result<Vec<u8>, TelemetryError> {
        self.encode(&OfflineEntry {
            variable: "state",
            value: "offline",
        })
    }

    /// Hand the offline payload to the transport as its last will, on the
    /// state topic.
    pub fn register_last_will<P: Publisher + ?Sized>(
        &self,
        publisher: &mut P,
    ) -> Result<(), TelemetryError> {
        let payload = self.offline_payload()?;
        publisher.set_last_will(&self.topics.state_topic, &payload);
        Ok(())
    }

    pub fn publish_reading<P: Publisher + ?Sized>(
        &mut self,
        publisher: &mut P,
        reading: &RmsReading,
        session_id: u32,
        cycle: CycleMetadata,
    ) -> Result<(), TelemetryError> {
        let payload = self.reading_payload(reading, session_id, cycle);
        let topic = self.topics.readings_topic.clone();
        self.send(publisher, &topic, payload)
    }

    pub fn publish_state_change<P: Publisher + ?Sized>(
        &mut self,
        publisher: &mut P,
        state: StateValue,
        session_id: u32,
        cycle: CycleMetadata,
    ) -> Result<(), TelemetryError> {
        let payload = self.state_payload(state, session_id, cycle);
        let topic = self.topics.state_topic.clone();
        self.send(publisher, &topic, payload)
    }

    fn send<P: Publisher + ?Sized>(
        &mut self,
        publisher: &mut P,
        topic: &str,
        payload: Result<Vec<u8>, TelemetryError>,
    ) -> Result<(), TelemetryError> {
        let result = payload.and_then(|bytes| {
            if !publisher.connected() {
                return Err(TelemetryError::Disconnected);
            }
            if publisher.publish(topic, &bytes) {
                Ok(())
            } else {
                Err(TelemetryError::Rejected)
            }
        });

        match result {
            Ok(()) => self.sent = self.sent.saturating_add(1),
            Err(_) => self.dropped = self.dropped.saturating_add(1),
        }
        result
    }

    /// Messages handed to the transport
    pub fn sent(&self) -> u32 {
        self.sent
    }

    /// Messages lost to serialization, disconnection or rejection
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
