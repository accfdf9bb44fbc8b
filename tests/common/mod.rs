//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use sensorflow_rs::pipeline::{EventPacket, PipelineMessage};
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Packets forwarded by channel sink `module`, in arrival order.
pub fn forwarded_packets(messages: &[PipelineMessage], module: u16) -> Vec<EventPacket> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            PipelineMessage::Packets { module: m, packets } if m.0 == module => {
                Some(packets.clone())
            }
            _ => None,
        })
        .flatten()
        .collect()
}
