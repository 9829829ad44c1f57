//! Typed configuration for the memory engines.

use eventbus_types::DeliveryMode;
use serde::{Deserialize, Serialize};

/// Configuration shared by the drop-mode and durable-mode memory engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEngineConfig {
    /// Number of workers draining the shared drop-mode task channel.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Depth of the drop-mode worker task channel and the per-topic
    /// history ring; also the floor for durable per-subscriber queue depth.
    #[serde(default = "default_max_event_queue_size")]
    pub max_event_queue_size: usize,
    /// Default buffer size suggested to callers constructing ad-hoc
    /// channels against this engine; not otherwise enforced here.
    #[serde(default = "default_event_buffer_size")]
    pub default_event_buffer_size: usize,
    /// Advisory retention window for published history, in days. Not
    /// enforced by the in-memory ring (which is capacity-bounded, not
    /// time-bounded) but carried through for host-side reporting.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Drop-mode backpressure behavior. Ignored by the durable engine.
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    /// Floor applied to a subscription's durable queue depth alongside
    /// `max_event_queue_size` (the larger of the two is used).
    #[serde(default = "default_max_durable_queue_depth")]
    pub max_durable_queue_depth: usize,
}

fn default_worker_count() -> usize {
    4
}

fn default_max_event_queue_size() -> usize {
    1024
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_retention_days() -> u32 {
    7
}

fn default_max_durable_queue_depth() -> usize {
    1024
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_event_queue_size: default_max_event_queue_size(),
            default_event_buffer_size: default_event_buffer_size(),
            retention_days: default_retention_days(),
            delivery_mode: DeliveryMode::default(),
            max_durable_queue_depth: default_max_durable_queue_depth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_memory_safe() {
        let cfg = MemoryEngineConfig::default();
        assert!(cfg.worker_count > 0);
        assert!(cfg.max_event_queue_size > 0);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: MemoryEngineConfig = serde_json::from_str(r#"{"workerCount": 8}"#).unwrap();
        assert_eq!(cfg.worker_count, 8);
        assert_eq!(cfg.max_event_queue_size, default_max_event_queue_size());
    }
}
