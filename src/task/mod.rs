//! Task payloads
//!
//! Payloads travel as JSON byte strings inside a queue item. Durations are
//! encoded as integer nanoseconds on the wire.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload of the synthetic test task
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestTask {
    /// How long the handler sleeps before completing
    #[serde(with = "duration_ns", default)]
    pub sleep: Duration,

    /// Number of artificial failures left to generate
    #[serde(rename = "error_count", default)]
    pub num_errors: u32,

    /// Ask the processing worker to shut itself down
    #[serde(default)]
    pub should_stop_worker: bool,
}

impl TestTask {
    /// Encode the task as a queue item payload
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Payload of a secondary index build task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBuildTask {
    /// Tenant namespace owning the collection
    pub namespace_id: u32,

    /// Project name
    pub proj_name: String,

    /// Database branch
    pub branch: String,

    /// Collection whose secondary indexes are built
    pub coll_name: String,

    /// Override for the indexer's scan batch size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Pause between scan batches, to pace the build
    #[serde(default, with = "opt_duration_ns", skip_serializing_if = "Option::is_none")]
    pub throttle: Option<Duration>,
}

impl IndexBuildTask {
    /// Encode the task as a queue item payload
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Durations as integer nanoseconds
mod duration_ns {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

/// Optional durations as integer nanoseconds
mod opt_duration_ns {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_nanos() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let nanos = Option::<u64>::deserialize(deserializer)?;
        Ok(nanos.map(Duration::from_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_task_wire_format() {
        let task = TestTask {
            sleep: Duration::from_millis(5),
            num_errors: 3,
            should_stop_worker: false,
        };

        let encoded = serde_json::to_value(&task).unwrap();
        assert_eq!(encoded["sleep"], 5_000_000);
        assert_eq!(encoded["error_count"], 3);
        assert_eq!(encoded["should_stop_worker"], false);

        let decoded: TestTask = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.sleep, Duration::from_millis(5));
        assert_eq!(decoded.num_errors, 3);
    }

    #[test]
    fn test_index_build_task_optional_fields() {
        let raw = serde_json::json!({
            "namespace_id": 7,
            "proj_name": "orders",
            "branch": "main",
            "coll_name": "items"
        });

        let task: IndexBuildTask = serde_json::from_value(raw).unwrap();
        assert_eq!(task.namespace_id, 7);
        assert!(task.batch_size.is_none());
        assert!(task.throttle.is_none());
    }
}
