//! Queue export
//!
//! A pending log can be written out for inspection, or handed to another
//! process that resolves the same paths and replays it. The transaction
//! coordinator never writes or reads it. Targets are stored by physical
//! path and resolved again on load. JSON, binary and gzip-compressed JSON
//! are supported.

use serde::{Deserialize, Serialize};

use super::key::TargetRef;
use super::operation::{Attributes, IndexOperation, OpKind};
use crate::config::QUEUE_FORMAT_VERSION;
use crate::{QueueError, QueueResult};

/// One operation in persisted form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedOperation {
    pub kind: OpKind,
    pub path: String,
    pub attributes: Option<Vec<String>>,
    pub metadata_update: Option<bool>,
}

/// Serialized queue format for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedQueue {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Pending operations in log order
    pub operations: Vec<SerializedOperation>,
    /// Metadata about when and how the queue was captured
    pub metadata: QueueMetadata,
}

/// Metadata for queue serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    /// RFC 3339 timestamp when the queue was captured
    pub enqueued_at: String,
    /// Name (or id) of the thread owning the queue
    pub source_thread: String,
    /// Savepoint depth when the queue was captured
    pub savepoint_depth: usize,
}

impl SerializedQueue {
    /// Capture `operations`; every target must have a physical path
    pub fn from_operations(operations: &[IndexOperation], savepoint_depth: usize) -> QueueResult<Self> {
        let operations = operations
            .iter()
            .map(|op| {
                let path = op.target.physical_path().ok_or_else(|| {
                    QueueError::TargetNotAddressable {
                        target: op.target.label(),
                    }
                })?;
                Ok(SerializedOperation {
                    kind: op.kind,
                    path,
                    attributes: op.attributes.as_ref().map(|a| a.iter().cloned().collect()),
                    metadata_update: op.metadata_update,
                })
            })
            .collect::<QueueResult<Vec<_>>>()?;

        Ok(Self {
            version: QUEUE_FORMAT_VERSION,
            operations,
            metadata: QueueMetadata {
                enqueued_at: chrono::Utc::now().to_rfc3339(),
                source_thread: current_thread_name(),
                savepoint_depth,
            },
        })
    }

    /// Rebuild the operations, resolving each path with `resolve`
    pub fn into_operations<F>(self, resolve: F) -> QueueResult<Vec<IndexOperation>>
    where
        F: Fn(&str) -> Option<TargetRef>,
    {
        if self.version != QUEUE_FORMAT_VERSION {
            return Err(QueueError::VersionMismatch {
                found: self.version,
                expected: QUEUE_FORMAT_VERSION,
            });
        }

        self.operations
            .into_iter()
            .map(|op| {
                let target = resolve(&op.path)
                    .ok_or_else(|| QueueError::TargetNotResolved { path: op.path.clone() })?;
                let attributes: Option<Attributes> =
                    op.attributes.map(|names| names.into_iter().collect());
                Ok(IndexOperation {
                    kind: op.kind,
                    target,
                    attributes,
                    metadata_update: op.metadata_update,
                })
            })
            .collect()
    }

    /// Serialize to JSON (human-readable, easier debugging)
    pub fn to_json(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to serialize queue to JSON: {e}"),
        })
    }

    pub fn from_json(json: &str) -> QueueResult<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to deserialize queue from JSON: {e}"),
        })
    }

    /// Serialize to binary format (compact, faster for large queues)
    pub fn to_binary(&self) -> QueueResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to serialize queue to binary: {e}"),
        })
    }

    pub fn from_binary(data: &[u8]) -> QueueResult<Self> {
        bincode::deserialize(data).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to deserialize binary queue: {e}"),
        })
    }

    /// Serialize to gzip-compressed JSON (balance of readability and size)
    pub fn to_compressed_json(&self) -> QueueResult<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let json = serde_json::to_vec(self)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).map_err(|e| QueueError::SerializationError {
            message: format!("Failed to compress queue: {e}"),
        })?;

        encoder.finish().map_err(|e| QueueError::SerializationError {
            message: format!("Failed to finish compression: {e}"),
        })
    }

    pub fn from_compressed_json(data: &[u8]) -> QueueResult<Self> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let mut decoder = GzDecoder::new(data);
        let mut json_bytes = Vec::new();
        decoder.read_to_end(&mut json_bytes)?;

        Ok(serde_json::from_slice(&json_bytes)?)
    }
}

fn current_thread_name() -> String {
    let thread = std::thread::current();
    thread
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", thread.id()))
}
