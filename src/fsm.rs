//! The deterministic metadata state machine (§4.2). This module is
//! intentionally independent of the consensus wiring in `raft_glue`: it is a
//! plain struct with `apply`/`snapshot`/`restore`/`get_file_metadata`, the way
//! `original_source/namenode/fsm.go`'s `FSM` is a plain struct that
//! `hashicorp/raft` drives through the `raft.FSM` interface. Keeping it
//! free-standing is what makes I1–I5 and T1–T4 testable without spinning up a
//! cluster.

use crate::error::FsMeshError;
use crate::wire::{ChunkStruct, RaftCommand, OP_REGISTER_FILE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `F: filename -> ordered chunk ids` and `P: chunk id -> replica set`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    pub files: HashMap<String, Vec<String>>,
    pub chunks: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct MetadataStateMachine {
    files: HashMap<String, Vec<String>>,
    chunks: HashMap<String, Vec<String>>,
}

impl MetadataStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one committed log entry. Per (I2) the filename-uniqueness check
    /// happens *before* any mutation of `chunks`, so a rejected command
    /// leaves the state byte-for-byte unchanged — unlike the Go original,
    /// which mutates `chunkIDToDataNodesMap` before checking for a duplicate
    /// filename (see REDESIGN FLAGS, §9).
    pub fn apply(&mut self, entry_bytes: &[u8]) -> Result<(), FsMeshError> {
        let cmd: RaftCommand = serde_json::from_slice(entry_bytes)
            .map_err(|e| FsMeshError::BadRequest(format!("could not decode command: {e}")))?;

        if cmd.operation != OP_REGISTER_FILE {
            return Err(FsMeshError::BadRequest(format!(
                "unknown operation {}",
                cmd.operation
            )));
        }

        if self.files.contains_key(&cmd.filename) {
            return Err(FsMeshError::DuplicateFile(cmd.filename));
        }

        let mut chunk_ids = Vec::with_capacity(cmd.chunks.len());
        for chunk in &cmd.chunks {
            chunk_ids.push(chunk.chunk_id.clone());
        }
        for chunk in cmd.chunks {
            self.chunks.insert(chunk.chunk_id, chunk.locations);
        }
        self.files.insert(cmd.filename, chunk_ids);

        Ok(())
    }

    /// Self-contained serialized snapshot, independent of command history.
    pub fn snapshot(&self) -> Vec<u8> {
        let snap = MetadataSnapshot {
            files: self.files.clone(),
            chunks: self.chunks.clone(),
        };
        serde_json::to_vec(&snap).expect("snapshot serialization is infallible")
    }

    /// Replace `F` and `P` wholesale from a previously produced snapshot.
    pub fn restore(&mut self, bytes: &[u8]) -> Result<(), FsMeshError> {
        let snap: MetadataSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| FsMeshError::Corrupt(format!("bad snapshot: {e}")))?;
        self.files = snap.files;
        self.chunks = snap.chunks;
        Ok(())
    }

    /// Build the ordered `{chunkId, chunkIndex, locations}` plan for a file.
    pub fn get_file_metadata(&self, filename: &str) -> Result<Vec<ChunkStruct>, FsMeshError> {
        let chunk_ids = self
            .files
            .get(filename)
            .ok_or_else(|| FsMeshError::NotFound(filename.to_string()))?;

        let mut plan = Vec::with_capacity(chunk_ids.len());
        for (index, chunk_id) in chunk_ids.iter().enumerate() {
            let locations = self.chunks.get(chunk_id).ok_or_else(|| {
                FsMeshError::Corrupt(format!(
                    "chunk {chunk_id} (part of {filename}) has no location data"
                ))
            })?;
            plan.push(ChunkStruct {
                chunk_id: chunk_id.clone(),
                chunk_index: index,
                locations: locations.clone(),
            });
        }
        Ok(plan)
    }

    #[cfg(test)]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ChunkStruct;

    fn cmd(filename: &str, chunk_ids: &[&str]) -> Vec<u8> {
        let chunks = chunk_ids
            .iter()
            .map(|id| ChunkStruct {
                chunk_id: id.to_string(),
                chunk_index: 0,
                locations: vec!["http://sn-1".to_string(), "http://sn-2".to_string()],
            })
            .collect();
        serde_json::to_vec(&RaftCommand::register_file(filename, chunks)).unwrap()
    }

    #[test]
    fn apply_register_file_populates_both_maps() {
        let mut fsm = MetadataStateMachine::new();
        fsm.apply(&cmd("a.bin", &["c1", "c2"])).unwrap();

        let plan = fsm.get_file_metadata("a.bin").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].chunk_id, "c1");
        assert_eq!(plan[0].chunk_index, 0);
        assert_eq!(plan[1].chunk_index, 1);
    }

    #[test]
    fn duplicate_filename_is_rejected_without_mutation() {
        let mut fsm = MetadataStateMachine::new();
        fsm.apply(&cmd("a.bin", &["c1"])).unwrap();

        let err = fsm.apply(&cmd("a.bin", &["c2"])).unwrap_err();
        assert!(matches!(err, FsMeshError::DuplicateFile(_)));

        // (I2): state must be untouched by the rejected command.
        let plan = fsm.get_file_metadata("a.bin").unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].chunk_id, "c1");
        assert_eq!(fsm.file_count(), 1);
    }

    #[test]
    fn unknown_operation_is_rejected_without_mutation() {
        let mut fsm = MetadataStateMachine::new();
        let bad = serde_json::to_vec(&RaftCommand {
            operation: "DELETE_FILE".to_string(),
            filename: "a.bin".to_string(),
            chunks: vec![],
        })
        .unwrap();

        assert!(fsm.apply(&bad).is_err());
        assert_eq!(fsm.file_count(), 0);
    }

    #[test]
    fn malformed_entry_is_rejected_without_mutation() {
        let mut fsm = MetadataStateMachine::new();
        assert!(fsm.apply(b"not json").is_err());
        assert_eq!(fsm.file_count(), 0);
    }

    #[test]
    fn content_addressing_shares_chunk_across_files() {
        let mut fsm = MetadataStateMachine::new();
        fsm.apply(&cmd("a.bin", &["shared", "only-a"])).unwrap();
        fsm.apply(&cmd("b.bin", &["shared", "only-b"])).unwrap();

        let plan_a = fsm.get_file_metadata("a.bin").unwrap();
        let plan_b = fsm.get_file_metadata("b.bin").unwrap();
        assert_eq!(plan_a[0].chunk_id, plan_b[0].chunk_id);
    }

    #[test]
    fn get_file_metadata_not_found() {
        let fsm = MetadataStateMachine::new();
        assert!(matches!(
            fsm.get_file_metadata("missing.bin"),
            Err(FsMeshError::NotFound(_))
        ));
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let mut fsm = MetadataStateMachine::new();
        for i in 0..100 {
            fsm.apply(&cmd(&format!("f{i}.bin"), &[&format!("c{i}")]))
                .unwrap();
        }
        let snap = fsm.snapshot();

        let mut restored = MetadataStateMachine::new();
        restored.restore(&snap).unwrap();

        assert_eq!(restored.file_count(), 100);
        for i in 0..100 {
            let original = fsm.get_file_metadata(&format!("f{i}.bin")).unwrap();
            let after = restored.get_file_metadata(&format!("f{i}.bin")).unwrap();
            assert_eq!(original, after);
        }
    }

    #[test]
    fn apply_is_deterministic_across_two_fresh_machines() {
        let commands = vec![
            cmd("a.bin", &["c1", "c2"]),
            cmd("b.bin", &["c3"]),
            cmd("a.bin", &["c4"]), // rejected: duplicate
        ];

        let mut fsm1 = MetadataStateMachine::new();
        let mut fsm2 = MetadataStateMachine::new();
        for entry in &commands {
            let _ = fsm1.apply(entry);
            let _ = fsm2.apply(entry);
        }

        assert_eq!(fsm1.snapshot(), fsm2.snapshot());
    }
}
