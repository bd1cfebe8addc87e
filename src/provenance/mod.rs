//! Provenance: BLAKE3 hashing, the JSONL event log, drift detection.

pub mod drift;
pub mod eventlog;
pub mod hasher;
