//! Provenance: BLAKE3 hashing and the append-only event log.

pub mod eventlog;
pub mod hasher;
