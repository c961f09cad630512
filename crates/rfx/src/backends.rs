//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Source backends pour the records, Sink backends slurp them up.
//! And in between, we panic! (kidding, we use anyhow)
//!
//! 🎭 This module is the casting agency. Need to page through the system of record?
//! Replay a JSON export from disk? Summon records from the in-memory void?
//! Refill a Valkey hash? Rebuild an Elasticsearch index from scratch?
//! We've got a backend for that.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

pub(crate) mod elasticsearch;
pub(crate) mod file;
pub(crate) mod in_mem;
pub(crate) mod postgres;
mod sink;
mod source;
pub(crate) mod valkey;

pub(crate) use sink::{Sink, SinkBackend};
pub(crate) use source::{Source, SourceBackend};
