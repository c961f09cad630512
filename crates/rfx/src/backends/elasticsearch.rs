//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The search page shows an event that was cancelled in March. And one that was
//! renamed. And, somehow, the same concert four times. Nobody knows which writes
//! were lost. Nobody wants to find out.
//!
//! "I'll just rebuild the index," they whispered. Drop it, create it with the right
//! analyzer, bulk everything back in. "It'll be fast," they said.
//!
//! 🚀 This module does exactly that: it deletes the index, recreates it from an index
//! definition (settings + mappings), and feeds it `_bulk` NDJSON, one chunk per call,
//! reading back a verdict for every single document.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

mod elasticsearch_sink;

pub(crate) use elasticsearch_sink::ElasticsearchSink;
pub use elasticsearch_sink::ElasticsearchSinkConfig;
