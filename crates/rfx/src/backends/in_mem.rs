//! 🧠 In-memory backends — no network, no disk, no excuses.
//!
//! The source serves a Vec of records in pages. The sink keeps a BTreeMap and can be
//! told to misbehave (reject specific keys, refuse to come up, fail writes, fail clears)
//! so the pipeline's failure paths get exercised without a live cluster. 🦆

mod in_mem_sink;
mod in_mem_source;

pub(crate) use in_mem_sink::InMemorySink;
pub use in_mem_sink::InMemorySinkConfig;
pub(crate) use in_mem_source::InMemorySource;
pub use in_mem_source::InMemorySourceConfig;
