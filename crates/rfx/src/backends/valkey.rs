//! 🗝️ The Valkey backend — one hash, many fields, zero patience for stale credentials.
//!
//! Valkey speaks redis. We speak redis back. The whole collection is a single hash
//! (`users:auth` by default): field = derived credential key, value = user id.
//! Replacing it is one `DEL`. Filling it is a lot of `HSET`.

mod valkey_sink;

pub(crate) use valkey_sink::ValkeySink;
pub use valkey_sink::ValkeySinkConfig;
