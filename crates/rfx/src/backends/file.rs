//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been tasked with reading
//! an export — just a JSON file, they said. Simple, they said. What could go wrong?
//!
//! The file didn't exist. The export was gzipped but named `.json`. And somewhere
//! in the middle of an NDJSON dump, one line was a stack trace someone pasted in.
//!
//! This module replays a static export (JSON array or NDJSON, optionally gzip'd)
//! as a pageable source. The whole export is decoded once at open and then
//! sliced by offset, which is exactly the `LIMIT/OFFSET` contract the paginator expects.
//! 🦆 (mandatory, no notes)

mod file_source;

pub(crate) use file_source::FileSource;
pub use file_source::{Compression, ExportFormat, FileSourceConfig};
