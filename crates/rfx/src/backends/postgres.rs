//! 🐘 The PostgreSQL backend — the system of record, read one `LIMIT/OFFSET` page at a time.
//!
//! It remembers everything. It forgives nothing. It has a `users` table with a column
//! called `password_hash` and we are about to read every active row of it.

mod postgres_source;

pub(crate) use postgres_source::PostgresSource;
pub use postgres_source::PostgresSourceConfig;
