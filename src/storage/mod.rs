pub mod cached;
pub mod postgres;
mod rows;
pub mod sqlite;
pub mod trait_def;

#[cfg(test)]
mod storage_tests;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};
