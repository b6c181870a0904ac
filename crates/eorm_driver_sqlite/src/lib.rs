//! SQLite reference adapter: a `RawConnection`/`CatalogQueries` pair built on
//! `rusqlite`, the only crate in the workspace that knows what a SQLite file
//! looks like.

pub mod driver;

pub use driver::{SqliteCatalog, SqliteConnection};
