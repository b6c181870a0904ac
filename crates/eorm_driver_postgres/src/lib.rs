//! PostgreSQL reference adapter: a `RawConnection`/`CatalogQueries` pair
//! built on the synchronous `postgres` crate.

pub mod driver;

pub use driver::{PostgresCatalog, PostgresConnection};
