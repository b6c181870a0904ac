//! MySQL reference adapter: a `RawConnection`/`CatalogQueries` pair built on
//! the synchronous `mysql` crate, which already ships its own connection
//! pool (`mysql::Pool`) — no hand-rolled pool needed here unlike the
//! `eorm_driver_sqlite`/`eorm_driver_postgres` siblings.

pub mod driver;

pub use driver::{MySqlCatalog, MySqlConnection};
