#![allow(clippy::result_large_err)]

//! External `CacheBackend` adapter built on the `redis` crate — the only
//! thing in the workspace that knows what a Redis wire command looks like.

pub mod driver;

pub use driver::RedisCacheBackend;
