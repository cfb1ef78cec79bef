pub mod alias;
pub mod cas;
pub mod config;
pub mod error;
pub mod http_api;
pub mod inspect;
pub mod metastore;
pub mod metrics;
pub mod retrieve;
pub mod tree;
pub mod vfs;

pub use error::{Error, Result};
pub use vfs::{Flags, Placement, ReadResult, TreeFs};
