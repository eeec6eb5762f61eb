// Shared vocabulary of the dataset service: errors, metadata, filters,
// operation state and its durable store.

mod error;
mod logging;
pub mod filter;
pub mod metadata;
pub mod operation;
pub mod state_db;

pub use error::*;
pub use filter::*;
pub use logging::*;
pub use metadata::*;
pub use operation::*;
pub use state_db::*;

#[cfg(test)]
mod filter_tests;
