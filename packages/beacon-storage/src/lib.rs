pub mod db;
pub mod history;
pub mod models;
pub mod operations;
pub mod queries;
pub mod schema;
pub mod sources;
pub mod triggers;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
