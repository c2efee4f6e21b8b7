pub mod db;
pub mod error;
pub mod mapping;
pub mod record;
pub mod settings;

pub use mapping::{BuildResult, Entry, FeedBuilder, FeedResult};
pub use record::{Field, Record, Value};
