pub mod loader;
pub mod schema;

pub use loader::{ConfigLoadError, load_query_config, load_query_set};
pub use schema::QuerySetConfig;
