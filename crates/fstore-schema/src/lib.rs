mod error;
mod registry;

pub use error::SchemaError;
pub use registry::SchemaRegistry;
