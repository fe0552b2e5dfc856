pub mod artifacts;
mod element;
mod error;
mod flatten;
mod hashes;
mod time;

pub use element::{discriminator, element_id, ensure_id, mint_id, require_discriminator};
pub use error::CoreError;
pub use flatten::{flatten, has_dotted_keys, unflatten};
pub use hashes::HashAlgorithm;
pub use time::now_rfc3339_nanos;
