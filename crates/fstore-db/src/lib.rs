mod container;
mod error;
mod export;
mod store;
mod typemap;
mod validate;

pub use container::{raw_header, APPLICATION_ID, APPLICATION_ID_DIRECTORY, VERSION};
pub use error::StoreError;
pub use export::{compact_path, ls, pack, unpack, PackReport, UnpackMode, UnpackOptions};
pub use store::Store;
pub use validate::validate;
