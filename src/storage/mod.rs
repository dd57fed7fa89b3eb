//! Record and image persistence

mod images;
mod json_file;
mod traits;

pub use images::ImageStore;
pub use json_file::JsonFileStore;
pub use traits::{RecordStore, StorageError};
