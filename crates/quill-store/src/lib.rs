//! Record persistence for the Quill tool server.

pub mod error;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use record::Record;
pub use store::RecordStore;
