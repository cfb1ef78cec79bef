mod fjall_store;
mod metadata;
mod record;
mod traits;

pub use fjall_store::FjallStore;
pub use metadata::Metadata;
pub use record::{FileRecord, RecordField, RecordPatch, FOLDER_MIME_TYPE};
pub use traits::{Durability, MetaStore};
