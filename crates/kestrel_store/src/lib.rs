pub mod engine;
pub mod pagination;
pub mod translate;

pub use engine::{Asset, AssetFilter, AssetKey, Database, StoreConnection, StoreTransaction, User};
pub use pagination::{KeysetSearch, Page, PageDefinition, PAGE_SIZE_DEFAULT, PAGE_SIZE_LIMIT};
pub use translate::{translate_store_error, TranslatedError};
