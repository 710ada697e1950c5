pub mod codec;
pub mod compress;
pub mod discovery;
pub mod error;
pub mod http;
pub mod types;

pub use codec::{decode_message, encode_message};
pub use error::WireError;
pub use types::*;
