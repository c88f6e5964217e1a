//! # haruki-shared
//!
//! Types and primitives shared by every Haruki toolbox crate: the region and
//! upload enums, the game wire codec (AES-128-CBC over ordered MessagePack),
//! compact record restoration, and the HS256 token helper.

pub mod codec;
pub mod compact;
pub mod constants;
pub mod error;
pub mod token;
pub mod types;

pub use codec::{SekaiCodec, Value};
pub use compact::CompactSchema;
pub use error::{CodecError, HarukiError, SchemaError, TokenError};
pub use types::{DocumentKind, Server, UploadDataType, UploadMethod, UploadPolicy};
