use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarukiError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the game wire codec. The operation that failed is part of
/// every message so log lines can be traced back to pack or unpack.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unpack: content is empty")]
    EmptyContent,

    #[error("unpack: content length {0} is not a multiple of the AES block size")]
    InvalidBlockSize(usize),

    #[error("unpack: invalid PKCS7 padding")]
    InvalidPadding,

    #[error("init: AES key must be 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("init: AES IV must be 16 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("init: invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("pack: {0}")]
    Encode(String),

    #[error("unpack: malformed msgpack: {0}")]
    Decode(String),

    #[error("unpack: expected a map at the root, got {0}")]
    UnexpectedRoot(&'static str),
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Signature mismatch")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Token claims error: {0}")]
    Claims(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("compact schema JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compact schema root must be an object")]
    NotAnObject,

    #[error("field {field}: {reason}")]
    Field { field: String, reason: String },

    #[error("read compact schema: {0}")]
    Io(#[from] std::io::Error),
}
