//! Game wire codec: AES-128-CBC + PKCS7 over ordered MessagePack.
//!
//! EN uses its own key pair; every other server shares the second one.

pub mod cipher;
pub mod msgpack;
pub mod value;

use serde_json::{Map, Value as Json};

use crate::error::CodecError;
use crate::types::Server;

pub use cipher::CbcCipher;
pub use value::{OrderedMap, Value};

/// Per-server packer / unpacker.
#[derive(Debug, Clone)]
pub struct SekaiCodec {
    en: CbcCipher,
    other: CbcCipher,
}

impl SekaiCodec {
    pub fn new(en: CbcCipher, other: CbcCipher) -> Self {
        Self { en, other }
    }

    /// Build from hex-encoded key/IV pairs as found in configuration.
    pub fn from_hex(
        en_key: &str,
        en_iv: &str,
        other_key: &str,
        other_iv: &str,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            en: CbcCipher::from_hex(en_key, en_iv)?,
            other: CbcCipher::from_hex(other_key, other_iv)?,
        })
    }

    pub fn cipher_for(&self, server: Server) -> &CbcCipher {
        match server {
            Server::En => &self.en,
            _ => &self.other,
        }
    }

    pub fn pack(&self, value: &Value, server: Server) -> Result<Vec<u8>, CodecError> {
        if matches!(value, Value::Nil) {
            return Err(CodecError::EmptyContent);
        }
        let plain = msgpack::encode(value)?;
        if plain.is_empty() {
            return Err(CodecError::Encode("serialized payload is empty".into()));
        }
        Ok(self.cipher_for(server).encrypt(&plain))
    }

    /// JSON convenience: objects are packed as ordered maps.
    pub fn pack_json(&self, value: &Json, server: Server) -> Result<Vec<u8>, CodecError> {
        self.pack(&Value::from_json(value), server)
    }

    pub fn unpack(&self, data: &[u8], server: Server) -> Result<Value, CodecError> {
        let mut buf = Vec::with_capacity(data.len());
        self.unpack_into(data, server, &mut buf)
    }

    /// Like [`unpack`](Self::unpack) but decrypts into a caller-owned buffer
    /// so hot paths can reuse the allocation.
    pub fn unpack_into(
        &self,
        data: &[u8],
        server: Server,
        buf: &mut Vec<u8>,
    ) -> Result<Value, CodecError> {
        self.cipher_for(server).decrypt_into(data, buf)?;
        msgpack::decode(buf)
    }

    /// Unpacks a payload whose root must be a map and converts it to JSON.
    pub fn unpack_object(&self, data: &[u8], server: Server) -> Result<Map<String, Json>, CodecError> {
        let value = self.unpack(data, server)?;
        match value.into_json() {
            Json::Object(map) => Ok(map),
            Json::Array(_) => Err(CodecError::UnexpectedRoot("array")),
            _ => Err(CodecError::UnexpectedRoot("scalar")),
        }
    }
}
