//! Envelope message decoder
//!
//! Parses the AWS Encryption SDK message format (version 1). All integers
//! are big-endian and every variable-length field is preceded by its length.
//!
//! ```text
//! Header:
//!   version (1B) | type (1B) | suite id (2B) | message id (16B)
//!   context length (2B) | [entry count (2B) | (klen k vlen v)*]
//!   data key count (2B) | (id len, id, info len, info, key len, key)*
//!   content type (1B) | reserved (4B) | IV length (1B) | frame length (4B)
//! Header auth:
//!   IV (suite IV length) | tag (suite tag length)
//! Body (framed):
//!   seq (4B) | IV | content (frame length) | tag              (regular frame)
//!   0xFFFFFFFF | seq (4B) | IV | len (4B) | content | tag     (final frame)
//! Footer (signed suites only):
//!   signature length (2B) | signature
//! ```

use crate::binary::{read_array, read_bytes, read_prefixed_bytes, read_u16_be, read_u32_be, read_u8};
use crate::suite::AlgorithmSuite;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use thiserror::Error;
use tracing::{debug, warn};

/// Message format version understood by this decoder
pub const MESSAGE_VERSION: u8 = 0x01;

/// Message type for customer-authenticated encrypted data
pub const MESSAGE_TYPE: u8 = 0x80;

/// Length of the message identifier
pub const MESSAGE_ID_LEN: usize = 16;

/// Sequence number sentinel that introduces the final frame
pub const SEQUENCE_NUMBER_END: u32 = 0xFFFF_FFFF;

/// AAD content label for regular frames
pub const FRAME_STRING_ID: &[u8] = b"AWSKMSEncryptionClient Frame";

/// AAD content label for the final frame
pub const FINAL_FRAME_STRING_ID: &[u8] = b"AWSKMSEncryptionClient Final Frame";

/// AAD content label for non-framed bodies (not decoded)
pub const SINGLE_BLOCK_STRING_ID: &[u8] = b"AWSKMSEncryptionClient Single Block";

/// Authenticated key/value pairs bound to a message
pub type EncryptionContext = BTreeMap<String, String>;

/// Message decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated or unreadable message: {0}")]
    Truncated(#[from] io::Error),

    #[error("unknown algorithm suite 0x{0:04x}")]
    UnknownAlgorithmSuite(u16),

    #[error("unsupported content type 0x{0:02x} (only framed bodies are supported)")]
    UnsupportedContentType(u8),

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("encryption context declares {declared} bytes but its entries span {actual}")]
    ContextLengthMismatch { declared: usize, actual: usize },
}

/// Body layout of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    NonFramed = 0x01,
    Framed = 0x02,
}

impl ContentType {
    /// Parse from the wire byte
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x01 => Ok(ContentType::NonFramed),
            0x02 => Ok(ContentType::Framed),
            other => Err(DecodeError::UnsupportedContentType(other)),
        }
    }
}

/// One wrapped data key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedDataKey {
    pub provider_id: String,
    pub provider_info: String,
    pub wrapped_key: Vec<u8>,
}

/// Header authentication (IV + tag over the serialized header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAuth {
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// One encrypted body frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub is_final: bool,
    pub sequence_number: u32,
    pub iv: Vec<u8>,
    pub encrypted_content_length: u32,
    pub encrypted_content: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

impl Frame {
    /// Body AAD content label for this frame
    pub fn aad_content_label(&self) -> &'static [u8] {
        if self.is_final {
            FINAL_FRAME_STRING_ID
        } else {
            FRAME_STRING_ID
        }
    }

    /// Read one frame
    ///
    /// Regular frames carry `frame_length` bytes of content; the final frame
    /// is introduced by [`SEQUENCE_NUMBER_END`] and declares its own length.
    pub fn read_from<R: Read>(
        reader: &mut R,
        suite: &AlgorithmSuite,
        frame_length: u32,
    ) -> Result<Self, DecodeError> {
        let first = read_u32_be(reader)?;
        let is_final = first == SEQUENCE_NUMBER_END;
        let sequence_number = if is_final { read_u32_be(reader)? } else { first };

        let iv = read_bytes(reader, suite.iv_length)?;
        let encrypted_content_length = if is_final {
            read_u32_be(reader)?
        } else {
            frame_length
        };
        let encrypted_content = read_bytes(reader, encrypted_content_length as usize)?;
        let auth_tag = read_bytes(reader, suite.tag_length)?;

        Ok(Self {
            is_final,
            sequence_number,
            iv,
            encrypted_content_length,
            encrypted_content,
            auth_tag,
        })
    }
}

/// A fully decoded envelope message
#[derive(Debug, Clone)]
pub struct Message {
    pub version: u8,
    pub message_type: u8,
    pub suite_id: u16,
    pub suite: &'static AlgorithmSuite,
    pub message_id: [u8; MESSAGE_ID_LEN],
    pub encryption_context: EncryptionContext,
    pub encrypted_data_keys: Vec<EncryptedDataKey>,
    pub content_type: ContentType,
    pub reserved: u32,
    /// IV length as declared on the wire; the suite's value is authoritative
    pub iv_length: u8,
    pub frame_length: u32,
    pub header_auth: HeaderAuth,
    pub frames: Vec<Frame>,
    /// Footer signature, captured but not verified
    pub signature: Vec<u8>,
    /// Serialized header, the AAD of the header authentication tag
    pub header_bytes: Vec<u8>,
}

impl Message {
    /// Decode a message from a byte slice
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let message = Self::decode(&mut cursor)?;
        let trailing = bytes.len() as u64 - cursor.position();
        if trailing > 0 {
            debug!(trailing, "ignoring bytes after message footer");
        }
        Ok(message)
    }

    /// Decode a message from a reader
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut header = Recording::new(reader);

        let version = read_u8(&mut header)?;
        let message_type = read_u8(&mut header)?;
        let suite_id = read_u16_be(&mut header)?;
        let message_id: [u8; MESSAGE_ID_LEN] = read_array(&mut header)?;
        let context_length = read_u16_be(&mut header)?;
        let encryption_context = decode_encryption_context(&mut header, context_length)?;

        if version != MESSAGE_VERSION || message_type != MESSAGE_TYPE {
            warn!(version, message_type, "unexpected message version or type");
        }

        let suite = AlgorithmSuite::require(suite_id)?;

        let encrypted_data_keys = decode_data_keys(&mut header)?;

        let content_type_byte = read_u8(&mut header)?;
        let content_type = ContentType::from_byte(content_type_byte)?;
        let reserved = read_u32_be(&mut header)?;
        let iv_length = read_u8(&mut header)?;
        let frame_length = read_u32_be(&mut header)?;

        if iv_length as usize != suite.iv_length {
            debug!(
                declared = iv_length,
                suite_iv_length = suite.iv_length,
                "header IV length differs from suite"
            );
        }

        let header_bytes = header.into_bytes();

        let header_auth = HeaderAuth {
            iv: read_bytes(reader, suite.iv_length)?,
            tag: read_bytes(reader, suite.tag_length)?,
        };

        let frames = match content_type {
            ContentType::Framed => decode_frames(reader, suite, frame_length)?,
            ContentType::NonFramed => {
                return Err(DecodeError::UnsupportedContentType(content_type_byte));
            }
        };

        let signature = read_footer(reader)?.unwrap_or_default();

        debug!(
            suite = format_args!("0x{:04x}", suite_id),
            data_keys = encrypted_data_keys.len(),
            frames = frames.len(),
            "decoded envelope message"
        );

        Ok(Self {
            version,
            message_type,
            suite_id,
            suite,
            message_id,
            encryption_context,
            encrypted_data_keys,
            content_type,
            reserved,
            iv_length,
            frame_length,
            header_auth,
            frames,
            signature,
            header_bytes,
        })
    }

    /// Length of the footer signature
    pub fn signature_length(&self) -> u16 {
        self.signature.len() as u16
    }
}

/// Decode the context dictionary; when a key repeats, the last value wins
fn decode_encryption_context<R: Read>(
    reader: &mut R,
    context_length: u16,
) -> Result<EncryptionContext, DecodeError> {
    let mut context = EncryptionContext::new();
    if context_length == 0 {
        return Ok(context);
    }

    let raw = read_bytes(reader, context_length as usize)?;
    let mut cursor = Cursor::new(raw.as_slice());
    let entries = read_u16_be(&mut cursor)?;
    for _ in 0..entries {
        let key = utf8(read_prefixed_bytes(&mut cursor)?, "encryption context key")?;
        let value = utf8(read_prefixed_bytes(&mut cursor)?, "encryption context value")?;
        if context.contains_key(&key) {
            debug!(%key, "duplicate encryption context key");
        }
        context.insert(key, value);
    }

    let consumed = cursor.position() as usize;
    if consumed != raw.len() {
        return Err(DecodeError::ContextLengthMismatch {
            declared: raw.len(),
            actual: consumed,
        });
    }
    Ok(context)
}

fn decode_data_keys<R: Read>(reader: &mut R) -> Result<Vec<EncryptedDataKey>, DecodeError> {
    let count = read_u16_be(reader)?;
    // count comes from the wire; grow with the keys actually present
    let mut keys = Vec::with_capacity((count as usize).min(16));
    for _ in 0..count {
        let provider_id = utf8(read_prefixed_bytes(reader)?, "key provider id")?;
        let provider_info = utf8(read_prefixed_bytes(reader)?, "key provider info")?;
        let wrapped_key = read_prefixed_bytes(reader)?;
        keys.push(EncryptedDataKey {
            provider_id,
            provider_info,
            wrapped_key,
        });
    }
    Ok(keys)
}

fn decode_frames<R: Read>(
    reader: &mut R,
    suite: &AlgorithmSuite,
    frame_length: u32,
) -> Result<Vec<Frame>, DecodeError> {
    let mut frames = Vec::new();
    loop {
        let frame = Frame::read_from(reader, suite, frame_length)?;
        let is_final = frame.is_final;
        frames.push(frame);
        if is_final {
            return Ok(frames);
        }
    }
}

/// Read the footer, tolerating its absence (unsigned suites end after the final frame)
fn read_footer<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, DecodeError> {
    let mut first = [0u8; 1];
    loop {
        match reader.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let second = read_u8(reader)?;
    let length = u16::from_be_bytes([first[0], second]);
    Ok(Some(read_bytes(reader, length as usize)?))
}

fn utf8(bytes: Vec<u8>, field: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { field })
}

/// Reader adapter that keeps a copy of every byte it yields
struct Recording<'a, R> {
    inner: &'a mut R,
    bytes: Vec<u8>,
}

impl<'a, R: Read> Recording<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            bytes: Vec::new(),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl<R: Read> Read for Recording<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}
