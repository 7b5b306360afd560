//! ICC profile identity.
//!
//! Parses just enough of the ICC binary layout (header + tag table) to pull
//! out a stable identity for a profile: its description, copyright, and
//! viewing-conditions text, plus a SHA-256 content fingerprint. Two
//! profiles are the same profile exactly when their fingerprints match.
//!
//! Full profile semantics (tag data beyond the text tags, PCS conversions)
//! stay with the color-management engine; this module never interprets
//! color data.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Profile data too short: {0} bytes")]
    TooShort(usize),
    #[error("Bad profile signature")]
    BadSignature,
}

const HEADER_LEN: usize = 128;
const SIGNATURE_OFFSET: usize = 36;
const INTENT_OFFSET: usize = 64;
const IDENTITY_PREFIX_LEN: usize = 12;

/// Immutable wrapper around raw ICC profile bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct IccProfile {
    bytes: Vec<u8>,
    fingerprint: String,
    description: Option<String>,
    copyright: Option<String>,
    viewing_conditions: Option<String>,
    rendering_intent: u32,
}

impl std::fmt::Debug for IccProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IccProfile")
            .field("identity", &self.identity())
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl IccProfile {
    /// Parse profile bytes. The header must be complete and carry the
    /// `acsp` signature; a missing or malformed tag table degrades to a
    /// profile with no text attributes rather than an error.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ProfileError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProfileError::TooShort(bytes.len()));
        }
        if &bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 4] != b"acsp" {
            return Err(ProfileError::BadSignature);
        }
        let fingerprint = format!("{:x}", Sha256::digest(&bytes));
        let rendering_intent = read_u32(&bytes, INTENT_OFFSET).unwrap_or(0);
        let description = find_text_tag(&bytes, b"desc");
        let copyright = find_text_tag(&bytes, b"cprt");
        let viewing_conditions = find_text_tag(&bytes, b"vued");
        Ok(Self {
            bytes,
            fingerprint,
            description,
            copyright,
            viewing_conditions,
            rendering_intent,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the raw bytes, lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Human-readable identity: the description tag when present, otherwise
    /// a fingerprint prefix.
    pub fn identity(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(&self.fingerprint[..IDENTITY_PREFIX_LEN])
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn viewing_conditions_description(&self) -> Option<&str> {
        self.viewing_conditions.as_deref()
    }

    /// Rendering intent from header bytes 64-67 (0 perceptual, 1 relative
    /// colorimetric, 2 saturation, 3 absolute colorimetric).
    pub fn header_rendering_intent(&self) -> u32 {
        self.rendering_intent
    }

    /// True when `bytes` hashes to this profile's fingerprint.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        format!("{:x}", Sha256::digest(bytes)) == self.fingerprint
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Walk the tag table for the first tag with the given signature and decode
/// its text payload. Malformed entries are skipped, not fatal.
fn find_text_tag(bytes: &[u8], signature: &[u8; 4]) -> Option<String> {
    let declared = read_u32(bytes, HEADER_LEN)? as usize;
    let available = bytes.len().saturating_sub(HEADER_LEN + 4) / 12;
    let count = declared.min(available);
    for index in 0..count {
        let entry = HEADER_LEN + 4 + index * 12;
        if bytes.get(entry..entry + 4)? != signature {
            continue;
        }
        let offset = read_u32(bytes, entry + 4)? as usize;
        let size = read_u32(bytes, entry + 8)? as usize;
        let Some(end) = offset.checked_add(size) else {
            continue;
        };
        let Some(data) = bytes.get(offset..end) else {
            continue;
        };
        if let Some(text) = decode_text_payload(data) {
            return Some(text);
        }
    }
    None
}

/// Decode the three text encodings the identity tags use: `desc`
/// (textDescriptionType, ICC v2), `mluc` (multiLocalizedUnicodeType, ICC
/// v4), and `text` (textType).
fn decode_text_payload(data: &[u8]) -> Option<String> {
    match data.get(0..4)? {
        b"desc" => {
            let count = read_u32(data, 8)? as usize;
            let raw = data.get(12..12usize.checked_add(count)?)?;
            let text = String::from_utf8_lossy(raw);
            non_empty(text.trim_end_matches('\0'))
        }
        b"text" => {
            let raw = data.get(8..)?;
            let text = String::from_utf8_lossy(raw);
            non_empty(text.trim_end_matches('\0'))
        }
        b"mluc" => {
            let records = read_u32(data, 8)?;
            if records == 0 {
                return None;
            }
            // First record: 2-byte language + 2-byte country at 16, then
            // string byte length and offset relative to the tag start.
            let length = read_u32(data, 20)? as usize;
            let offset = read_u32(data, 24)? as usize;
            let raw = data.get(offset..offset.checked_add(length)?)?;
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            let text = String::from_utf16_lossy(&units);
            non_empty(text.trim_end_matches('\0'))
        }
        _ => None,
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
