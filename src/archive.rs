//! Wrapped object payloads.
//!
//! Sources sometimes hand over a serialized object graph instead of raw
//! bytes (a string, a colour, a map location, ...). Those payloads are a
//! MessagePack document behind an 8-byte magic prefix. Decoding is limited to
//! the classes in [`ArchivedObject`]; anything else is treated as raw data.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ARCHIVE_MAGIC: &[u8; 8] = b"cvarch00";

/// Restricted allow-list of classes a wrapped payload may decode into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "value", rename_all = "kebab-case")]
pub enum ArchivedObject {
    String(String),
    AttributedText {
        text: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
    },
    Color {
        red: f32,
        green: f32,
        blue: f32,
        alpha: f32,
    },
    /// Encoded raster image bytes (PNG, JPEG, ...).
    Image(Vec<u8>),
    MapItem {
        name: Option<String>,
        latitude: f64,
        longitude: f64,
    },
    Url(String),
    Array(Vec<ArchivedObject>),
    Dictionary(BTreeMap<String, ArchivedObject>),
    Date(chrono::DateTime<chrono::Utc>),
}

impl ArchivedObject {
    /// Hex form of a colour as `#RRGGBB`, or `#RRGGBBAA` when translucent.
    pub fn hex_color(&self) -> Option<String> {
        let ArchivedObject::Color {
            red,
            green,
            blue,
            alpha,
        } = self
        else {
            return None;
        };
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let mut hex = format!(
            "#{:02X}{:02X}{:02X}",
            channel(*red),
            channel(*green),
            channel(*blue)
        );
        if *alpha < 1.0 {
            hex.push_str(&format!("{:02X}", channel(*alpha)));
        }
        Some(hex)
    }
}

/// Whether the bytes carry the archive prefix.
pub fn looks_like_archive(bytes: &[u8]) -> bool {
    bytes.len() > ARCHIVE_MAGIC.len() && bytes.starts_with(ARCHIVE_MAGIC)
}

/// Decode a wrapped payload. `None` for raw data or a corrupt archive.
pub fn unarchive(bytes: &[u8]) -> Option<ArchivedObject> {
    if !looks_like_archive(bytes) {
        return None;
    }
    match rmp_serde::from_slice(&bytes[ARCHIVE_MAGIC.len()..]) {
        Ok(object) => Some(object),
        Err(e) => {
            tracing::debug!(error = %e, "archive prefix present but payload did not decode");
            None
        }
    }
}

/// Serialize an object into the wrapped payload format.
pub fn archive(object: &ArchivedObject) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    let mut out = ARCHIVE_MAGIC.to_vec();
    out.extend(rmp_serde::to_vec_named(object)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_unwraps() {
        let bytes = archive(&ArchivedObject::String("hello".into())).unwrap();
        assert!(looks_like_archive(&bytes));
        assert_eq!(
            unarchive(&bytes),
            Some(ArchivedObject::String("hello".into()))
        );
    }

    #[test]
    fn image_bytes_survive() {
        let object = ArchivedObject::Image(vec![0x89, b'P', b'N', b'G', 0, 1, 2]);
        let bytes = archive(&object).unwrap();
        assert_eq!(unarchive(&bytes), Some(object));
    }

    #[test]
    fn raw_bytes_are_not_archives() {
        assert!(!looks_like_archive(b"plain text"));
        assert_eq!(unarchive(b"plain text"), None);
        assert_eq!(unarchive(ARCHIVE_MAGIC), None);
    }

    #[test]
    fn corrupt_archive_is_raw_data() {
        let mut bytes = ARCHIVE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0xc1, 0xff, 0x00]);
        assert_eq!(unarchive(&bytes), None);
    }

    #[test]
    fn hex_color_formats() {
        let opaque = ArchivedObject::Color {
            red: 1.0,
            green: 0.5,
            blue: 0.0,
            alpha: 1.0,
        };
        assert_eq!(opaque.hex_color().as_deref(), Some("#FF8000"));
        let clear = ArchivedObject::Color {
            red: 0.0,
            green: 0.0,
            blue: 0.0,
            alpha: 0.0,
        };
        assert_eq!(clear.hex_color().as_deref(), Some("#00000000"));
        assert_eq!(ArchivedObject::Url("x".into()).hex_color(), None);
    }
}
