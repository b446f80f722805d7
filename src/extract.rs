//! Payload decoders used by the classifier.
//!
//! Everything here is synchronous and side-effect free; heavy callers run
//! these on a blocking thread behind the ingest gate. Decoders return `None`
//! (or an [`ExtractError`]) instead of panicking on malformed input, and the
//! classifier falls through to its next branch.

use base64::Engine;
use std::io::{Cursor, Write};
use std::path::Path;

/// Extraction error. Never fatal to a component.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("zip failed: {0}")]
    Zip(String),
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════
// Text
// ═══════════════════════════════════════════════════════════════════════

pub fn decode_utf8(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

/// Decode UTF-16, honouring a byte-order mark. Without one the byte order is
/// guessed from where the zero bytes sit, defaulting to big-endian.
pub fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let (body, little_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => {
            let even_zeros = bytes.iter().step_by(2).filter(|b| **b == 0).count();
            let odd_zeros = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
            (bytes, odd_zeros > even_zeros)
        }
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// Plain text of an RTF document. `None` when the bytes are not RTF.
pub fn rtf_to_text(bytes: &[u8]) -> Option<String> {
    let source = std::str::from_utf8(bytes)
        .ok()
        .map(str::to_string)
        .unwrap_or_else(|| bytes.iter().map(|b| *b as char).collect());
    if !source.trim_start().starts_with("{\\rtf") {
        return None;
    }

    let chars: Vec<char> = source.chars().collect();
    let mut out = String::new();
    // Each entry: does this group's text get skipped?
    let mut skip_stack: Vec<bool> = vec![false];
    let mut pending_unicode_skip = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let skipping = skip_stack.last().copied().unwrap_or(false);
        match chars[i] {
            '{' => {
                skip_stack.push(skipping);
                i += 1;
            }
            '}' => {
                skip_stack.pop();
                i += 1;
            }
            '\\' => {
                i += 1;
                let Some(&next) = chars.get(i) else { break };
                if next == '\\' || next == '{' || next == '}' {
                    if !skipping {
                        out.push(next);
                    }
                    i += 1;
                    continue;
                }
                if next == '*' {
                    if let Some(top) = skip_stack.last_mut() {
                        *top = true;
                    }
                    i += 1;
                    continue;
                }
                if next == '\'' {
                    let hex: String = chars.iter().skip(i + 1).take(2).collect();
                    if let Ok(code) = u8::from_str_radix(&hex, 16) {
                        if pending_unicode_skip > 0 {
                            pending_unicode_skip -= 1;
                        } else if !skipping {
                            out.push(code as char);
                        }
                    }
                    i += 3;
                    continue;
                }
                if !next.is_ascii_alphabetic() {
                    // control symbol such as \~ or \-
                    if next == '~' && !skipping {
                        out.push(' ');
                    }
                    i += 1;
                    continue;
                }
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let num_start = i;
                if i < chars.len() && (chars[i] == '-' || chars[i].is_ascii_digit()) {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let param: Option<i32> = chars[num_start..i]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .ok();
                if i < chars.len() && chars[i] == ' ' {
                    i += 1;
                }
                match word.as_str() {
                    "fonttbl" | "colortbl" | "stylesheet" | "info" | "pict" | "header"
                    | "footer" | "listtable" | "listoverridetable" | "generator" => {
                        if let Some(top) = skip_stack.last_mut() {
                            *top = true;
                        }
                    }
                    "par" | "line" | "sect" | "page" if !skipping => out.push('\n'),
                    "tab" if !skipping => out.push('\t'),
                    "u" if !skipping => {
                        if let Some(code) = param {
                            let code = if code < 0 { code + 65536 } else { code };
                            if let Some(c) = char::from_u32(code as u32) {
                                out.push(c);
                            }
                            pending_unicode_skip = 1;
                        }
                    }
                    _ => {}
                }
            }
            '\r' | '\n' => i += 1,
            c => {
                if pending_unicode_skip > 0 {
                    pending_unicode_skip -= 1;
                } else if !skipping {
                    out.push(c);
                }
                i += 1;
            }
        }
    }
    Some(out)
}

// ═══════════════════════════════════════════════════════════════════════
// vCard
// ═══════════════════════════════════════════════════════════════════════

/// The parts of a contact card the classifier displays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactCard {
    pub given_name: String,
    pub middle_name: String,
    pub family_name: String,
    pub job_title: String,
    pub organization: String,
    pub photo: Option<Vec<u8>>,
}

impl ContactCard {
    /// `"Given Middle Family - Title, Organization"`, skipping empty parts.
    pub fn summary(&self) -> String {
        let name = join_non_empty(
            &[&self.given_name, &self.middle_name, &self.family_name],
            " ",
        );
        let job = join_non_empty(&[&self.job_title, &self.organization], ", ");
        join_non_empty(&[&name, &job], " - ")
    }
}

fn join_non_empty(parts: &[&str], separator: &str) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

/// First contact in a vCard document.
pub fn parse_vcard(bytes: &[u8]) -> Option<ContactCard> {
    let text = decode_utf8(bytes).or_else(|| decode_utf16(bytes))?;
    // Unfold continuation lines.
    let mut lines: Vec<String> = Vec::new();
    for raw in text.lines() {
        if (raw.starts_with(' ') || raw.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(&raw[1..]);
            }
        } else {
            lines.push(raw.to_string());
        }
    }

    let mut in_card = false;
    let mut card = ContactCard::default();
    let mut formatted_name = String::new();
    for line in &lines {
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("BEGIN:VCARD") {
            in_card = true;
            continue;
        }
        if upper.starts_with("END:VCARD") {
            if in_card {
                break;
            }
            continue;
        }
        if !in_card {
            continue;
        }
        let Some((head, value)) = line.split_once(':') else {
            continue;
        };
        let mut params = head.split(';');
        let name = params.next().unwrap_or_default();
        // Grouped properties look like `item1.TITLE`.
        let name = name.rsplit('.').next().unwrap_or(name).to_ascii_uppercase();
        let params: Vec<String> = params.map(|p| p.to_ascii_uppercase()).collect();
        match name.as_str() {
            "N" => {
                let mut parts = value.split(';').map(unescape_vcard);
                card.family_name = parts.next().unwrap_or_default();
                card.given_name = parts.next().unwrap_or_default();
                card.middle_name = parts.next().unwrap_or_default();
            }
            "FN" => formatted_name = unescape_vcard(value),
            "TITLE" => card.job_title = unescape_vcard(value),
            "ORG" => {
                card.organization = value.split(';').next().map(unescape_vcard).unwrap_or_default()
            }
            "PHOTO" => card.photo = decode_vcard_photo(value, &params),
            _ => {}
        }
    }
    if !in_card {
        return None;
    }
    if card.given_name.is_empty() && card.family_name.is_empty() && !formatted_name.is_empty() {
        card.given_name = formatted_name;
    }
    Some(card)
}

fn unescape_vcard(value: &str) -> String {
    value
        .replace("\\n", "\n")
        .replace("\\N", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace("\\\\", "\\")
}

fn decode_vcard_photo(value: &str, params: &[String]) -> Option<Vec<u8>> {
    let engine = base64::engine::general_purpose::STANDARD;
    if let Some(rest) = value.strip_prefix("data:") {
        let (_, data) = rest.split_once(";base64,")?;
        return engine.decode(data.trim()).ok();
    }
    let inline = params
        .iter()
        .any(|p| p == "ENCODING=B" || p == "ENCODING=BASE64" || p == "BASE64");
    if inline {
        let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        return engine.decode(cleaned).ok();
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════
// PDF
// ═══════════════════════════════════════════════════════════════════════

/// `/Title` from the document information dictionary.
pub fn pdf_title(bytes: &[u8]) -> Result<Option<String>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let Ok(info) = doc.trailer.get(b"Info") else {
        return Ok(None);
    };
    let Some(info) = resolve(&doc, info).and_then(|o| o.as_dict().ok()) else {
        return Ok(None);
    };
    let title = match info.get(b"Title").ok().and_then(|o| resolve(&doc, o)) {
        Some(lopdf::Object::String(raw, _)) => decode_pdf_string(raw),
        _ => return Ok(None),
    };
    let title = title.trim().to_string();
    Ok(if title.is_empty() { None } else { Some(title) })
}

/// An image representing the first page: its largest embedded raster image,
/// encoded as PNG or JPEG. `Ok(None)` when the page has none.
pub fn pdf_first_page_image(bytes: &[u8]) -> Result<Option<Vec<u8>>, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let Some((_, page_id)) = doc.get_pages().into_iter().next() else {
        return Ok(None);
    };
    let Some(xobjects) = page_xobjects(&doc, page_id) else {
        return Ok(None);
    };

    let mut best: Option<(u64, Vec<u8>)> = None;
    for (_, object) in xobjects.iter() {
        let Some(lopdf::Object::Stream(stream)) = resolve(&doc, object) else {
            continue;
        };
        if !matches!(stream.dict.get(b"Subtype"), Ok(lopdf::Object::Name(n)) if n == b"Image") {
            continue;
        }
        let Some((area, encoded)) = image_stream_bytes(stream) else {
            continue;
        };
        if best.as_ref().map_or(true, |(top, _)| area > *top) {
            best = Some((area, encoded));
        }
    }
    Ok(best.map(|(_, encoded)| encoded))
}

fn resolve<'a>(doc: &'a lopdf::Document, object: &'a lopdf::Object) -> Option<&'a lopdf::Object> {
    match object {
        lopdf::Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// XObject dictionary of a page, following inherited `/Resources`.
fn page_xobjects(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> Option<&lopdf::Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Some(resources) = node
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
        {
            return resources
                .get(b"XObject")
                .ok()
                .and_then(|o| resolve(doc, o))
                .and_then(|o| o.as_dict().ok());
        }
        node = node
            .get(b"Parent")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())?;
    }
    None
}

fn int_entry(dict: &lopdf::Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key) {
        Ok(lopdf::Object::Integer(v)) => u32::try_from(*v).ok(),
        _ => None,
    }
}

fn filter_names(dict: &lopdf::Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(lopdf::Object::Name(name)) => vec![name.clone()],
        Ok(lopdf::Object::Array(list)) => list
            .iter()
            .filter_map(|o| match o {
                lopdf::Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// `(pixel area, encoded image)` for an image XObject we can turn into a raster.
fn image_stream_bytes(stream: &lopdf::Stream) -> Option<(u64, Vec<u8>)> {
    let width = int_entry(&stream.dict, b"Width")?;
    let height = int_entry(&stream.dict, b"Height")?;
    let area = width as u64 * height as u64;
    let filters = filter_names(&stream.dict);

    if filters.iter().any(|f| f == b"DCTDecode") {
        return Some((area, stream.content.clone()));
    }

    let pixels = if filters.is_empty() {
        stream.content.clone()
    } else if filters.iter().all(|f| f == b"FlateDecode") {
        stream.decompressed_content().ok()?
    } else {
        return None;
    };
    if int_entry(&stream.dict, b"BitsPerComponent").unwrap_or(8) != 8 {
        return None;
    }

    let expected = (width as usize) * (height as usize);
    let dynamic = if pixels.len() == expected * 3 {
        image::RgbImage::from_raw(width, height, pixels).map(image::DynamicImage::ImageRgb8)
    } else if pixels.len() == expected {
        image::GrayImage::from_raw(width, height, pixels).map(image::DynamicImage::ImageLuma8)
    } else {
        None
    }?;
    let mut png = Vec::new();
    dynamic
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .ok()?;
    Some((area, png))
}

/// PDF text strings are UTF-16BE with a BOM or PDFDocEncoding (close enough
/// to Latin-1 for titles).
fn decode_pdf_string(raw: &[u8]) -> String {
    if let [0xFE, 0xFF, rest @ ..] = raw {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }
    raw.iter().map(|b| *b as char).collect()
}

// ═══════════════════════════════════════════════════════════════════════
// Zip
// ═══════════════════════════════════════════════════════════════════════

/// Whether the bytes start with a zip local-file, empty-archive, or
/// spanned-archive signature.
pub fn is_zip(bytes: &[u8]) -> bool {
    matches!(
        bytes,
        [b'P', b'K', 3, 4, ..] | [b'P', b'K', 5, 6, ..] | [b'P', b'K', 7, 8, ..]
    )
}

/// Zip a directory tree into memory. Entry names are relative to `dir`'s
/// parent so the archive unpacks into a folder of the same name.
///
/// `should_continue` is polled between entries; returning `false` abandons
/// the archive and yields `Ok(None)`.
pub fn zip_directory(
    dir: &Path,
    mut should_continue: impl FnMut() -> bool,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let base = dir.parent().unwrap_or(dir);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        if !should_continue() {
            return Ok(None);
        }
        let entry = entry.map_err(|e| ExtractError::Zip(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|e| ExtractError::Zip(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| ExtractError::Zip(e.to_string()))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|e| ExtractError::Zip(e.to_string()))?;
            let contents = std::fs::read(entry.path())?;
            writer.write_all(&contents)?;
        }
    }
    let cursor = writer
        .finish()
        .map_err(|e| ExtractError::Zip(e.to_string()))?;
    Ok(Some(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_with_and_without_bom() {
        let le: Vec<u8> = [0xFF, 0xFE]
            .into_iter()
            .chain("hi".encode_utf16().flat_map(|u| u.to_le_bytes()))
            .collect();
        assert_eq!(decode_utf16(&le).as_deref(), Some("hi"));
        let be: Vec<u8> = "hey".encode_utf16().flat_map(|u| u.to_be_bytes()).collect();
        assert_eq!(decode_utf16(&be).as_deref(), Some("hey"));
        let bare_le: Vec<u8> = "hey".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_utf16(&bare_le).as_deref(), Some("hey"));
        assert_eq!(decode_utf16(&[0x00]), None);
    }

    #[test]
    fn rtf_text_is_extracted() {
        let rtf = br"{\rtf1\ansi{\fonttbl\f0\fswiss Helvetica;}{\colortbl;\red255\green0\blue0;}\f0\pard Hello \b world\b0\par Caf\'e9 \{ok\}}";
        assert_eq!(rtf_to_text(rtf).as_deref(), Some("Hello world\nCaf\u{e9} {ok}"));
        assert_eq!(rtf_to_text(b"not rtf"), None);
    }

    #[test]
    fn rtf_unicode_escapes() {
        let rtf = br"{\rtf1 snow \u9731?man}";
        assert_eq!(rtf_to_text(rtf).as_deref(), Some("snow \u{2603}man"));
    }

    #[test]
    fn vcard_summary() {
        let card = parse_vcard(
            b"BEGIN:VCARD\r\nVERSION:3.0\r\nN:Doe;Jane;Q;;\r\nFN:Jane Q Doe\r\nTITLE:Engineer\r\nORG:Acme\\, Inc;R&D\r\nEND:VCARD\r\n",
        )
        .unwrap();
        assert_eq!(card.summary(), "Jane Q Doe - Engineer, Acme, Inc");
        assert_eq!(card.photo, None);
    }

    #[test]
    fn vcard_falls_back_to_formatted_name_and_reads_photo() {
        let card = parse_vcard(
            b"BEGIN:VCARD\nVERSION:3.0\nFN:Sam\nPHOTO;ENCODING=b;TYPE=JPEG:aGVs\n bG8=\nEND:VCARD\n",
        )
        .unwrap();
        assert_eq!(card.summary(), "Sam");
        assert_eq!(card.photo.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn not_a_vcard() {
        assert_eq!(parse_vcard(b"hello"), None);
    }

    #[test]
    fn zip_signature() {
        assert!(is_zip(b"PK\x03\x04rest"));
        assert!(is_zip(b"PK\x05\x06"));
        assert!(!is_zip(b"PK"));
        assert!(!is_zip(b"%PDF-1.4"));
    }

    #[test]
    fn directories_zip_and_can_be_abandoned() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("bundle");
        std::fs::create_dir_all(dir.join("inner")).unwrap();
        std::fs::write(dir.join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.join("inner").join("b.txt"), "beta").unwrap();

        let bytes = zip_directory(&dir, || true).unwrap().unwrap();
        assert!(is_zip(&bytes));
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"bundle/a.txt"));
        assert!(names.contains(&"bundle/inner/b.txt"));

        assert_eq!(zip_directory(&dir, || false).unwrap(), None);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = pdf_title(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
        assert!(err.to_string().starts_with("PDF extraction failed: "));
        assert!(pdf_first_page_image(b"not a pdf").is_err());
    }

    #[test]
    fn io_errors_convert_and_keep_their_source() {
        use std::error::Error as _;
        let err: ExtractError = std::io::Error::other("disk gone").into();
        assert_eq!(err.to_string(), "I/O failed: disk gone");
        assert!(err.source().is_some());
    }

    #[test]
    fn text_only_pdf_has_a_title_but_no_image() {
        let pdf = sample_pdf(Some("Quarterly Report"));
        assert_eq!(pdf_title(&pdf).unwrap().as_deref(), Some("Quarterly Report"));
        assert_eq!(pdf_first_page_image(&pdf).unwrap(), None);
        assert_eq!(pdf_title(&sample_pdf(None)).unwrap(), None);
    }
}

/// A one-page PDF with a line of text and no images.
#[cfg(test)]
pub(crate) fn sample_pdf(title: Option<&str>) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let content = b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET".to_vec();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    if let Some(title) = title {
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal(title),
        });
        doc.trailer.set("Info", info_id);
    }
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}
