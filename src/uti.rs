//! Hierarchical type identifiers.
//!
//! Type identifiers are reverse-DNS strings (`public.jpeg`, `com.adobe.pdf`)
//! arranged in a conformance graph: `public.jpeg` conforms to `public.image`,
//! which conforms to `public.data` and `public.content`, and so on.
//!
//! ```text
//!                 public.item
//!          ┌──────────┴───────────┐
//!     public.data           public.content
//!      │     │   └───────┬──────┘    │
//!  public.url │     public.text   public.audiovisual-content
//!      │      │       │              │
//! public.file-url  public.plain-text public.movie / public.audio
//! ```
//!
//! The table below covers the identifiers the classifier cares about.
//! Unknown identifiers conform to themselves and `public.data`.

pub const ITEM: &str = "public.item";
pub const CONTENT: &str = "public.content";
pub const DATA: &str = "public.data";
pub const TEXT: &str = "public.text";
pub const PLAIN_TEXT: &str = "public.plain-text";
pub const UTF8_PLAIN_TEXT: &str = "public.utf8-plain-text";
pub const UTF16_PLAIN_TEXT: &str = "public.utf16-plain-text";
pub const URL: &str = "public.url";
pub const FILE_URL: &str = "public.file-url";
pub const VCARD: &str = "public.vcard";
pub const IMAGE: &str = "public.image";
pub const JPEG: &str = "public.jpeg";
pub const PNG: &str = "public.png";
pub const AUDIOVISUAL: &str = "public.audiovisual-content";
pub const MOVIE: &str = "public.movie";
pub const VIDEO: &str = "public.video";
pub const AUDIO: &str = "public.audio";
pub const PDF: &str = "com.adobe.pdf";
pub const ARCHIVE: &str = "public.archive";
pub const ZIP_ARCHIVE: &str = "public.zip-archive";
pub const FOLDER: &str = "public.folder";
pub const EMAIL_MESSAGE: &str = "public.email-message";
pub const MAIL_EMAIL: &str = "com.apple.mail.email";
pub const MAP_ITEM: &str = "com.apple.mapkit.map-item";
pub const WEB_ARCHIVE: &str = "com.apple.webarchive";
pub const FLAT_RTFD: &str = "com.apple.flat-rtfd";
pub const ATTRIBUTED_STRING: &str = "com.apple.uikit.attributedstring";

/// `(identifier, direct parents)`.
static CONFORMANCE: &[(&str, &[&str])] = &[
    (CONTENT, &[ITEM]),
    (DATA, &[ITEM]),
    ("public.directory", &[ITEM]),
    (FOLDER, &["public.directory"]),
    ("public.composite-content", &[CONTENT]),
    ("public.contact", &[ITEM]),
    (TEXT, &[DATA, CONTENT]),
    (PLAIN_TEXT, &[TEXT]),
    (UTF8_PLAIN_TEXT, &[PLAIN_TEXT]),
    (UTF16_PLAIN_TEXT, &[PLAIN_TEXT]),
    ("public.utf16-external-plain-text", &[PLAIN_TEXT]),
    ("public.source-code", &[PLAIN_TEXT]),
    ("net.daringfireball.markdown", &[PLAIN_TEXT]),
    ("public.rtf", &[TEXT]),
    ("com.apple.rtfd", &[TEXT]),
    (FLAT_RTFD, &[DATA, CONTENT]),
    ("public.html", &[TEXT]),
    ("public.xml", &[TEXT]),
    ("public.json", &[TEXT]),
    ("public.url-name", &[TEXT]),
    (ATTRIBUTED_STRING, &[DATA]),
    (VCARD, &[TEXT, "public.contact"]),
    (URL, &[DATA]),
    (FILE_URL, &[URL]),
    (IMAGE, &[DATA, CONTENT]),
    (JPEG, &[IMAGE]),
    (PNG, &[IMAGE]),
    ("public.tiff", &[IMAGE]),
    ("public.heic", &[IMAGE]),
    ("com.compuserve.gif", &[IMAGE]),
    ("org.webmproject.webp", &[IMAGE]),
    ("com.microsoft.bmp", &[IMAGE]),
    ("com.microsoft.ico", &[IMAGE]),
    ("public.svg-image", &[IMAGE]),
    (AUDIOVISUAL, &[DATA, CONTENT]),
    (MOVIE, &[AUDIOVISUAL]),
    (VIDEO, &[MOVIE]),
    ("public.mpeg-4", &[MOVIE]),
    ("com.apple.quicktime-movie", &[MOVIE]),
    ("public.avi", &[VIDEO]),
    (AUDIO, &[AUDIOVISUAL]),
    ("public.mp3", &[AUDIO]),
    ("public.mpeg-4-audio", &[AUDIO]),
    ("com.microsoft.waveform-audio", &[AUDIO]),
    ("public.aiff-audio", &[AUDIO]),
    (PDF, &[DATA, "public.composite-content"]),
    (ARCHIVE, &[DATA]),
    (ZIP_ARCHIVE, &[ARCHIVE]),
    ("org.gnu.gnu-zip-archive", &[ARCHIVE]),
    (EMAIL_MESSAGE, &[DATA, CONTENT]),
    (MAIL_EMAIL, &[DATA]),
    (MAP_ITEM, &[DATA]),
    (WEB_ARCHIVE, &[DATA, "public.composite-content"]),
];

/// Direct parents of `identifier`, or `None` for identifiers outside the table.
fn parents(identifier: &str) -> Option<&'static [&'static str]> {
    CONFORMANCE
        .iter()
        .find(|(id, _)| *id == identifier)
        .map(|(_, parents)| *parents)
}

/// Whether the identifier appears in the conformance table (or is the root).
pub fn is_known(identifier: &str) -> bool {
    identifier == ITEM || parents(identifier).is_some()
}

/// Whether `identifier` is `target` or descends from it.
pub fn conforms_to(identifier: &str, target: &str) -> bool {
    if identifier == target {
        return true;
    }
    match parents(identifier) {
        Some(list) => list.iter().any(|parent| conforms_to(parent, target)),
        None if identifier == ITEM => false,
        // Unknown identifiers are treated as opaque data.
        None => conforms_to(DATA, target),
    }
}

/// Type identifier for a file extension, case-insensitive.
pub fn from_extension(extension: &str) -> Option<&'static str> {
    let id = match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" => UTF8_PLAIN_TEXT,
        "md" | "markdown" => "net.daringfireball.markdown",
        "rtf" => "public.rtf",
        "rtfd" => "com.apple.rtfd",
        "html" | "htm" => "public.html",
        "xml" => "public.xml",
        "json" => "public.json",
        "vcf" | "vcard" => VCARD,
        "jpg" | "jpeg" => JPEG,
        "png" => PNG,
        "gif" => "com.compuserve.gif",
        "tif" | "tiff" => "public.tiff",
        "heic" => "public.heic",
        "webp" => "org.webmproject.webp",
        "bmp" => "com.microsoft.bmp",
        "ico" => "com.microsoft.ico",
        "svg" => "public.svg-image",
        "mp4" | "m4v" => "public.mpeg-4",
        "mov" => "com.apple.quicktime-movie",
        "avi" => "public.avi",
        "mp3" => "public.mp3",
        "m4a" => "public.mpeg-4-audio",
        "wav" => "com.microsoft.waveform-audio",
        "aif" | "aiff" => "public.aiff-audio",
        "pdf" => PDF,
        "zip" => ZIP_ARCHIVE,
        "gz" => "org.gnu.gnu-zip-archive",
        "eml" => EMAIL_MESSAGE,
        "webarchive" => WEB_ARCHIVE,
        _ => return None,
    };
    Some(id)
}

/// Type identifier for a MIME type, ignoring parameters such as `charset`.
pub fn from_mime(mime: &str) -> Option<&'static str> {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let id = match essence.as_str() {
        "text/plain" => UTF8_PLAIN_TEXT,
        "text/html" => "public.html",
        "text/xml" | "application/xml" => "public.xml",
        "application/json" => "public.json",
        "text/rtf" | "application/rtf" => "public.rtf",
        "text/vcard" | "text/x-vcard" => VCARD,
        "image/jpeg" => JPEG,
        "image/png" => PNG,
        "image/gif" => "com.compuserve.gif",
        "image/tiff" => "public.tiff",
        "image/heic" => "public.heic",
        "image/webp" => "org.webmproject.webp",
        "image/bmp" => "com.microsoft.bmp",
        "image/x-icon" | "image/vnd.microsoft.icon" => "com.microsoft.ico",
        "image/svg+xml" => "public.svg-image",
        "video/mp4" => "public.mpeg-4",
        "video/quicktime" => "com.apple.quicktime-movie",
        "audio/mpeg" => "public.mp3",
        "audio/mp4" => "public.mpeg-4-audio",
        "audio/wav" | "audio/x-wav" => "com.microsoft.waveform-audio",
        "application/pdf" => PDF,
        "application/zip" => ZIP_ARCHIVE,
        "application/gzip" => "org.gnu.gnu-zip-archive",
        "message/rfc822" => EMAIL_MESSAGE,
        _ => return None,
    };
    Some(id)
}

/// Human-readable name for well-known identifiers.
pub fn description(identifier: &str) -> Option<&'static str> {
    let text = match identifier {
        DATA => "Data",
        URL => "Link",
        FILE_URL => "File Link",
        TEXT => "Text",
        PLAIN_TEXT => "Plain Text",
        UTF8_PLAIN_TEXT => "Unicode Plain Text",
        UTF16_PLAIN_TEXT => "Unicode-16 Plain Text",
        "public.rtf" => "Rich Text",
        "public.html" => "HTML",
        "public.xml" => "XML",
        PDF => "Adobe PDF",
        "com.apple.rtfd" => "Rich Text With Attachments Directory",
        FLAT_RTFD => "Rich Text With Attachments",
        WEB_ARCHIVE => "Web Archive",
        IMAGE => "Image",
        JPEG => "JPEG Image",
        PNG => "PNG Image",
        "public.tiff" => "TIFF Image",
        "com.compuserve.gif" => "GIF Image",
        "com.microsoft.bmp" => "BMP Image",
        "com.microsoft.ico" => "ICO Image",
        "public.svg-image" => "SVG Image",
        AUDIOVISUAL => "AV Content",
        MOVIE => "Movie",
        VIDEO => "Video",
        AUDIO => "Audio",
        "com.apple.quicktime-movie" => "QuickTime Movie",
        "public.mpeg-4" => "MPEG-4 Movie",
        "public.mp3" => "MP3 Audio",
        "public.mpeg-4-audio" => "MPEG-4 Audio",
        "com.microsoft.waveform-audio" => "Waveform Audio",
        FOLDER => "Folder",
        "public.directory" => "Directory",
        VCARD => "Contact Card",
        EMAIL_MESSAGE => "E-Mail Message",
        MAIL_EMAIL => "Mail Message",
        MAP_ITEM => "Map Location",
        ZIP_ARCHIVE => "Zip Archive",
        ARCHIVE => "Archive",
        _ => return None,
    };
    Some(text)
}
