//! Enclosure content sniffing.
//!
//! Feeds routinely misdeclare enclosure MIME types (`audio/mp3`,
//! `application/octet-stream`). When the actual bytes are available, the
//! sniffed type wins and the stored file name gets a matching extension.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEnclosureType {
    /// The type to store: sniffed when recognizable, declared otherwise.
    pub mime_type: String,
    /// True when the declared type disagreed with the sniffed one.
    pub declared_mismatch: bool,
}

/// Resolve an enclosure's MIME type from its leading bytes.
///
/// Unrecognizable bytes fall back to the declared type, or
/// `application/octet-stream` when the feed declared nothing.
pub fn resolve_enclosure_type(declared: Option<&str>, bytes: &[u8]) -> ResolvedEnclosureType {
    match infer::get(bytes) {
        Some(kind) => {
            let sniffed = kind.mime_type();
            let declared_mismatch = declared
                .map(|d| !d.trim().eq_ignore_ascii_case(sniffed))
                .unwrap_or(false);
            if declared_mismatch {
                log::debug!(
                    "declared enclosure type {:?} disagrees with sniffed {sniffed}",
                    declared
                );
            }
            ResolvedEnclosureType {
                mime_type: sniffed.to_string(),
                declared_mismatch,
            }
        }
        None => ResolvedEnclosureType {
            mime_type: declared
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            declared_mismatch: false,
        },
    }
}

/// Rewrite `name`'s extension to match `mime_type`. Unknown types leave the
/// name untouched.
pub fn corrected_file_name(name: &str, mime_type: &str) -> String {
    let Some(extension) = extension_for_mime(mime_type) else {
        return name.to_string();
    };
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.{extension}"),
        _ => format!("{name}.{extension}"),
    }
}

/// File name portion of an enclosure URL, query string stripped.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let name = url.split('/').next_back()?;
    let name = name.split('?').next().unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/aac" => Some("aac"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "video/mp4" => Some("mp4"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
