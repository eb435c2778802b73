//! Media message shaping and the per-tenant attachment size budget.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";
pub const PTT_MIMETYPE: &str = "audio/ogg; codecs=opus";
pub const DEFAULT_SIZE_LIMIT_MIB: u64 = 15;
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

/// Protocol-ready description of a media message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOptions {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub ptt: bool,
}

pub fn sniff_mimetype(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_MIMETYPE)
        .to_string()
}

/// Picks the message shape for a local file.
///
/// Images and videos carry the caption. Audio never does; push-to-talk audio is sent as an opus
/// voice note. Anything else goes out as a document with its file name.
pub fn resolve_media_options(
    path: &Path,
    caption: Option<&str>,
    file_name: Option<&str>,
    ptt: bool,
) -> MediaOptions {
    let mimetype = sniff_mimetype(path);
    let file_name = file_name
        .map(str::to_string)
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()));
    let caption = caption.filter(|c| !c.is_empty()).map(str::to_string);

    let kind = match mimetype.split('/').next() {
        Some("image") => MediaKind::Image,
        Some("video") => MediaKind::Video,
        Some("audio") => MediaKind::Audio,
        _ => MediaKind::Document,
    };

    match kind {
        MediaKind::Image | MediaKind::Video => MediaOptions {
            kind,
            path: path.to_path_buf(),
            mimetype,
            caption,
            file_name,
            ptt: false,
        },
        MediaKind::Audio => MediaOptions {
            kind,
            path: path.to_path_buf(),
            mimetype: if ptt { PTT_MIMETYPE.to_string() } else { mimetype },
            caption: None,
            file_name: None,
            ptt,
        },
        MediaKind::Document => MediaOptions {
            kind,
            path: path.to_path_buf(),
            mimetype,
            caption,
            file_name,
            ptt: false,
        },
    }
}

/// Parses the string-encoded MiB setting. Missing, empty, zero or unparsable values yield the
/// default.
pub fn size_limit_bytes(setting: Option<&str>) -> u64 {
    size_limit_bytes_or(setting, DEFAULT_SIZE_LIMIT_MIB)
}

pub fn size_limit_bytes_or(setting: Option<&str>, default_mib: u64) -> u64 {
    let mib = setting
        .map(str::trim)
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|mib| *mib > 0)
        .unwrap_or(default_mib);
    mib.saturating_mul(MIB)
}

/// Body of the text message sent instead of an attachment that is over the size budget.
pub fn oversized_media_text(caption: &str, file_name: &str, url: &str) -> String {
    if caption.trim().is_empty() {
        format!("📎 {file_name}\n{url}")
    } else {
        format!("{caption}\n\n📎 {file_name}\n{url}")
    }
}
