//! Accepted input formats, display-name handling and the MIME table

use lazy_static::lazy_static;
use std::collections::HashMap;

/// Extensions the service knows how to feed to the codec
pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["mp3", "wav", "flac", "m4a", "aac"];

/// Per-file upload limit (100 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Stem used when an upload name has nothing before its extension
const FALLBACK_STEM: &str = "audio";

lazy_static! {
    static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("wav", "audio/wav");
        m.insert("mp3", "audio/mpeg");
        m.insert("zip", "application/zip");
        m.insert("mp4", "video/mp4");
        m.insert("pdf", "application/pdf");
        m
    };
}

/// Set of input extensions a batch accepts, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    accepted: Vec<String>,
}

impl FormatPolicy {
    /// Create a policy from extensions given with or without a leading dot
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { accepted }
    }

    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    /// Check whether a caller-supplied file name carries an accepted extension.
    ///
    /// A bare extension such as `.mp3` has no stem and is not accepted.
    pub fn accepts(&self, display_name: &str) -> bool {
        let lower = file_component(display_name).to_lowercase();
        self.accepted
            .iter()
            .any(|ext| lower.len() > ext.len() + 1 && lower.ends_with(&format!(".{ext}")))
    }
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::new(["mp3"])
    }
}

/// Last path component of a caller-supplied name, with either separator style
pub fn file_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Caller-facing name without directories or extension
pub fn display_stem(name: &str) -> String {
    let file = file_component(name);
    let stem = match file.rfind('.') {
        Some(idx) => &file[..idx],
        None => file,
    };
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// Lowercased extension of a name, if any
pub fn extension_of(name: &str) -> Option<String> {
    let file = file_component(name);
    file.rfind('.')
        .map(|idx| file[idx + 1..].to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// MIME type for a file name; unknown extensions map to a generic binary type
pub fn mime_type_for(name: &str) -> &'static str {
    extension_of(name)
        .and_then(|ext| MIME_TYPES.get(ext.as_str()).copied())
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_accepts_mp3_only() {
        let policy = FormatPolicy::default();
        assert!(policy.accepts("song.mp3"));
        assert!(policy.accepts("SONG.MP3"));
        assert!(!policy.accepts("notes.txt"));
        assert!(!policy.accepts("song.wav"));
        assert!(!policy.accepts("mp3"));
    }

    #[test]
    fn test_policy_normalizes_extensions() {
        let policy = FormatPolicy::new([".FLAC", "m4a", ""]);
        assert_eq!(policy.accepted(), &["flac".to_string(), "m4a".to_string()]);
        assert!(policy.accepts("take.Flac"));
    }

    #[test]
    fn test_bare_extension_is_rejected() {
        let policy = FormatPolicy::default();
        assert!(!policy.accepts(".mp3"));
        assert!(policy.accepts("..mp3"));
    }

    #[test]
    fn test_display_stem() {
        assert_eq!(display_stem("song.mp3"), "song");
        assert_eq!(display_stem("my.live.take.mp3"), "my.live.take");
        assert_eq!(display_stem("albums/2024/track.mp3"), "track");
        assert_eq!(display_stem("C:\\music\\track.mp3"), "track");
        assert_eq!(display_stem("歌曲.mp3"), "歌曲");
        assert_eq!(display_stem(".mp3"), "audio");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a.MP3").as_deref(), Some("mp3"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type_for("song.wav"), "audio/wav");
        assert_eq!(mime_type_for("x_converted.zip"), "application/zip");
        assert_eq!(mime_type_for("a.MP3"), "audio/mpeg");
        assert_eq!(mime_type_for("data.bin"), "application/octet-stream");
        assert_eq!(mime_type_for("noext"), "application/octet-stream");
    }
}
