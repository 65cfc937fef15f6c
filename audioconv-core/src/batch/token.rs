//! Batch identifiers

use std::fmt;

/// Caller-facing name of a multi-file batch result
pub const ARCHIVE_DISPLAY_NAME: &str = "converted.zip";

/// Random 128-bit identifier, hex encoded, prefixed to every artifact a batch creates.
///
/// The encoding never contains `_`, so the first `_` in a storage name always
/// ends the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchToken(String);

impl BatchToken {
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage name for the `index`-th uploaded input
    pub fn input_name(&self, index: usize, extension: &str) -> String {
        format!("{}_input_{index}.{extension}", self.0)
    }

    /// Storage name for a converted output; stripping the token yields `display_name`
    pub fn output_name(&self, display_name: &str) -> String {
        format!("{}_{display_name}", self.0)
    }

    /// Storage name for the combined archive of a multi-file batch
    pub fn archive_name(&self) -> String {
        format!("{}_{ARCHIVE_DISPLAY_NAME}", self.0)
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        let token = BatchToken::generate();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!token.as_str().contains('_'));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let tokens: HashSet<_> = (0..1000).map(|_| BatchToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_artifact_names() {
        let token = BatchToken("abc".to_string());
        assert_eq!(token.input_name(2, "mp3"), "abc_input_2.mp3");
        assert_eq!(token.output_name("song.wav"), "abc_song.wav");
        assert_eq!(token.archive_name(), "abc_converted.zip");
    }
}
