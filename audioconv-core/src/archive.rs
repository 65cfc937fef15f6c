//! Bundling converted outputs into a single zip archive

use crate::error::{ConvertError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// One file to be stored in an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Where the converted file currently lives
    pub source: PathBuf,
    /// Caller-facing name without extension
    pub display_stem: String,
}

/// Result of a successful [`Packager::pack`]
#[derive(Debug, Clone)]
pub struct PackedArchive {
    pub path: PathBuf,
    /// Names stored in the archive, in order
    pub entries: Vec<String>,
}

/// Bundles converted outputs into one downloadable file
#[async_trait]
pub trait Packager: Send + Sync {
    /// Write `entries` into a new archive at `destination`
    async fn pack(
        &self,
        destination: &Path,
        entries: Vec<ArchiveEntry>,
        extension: &str,
    ) -> Result<PackedArchive>;
}

/// Zip implementation of [`Packager`]
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    compression: CompressionMethod,
}

impl Default for ArchivePackager {
    fn default() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }
}

impl ArchivePackager {
    pub fn new(compression: CompressionMethod) -> Self {
        Self { compression }
    }
}

#[async_trait]
impl Packager for ArchivePackager {
    /// Write `entries` into a new archive at `destination`.
    ///
    /// Each entry is stored as `{display_stem}.{extension}`; repeated names are
    /// made unique with [`disambiguate_names`]. Sources that vanished since
    /// conversion are skipped with a warning; an archive with no entries at
    /// all is a failure.
    async fn pack(
        &self,
        destination: &Path,
        entries: Vec<ArchiveEntry>,
        extension: &str,
    ) -> Result<PackedArchive> {
        let destination = destination.to_path_buf();
        let extension = extension.to_string();
        let compression = self.compression;

        tokio::task::spawn_blocking(move || {
            write_archive(&destination, &entries, &extension, compression)
        })
        .await
        .map_err(|e| ConvertError::PackagingFailed(format!("packaging task aborted: {e}")))?
    }
}

fn write_archive(
    destination: &Path,
    entries: &[ArchiveEntry],
    extension: &str,
    compression: CompressionMethod,
) -> Result<PackedArchive> {
    let names = disambiguate_names(
        entries
            .iter()
            .map(|entry| format!("{}.{extension}", entry.display_stem)),
    );

    let file = File::create(destination).map_err(packaging_io)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(compression);

    let mut written = Vec::with_capacity(entries.len());
    for (entry, name) in entries.iter().zip(names) {
        let mut source = match File::open(&entry.source) {
            Ok(source) => source,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(source = %entry.source.display(), "converted file vanished before packaging, skipping");
                continue;
            }
            Err(e) => return Err(packaging_io(e)),
        };
        zip.start_file(name.as_str(), options)?;
        io::copy(&mut source, &mut zip).map_err(packaging_io)?;
        written.push(name);
    }

    if written.is_empty() {
        return Err(ConvertError::PackagingFailed(
            "no converted files left to package".to_string(),
        ));
    }

    let mut writer = zip.finish()?;
    io::Write::flush(&mut writer).map_err(packaging_io)?;

    info!(archive = %destination.display(), entries = written.len(), "archive created");
    Ok(PackedArchive {
        path: destination.to_path_buf(),
        entries: written,
    })
}

fn packaging_io(err: io::Error) -> ConvertError {
    ConvertError::PackagingFailed(err.to_string())
}

/// Make every name unique while keeping order: the first occurrence is kept
/// as is, later repeats become `name (2)`, `name (3)`, ...
///
/// For names with an extension the counter goes before it (`b (2).wav`).
pub fn disambiguate_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for name in names {
        let (stem, ext) = match name.rfind('.') {
            Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
            _ => (name.as_str(), ""),
        };
        let mut candidate = name.clone();
        let mut counter = 1;
        while !seen.insert(candidate.clone()) {
            counter += 1;
            candidate = format!("{stem} ({counter}){ext}");
        }
        unique.push(candidate);
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use tempfile::TempDir;

    fn entry(dir: &Path, file: &str, content: &[u8], stem: &str) -> ArchiveEntry {
        let source = dir.join(file);
        std::fs::write(&source, content).unwrap();
        ArchiveEntry {
            source,
            display_stem: stem.to_string(),
        }
    }

    #[test]
    fn test_disambiguate_keeps_unique_names() {
        let names = disambiguate_names(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_disambiguate_suffixes_repeats() {
        let names = disambiguate_names(
            ["b", "a", "b", "b"].iter().map(|s| s.to_string()),
        );
        assert_eq!(names, vec!["b", "a", "b (2)", "b (3)"]);
    }

    #[test]
    fn test_disambiguate_puts_counter_before_extension() {
        let names = disambiguate_names(
            ["b.wav", "b.wav", "b (2).wav"].iter().map(|s| s.to_string()),
        );
        assert_eq!(names, vec!["b.wav", "b (2).wav", "b (2) (2).wav"]);
    }

    #[tokio::test]
    async fn test_pack_uses_display_names() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), "tok_a.wav", b"first", "a"),
            entry(dir.path(), "tok_b.wav", b"second", "b"),
        ];
        let destination = dir.path().join("tok_converted.zip");

        let packed = ArchivePackager::default()
            .pack(&destination, entries, "wav")
            .await
            .unwrap();
        assert_eq!(packed.entries, vec!["a.wav", "b.wav"]);

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("b.wav")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "second");
    }

    #[tokio::test]
    async fn test_pack_keeps_duplicate_display_names() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            entry(dir.path(), "1.wav", b"one", "b"),
            entry(dir.path(), "2.wav", b"two", "b"),
        ];
        let destination = dir.path().join("dup.zip");

        let packed = ArchivePackager::default()
            .pack(&destination, entries, "wav")
            .await
            .unwrap();
        assert_eq!(packed.entries, vec!["b.wav", "b (2).wav"]);

        let archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
    }

    #[tokio::test]
    async fn test_pack_skips_vanished_sources() {
        let dir = TempDir::new().unwrap();
        let mut entries = vec![entry(dir.path(), "here.wav", b"here", "here")];
        entries.push(ArchiveEntry {
            source: dir.path().join("gone.wav"),
            display_stem: "gone".to_string(),
        });
        let destination = dir.path().join("partial.zip");

        let packed = ArchivePackager::default()
            .pack(&destination, entries, "wav")
            .await
            .unwrap();
        assert_eq!(packed.entries, vec!["here.wav"]);
    }

    #[tokio::test]
    async fn test_pack_with_nothing_left_fails() {
        let dir = TempDir::new().unwrap();
        let entries = vec![ArchiveEntry {
            source: dir.path().join("gone.wav"),
            display_stem: "gone".to_string(),
        }];

        let result = ArchivePackager::default()
            .pack(&dir.path().join("empty.zip"), entries, "wav")
            .await;
        assert!(matches!(result, Err(ConvertError::PackagingFailed(_))));
    }

    #[tokio::test]
    async fn test_pack_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let entries = vec![entry(dir.path(), "a.wav", b"a", "a")];

        let result = ArchivePackager::new(CompressionMethod::Stored)
            .pack(&dir.path().join("missing/out.zip"), entries, "wav")
            .await;
        assert!(matches!(result, Err(ConvertError::PackagingFailed(_))));
    }
}
