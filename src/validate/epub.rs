//! EPUB structural validation.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{FileValidator, ValidationResult};

/// EPUB containers are ZIP archives whose first entry is an uncompressed
/// `mimetype` file containing `application/epub+zip`, which puts the
/// marker within the first hundred bytes of a conforming file.
const HEAD_WINDOW: usize = 512;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// Validates EPUB files by container magic and mimetype entry.
#[derive(Debug, Default)]
pub struct EpubValidator;

impl FileValidator for EpubValidator {
    fn file_type(&self) -> &'static str {
        "epub"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["epub"]
    }

    fn validate(&self, path: &Path) -> ValidationResult {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                return ValidationResult::invalid("epub", format!("cannot open file: {e}"));
            }
        };

        let mut head = vec![0u8; HEAD_WINDOW];
        let read = match file.read(&mut head) {
            Ok(read) => read,
            Err(e) => {
                return ValidationResult::invalid("epub", format!("cannot read file: {e}"));
            }
        };
        head.truncate(read);

        if !head.starts_with(ZIP_MAGIC) {
            return ValidationResult::invalid("epub", "not a ZIP container");
        }

        if !contains(&head, EPUB_MIMETYPE) {
            return ValidationResult::invalid(
                "epub",
                "ZIP container without epub mimetype entry",
            );
        }

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        ValidationResult::ok("epub").with_metadata("size", size.to_string())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_minimal_epub_head_passes() {
        let dir = tempfile::tempdir().unwrap();
        // ZIP local header for an uncompressed "mimetype" entry.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PK\x03\x04");
        bytes.extend_from_slice(&[0u8; 26]);
        bytes.extend_from_slice(b"mimetype");
        bytes.extend_from_slice(b"application/epub+zip");
        bytes.extend_from_slice(b"rest of archive");
        let path = write_file(&dir, "book.epub", &bytes);

        let result = EpubValidator.validate(&path);
        assert!(result.valid, "error: {:?}", result.error);
    }

    #[test]
    fn test_non_zip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "fake.epub", b"%PDF-1.4 surprise");

        let result = EpubValidator.validate(&path);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("ZIP"));
    }

    #[test]
    fn test_zip_without_mimetype_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"PK\x03\x04");
        bytes.extend_from_slice(b"just an ordinary zip");
        let path = write_file(&dir, "plain.epub", &bytes);

        let result = EpubValidator.validate(&path);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("mimetype"));
    }

    #[test]
    fn test_missing_file_reports_instead_of_panicking() {
        let result = EpubValidator.validate(Path::new("/nonexistent/b.epub"));
        assert!(!result.valid);
    }
}
