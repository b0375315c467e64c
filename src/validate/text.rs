//! Plain-text validation.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{FileValidator, ValidationResult};

/// Sample size read from the head of the file.
const SAMPLE_BYTES: usize = 4096;

/// Validates text files by checking that a head sample decodes as UTF-8.
///
/// The sample may cut a multi-byte sequence at its end; an incomplete
/// tail within the last three bytes is not an encoding failure.
#[derive(Debug, Default)]
pub struct TextValidator;

impl FileValidator for TextValidator {
    fn file_type(&self) -> &'static str {
        "txt"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "md"]
    }

    fn validate(&self, path: &Path) -> ValidationResult {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                return ValidationResult::invalid("txt", format!("cannot open file: {e}"));
            }
        };

        let mut sample = vec![0u8; SAMPLE_BYTES];
        let read = match file.read(&mut sample) {
            Ok(read) => read,
            Err(e) => {
                return ValidationResult::invalid("txt", format!("cannot read file: {e}"));
            }
        };
        sample.truncate(read);

        if sample.contains(&0) {
            return ValidationResult::invalid("txt", "binary content (NUL byte in sample)");
        }

        match std::str::from_utf8(&sample) {
            Ok(text) => {
                let lines = text.lines().count();
                ValidationResult::ok("txt")
                    .with_metadata("encoding", "utf-8")
                    .with_metadata("sampled_lines", lines.to_string())
            }
            Err(e) if sample.len() - e.valid_up_to() <= 3 && e.error_len().is_none() => {
                // Sample boundary split a multi-byte character.
                ValidationResult::ok("txt").with_metadata("encoding", "utf-8")
            }
            Err(e) => ValidationResult::invalid(
                "txt",
                format!("invalid UTF-8 at byte {}", e.valid_up_to()),
            ),
        }
    }
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
    fn test_utf8_text_passes_with_line_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "notes.txt", "line one\nline two\n".as_bytes());

        let result = TextValidator.validate(&path);
        assert!(result.valid);
        assert_eq!(result.metadata.get("sampled_lines").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_binary_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "blob.txt", &[0x00, 0x01, 0x02, 0xFF]);

        let result = TextValidator.validate(&path);
        assert!(!result.valid);
    }

    #[test]
    fn test_invalid_utf8_fails_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "latin1.txt", &[b'c', b'a', b'f', 0xE9, b'!']);

        let result = TextValidator.validate(&path);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("invalid UTF-8"));
    }

    #[test]
    fn test_missing_file_reports_instead_of_panicking() {
        let result = TextValidator.validate(Path::new("/nonexistent/t.txt"));
        assert!(!result.valid);
    }
}
