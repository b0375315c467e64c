//! PDF structural validation.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{FileValidator, ValidationResult};

/// How far from the end of the file the `%%EOF` marker is searched for.
/// Real writers put it in the last kilobyte; some append trailing bytes.
const TRAILER_WINDOW: u64 = 2048;

/// Validates PDF files by header and trailer markers.
///
/// A well-formed PDF starts with `%PDF-<version>` and ends with an `%%EOF`
/// marker near the end of the file; a truncated transfer loses the
/// trailer, which is exactly the corruption this check is for.
#[derive(Debug, Default)]
pub struct PdfValidator;

impl FileValidator for PdfValidator {
    fn file_type(&self) -> &'static str {
        "pdf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn validate(&self, path: &Path) -> ValidationResult {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                return ValidationResult::invalid("pdf", format!("cannot open file: {e}"));
            }
        };

        let size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                return ValidationResult::invalid("pdf", format!("cannot stat file: {e}"));
            }
        };

        let mut header = [0u8; 16];
        let header_len = match file.read(&mut header) {
            Ok(len) => len,
            Err(e) => {
                return ValidationResult::invalid("pdf", format!("cannot read header: {e}"));
            }
        };

        if header_len < 8 || !header.starts_with(b"%PDF-") {
            return ValidationResult::invalid("pdf", "missing %PDF- header");
        }

        let version = String::from_utf8_lossy(&header[5..8]).trim_end().to_string();

        let trailer_start = size.saturating_sub(TRAILER_WINDOW);
        if file.seek(SeekFrom::Start(trailer_start)).is_err() {
            return ValidationResult::invalid("pdf", "cannot seek to trailer");
        }
        let mut trailer = Vec::with_capacity(TRAILER_WINDOW as usize);
        if let Err(e) = file.read_to_end(&mut trailer) {
            return ValidationResult::invalid("pdf", format!("cannot read trailer: {e}"));
        }

        if !contains(&trailer, b"%%EOF") {
            return ValidationResult::invalid("pdf", "missing %%EOF trailer (truncated file?)");
        }

        ValidationResult::ok("pdf")
            .with_metadata("version", version)
            .with_metadata("size", size.to_string())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
