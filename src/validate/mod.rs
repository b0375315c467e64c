//! File validators: structural checks keyed by file type.
//!
//! A validator inspects a file on disk and reports validity plus extracted
//! metadata. Validation never throws: a missing or unreadable file is a
//! `valid: false` result with a reason, which makes validation safe to run
//! inside the download pipeline without per-call-site error handling.
//!
//! Validators are stateless and side-effect-free beyond reading the target
//! file. Unregistered types fall back to a permissive size check so
//! unknown-but-downloaded files never block the pipeline; the fallback
//! marks its result so readers can see the reduced confidence.

mod epub;
mod pdf;
mod text;

pub use epub::EpubValidator;
pub use pdf::PdfValidator;
pub use text::TextValidator;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

/// Extension → file-type tag table shared by scrapers, the local scan, and
/// validator selection.
const KNOWN_EXTENSIONS: [(&str, &str); 5] = [
    ("pdf", "pdf"),
    ("epub", "epub"),
    ("txt", "txt"),
    ("text", "txt"),
    ("md", "txt"),
];

/// Maps a path or URL path to a known file-type tag by extension.
#[must_use]
pub fn file_type_for_path(path: &str) -> Option<&'static str> {
    let extension = path.rsplit('.').next()?.to_ascii_lowercase();
    KNOWN_EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, tag)| *tag)
}

/// Outcome of validating one file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the file passed the structural check.
    pub valid: bool,
    /// The file-type tag the check ran as.
    pub file_type: String,
    /// Why validation failed, when it did.
    pub error: Option<String>,
    /// Metadata extracted during the check (page counts, encodings, ...).
    pub metadata: HashMap<String, String>,
}

impl ValidationResult {
    /// A passing result for the given type.
    #[must_use]
    pub fn ok(file_type: &str) -> Self {
        Self {
            valid: true,
            file_type: file_type.to_string(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// A failing result with a reason.
    #[must_use]
    pub fn invalid(file_type: &str, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            file_type: file_type.to_string(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Capability set implemented once per supported file type.
pub trait FileValidator: Send + Sync {
    /// The file-type tag this validator owns.
    fn file_type(&self) -> &'static str;

    /// Extensions (lowercase, no dot) this validator accepts.
    fn extensions(&self) -> &'static [&'static str];

    /// Inspects the file and reports validity plus metadata.
    ///
    /// Never panics and never errors; IO problems become `valid: false`.
    fn validate(&self, path: &Path) -> ValidationResult;
}

/// Permissive fallback for unregistered file types: any non-empty file
/// passes, with the reduced confidence recorded in metadata.
#[derive(Debug, Default)]
pub struct FallbackValidator;

impl FileValidator for FallbackValidator {
    fn file_type(&self) -> &'static str {
        "unknown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn validate(&self, path: &Path) -> ValidationResult {
        match std::fs::metadata(path) {
            Err(e) => ValidationResult::invalid("unknown", format!("cannot stat file: {e}")),
            Ok(meta) if meta.len() == 0 => {
                ValidationResult::invalid("unknown", "file is empty")
            }
            Ok(meta) => ValidationResult::ok("unknown")
                .with_metadata("fallback", "true")
                .with_metadata("size", meta.len().to_string()),
        }
    }
}

/// Validator registry keyed by file-type tag and extension.
///
/// Populated explicitly at startup, like the scraper registry.
pub struct ValidatorRegistry {
    by_type: HashMap<String, Arc<dyn FileValidator>>,
    by_extension: HashMap<String, Arc<dyn FileValidator>>,
    fallback: Arc<dyn FileValidator>,
}

impl ValidatorRegistry {
    /// Creates an empty registry with only the permissive fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
            by_extension: HashMap::new(),
            fallback: Arc::new(FallbackValidator),
        }
    }

    /// Creates the registry with the builtin validators registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfValidator));
        registry.register(Arc::new(EpubValidator));
        registry.register(Arc::new(TextValidator));
        registry
    }

    /// Registers a validator under its type tag and extensions.
    pub fn register(&mut self, validator: Arc<dyn FileValidator>) {
        debug!(file_type = validator.file_type(), "registering validator");
        for extension in validator.extensions() {
            self.by_extension
                .insert((*extension).to_string(), Arc::clone(&validator));
        }
        self.by_type
            .insert(validator.file_type().to_string(), validator);
    }

    /// Selects a validator: type tag first, extension second, fallback last.
    #[must_use]
    pub fn validator_for(&self, path: &Path, file_type: Option<&str>) -> &dyn FileValidator {
        if let Some(tag) = file_type {
            if let Some(validator) = self.by_type.get(tag) {
                return validator.as_ref();
            }
        }
        if let Some(extension) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        {
            if let Some(validator) = self.by_extension.get(&extension) {
                return validator.as_ref();
            }
        }
        self.fallback.as_ref()
    }

    /// Validates a file, selecting the validator by tag/extension.
    #[must_use]
    pub fn validate(&self, path: &Path, file_type: Option<&str>) -> ValidationResult {
        self.validator_for(path, file_type).validate(path)
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
