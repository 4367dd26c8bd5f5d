//! JSON report generation.
//!
//! [`JsonGenerator`] serializes a [`Report`] as compact single-line JSON for
//! scripts, or pretty-printed for people.
//!
//! # Example
//!
//! ```rust
//! use infralab_report::{ProgressInput, Report};
//! use infralab_report::json::JsonGenerator;
//!
//! let report = Report::new(&ProgressInput::default());
//! let generator = JsonGenerator::new(&report);
//!
//! let compact = generator.generate().unwrap();
//! assert!(!compact.contains('\n'));
//! assert!(compact.contains("\"tier\":\"None\""));
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::{Report, ReportError, Result};

/// JSON report generator.
///
/// Serializes a [`Report`] with camelCase field names.
///
/// # Example
///
/// ```rust
/// use infralab_report::{json::JsonGenerator, ProgressInput, Report};
///
/// let report = Report::new(&ProgressInput::default());
/// let json = JsonGenerator::new(&report).generate_pretty().unwrap();
/// assert!(json.contains("userName"));
/// ```
pub struct JsonGenerator<'a> {
    report: &'a Report,
}

impl<'a> JsonGenerator<'a> {
    /// Creates a new JSON generator for the given report.
    ///
    /// # Arguments
    ///
    /// * `report` - Reference to the report to serialize.
    ///
    /// # Example
    ///
    /// ```rust
    /// use infralab_report::{json::JsonGenerator, ProgressInput, Report};
    ///
    /// let report = Report::new(&ProgressInput::default());
    /// let generator = JsonGenerator::new(&report);
    /// ```
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates compact JSON output (single line, no extra whitespace).
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate(&self) -> Result<String> {
        serde_json::to_string(self.report).map_err(ReportError::from)
    }

    /// Generates pretty-printed JSON output with 2-space indentation.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    pub fn generate_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self.report).map_err(ReportError::from)
    }

    /// Writes the JSON report to a file, creating or overwriting it.
    ///
    /// Parent directories must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Serialization`] if JSON serialization fails.
    /// Returns [`ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path, pretty: bool) -> Result<()> {
        let mut json = if pretty {
            self.generate_pretty()?
        } else {
            self.generate()?
        };
        json.push('\n');

        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}
