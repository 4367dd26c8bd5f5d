//! Markdown report generation.
//!
//! [`MarkdownGenerator`] renders a [`Report`] as a short Markdown document:
//! a summary table, completion per category, and the completed exercises.
//!
//! # Example
//!
//! ```rust
//! use infralab_report::{MarkdownGenerator, ProgressInput, Report};
//!
//! let report = Report::new(&ProgressInput::default());
//! let markdown = MarkdownGenerator::new(&report).generate();
//! assert!(markdown.starts_with("# infralab Progress Report"));
//! ```

use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::{Report, Result};

/// Generates Markdown progress reports.
pub struct MarkdownGenerator<'a> {
    report: &'a Report,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    ///
    /// # Arguments
    ///
    /// * `report` - Reference to the report to render.
    ///
    /// # Example
    ///
    /// ```rust
    /// use infralab_report::{MarkdownGenerator, ProgressInput, Report};
    ///
    /// let report = Report::new(&ProgressInput::default());
    /// let generator = MarkdownGenerator::new(&report);
    /// ```
    #[must_use]
    pub const fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_categories(&mut output);
        self.write_completed(&mut output);
        self.write_footer(&mut output);

        output
    }

    /// Writes the Markdown report to a file, creating or overwriting it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ReportError::Io`] if file creation or writing fails.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.generate())?;
        Ok(())
    }

    fn write_title(&self, output: &mut String) {
        let name = self.report.user_name.trim();
        if name.is_empty() {
            let _ = writeln!(output, "# infralab Progress Report\n");
        } else {
            let _ = writeln!(output, "# infralab Progress Report: {}\n", escape_markdown(name));
        }
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(
            output,
            "| Completed | {} / {} ({}%) |",
            report.completed, report.total, report.percentage
        );
        let _ = writeln!(output, "| Score | {} |", report.score);
        let _ = writeln!(output, "| Badge | {} |", report.tier);

        let next = report.next_tier.map_or_else(
            || {
                if report.total > 0 {
                    "All exercises completed".to_string()
                } else {
                    "-".to_string()
                }
            },
            |next| {
                format!(
                    "{} ({} more {})",
                    next.tier,
                    next.exercises_needed,
                    plural(next.exercises_needed, "exercise", "exercises")
                )
            },
        );
        let _ = writeln!(output, "| Next Badge | {next} |");
        let _ = writeln!(output);
    }

    fn write_categories(&self, output: &mut String) {
        let _ = writeln!(output, "## Categories\n");

        if self.report.categories.is_empty() {
            let _ = writeln!(output, "*No exercises in the catalog.*\n");
            return;
        }

        let _ = writeln!(output, "| Category | Completed |");
        let _ = writeln!(output, "|----------|-----------|");
        for category in &self.report.categories {
            let _ = writeln!(
                output,
                "| {} | {} / {} |",
                escape_markdown(&category.category),
                category.completed,
                category.total
            );
        }
        let _ = writeln!(output);
    }

    fn write_completed(&self, output: &mut String) {
        let _ = writeln!(output, "## Completed Exercises\n");

        if self.report.completed_exercises.is_empty() {
            let _ = writeln!(output, "*No exercises completed yet.*\n");
            return;
        }

        for exercise in &self.report.completed_exercises {
            let _ = write!(
                output,
                "- {} (`{}`)",
                escape_markdown(&exercise.name),
                exercise.id
            );
            if let Some(at) = exercise.completed_at {
                let _ = write!(output, ", {}", at.format("%Y-%m-%d"));
            }
            let _ = writeln!(output);
        }
        let _ = writeln!(output);
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&self.report.generated_at);
        let _ = writeln!(output, "*Generated by infralab at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

const fn plural<'s>(count: usize, one: &'s str, many: &'s str) -> &'s str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Escapes special Markdown characters in text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            _ => result.push(ch),
        }
    }

    result
}
