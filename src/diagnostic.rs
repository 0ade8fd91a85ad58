use serde::Serialize;

use crate::span::Span;

/// A build, verification, or simulation diagnostic.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable error class, e.g. `tile-not-found`.
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(code: &'static str, message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(code: &'static str, message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render the diagnostic to stderr using ariadne.
    ///
    /// `listing` is the declaration listing the span points into.
    pub fn render(&self, filename: &str, listing: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let message = format!("[{}] {}", self.code, self.message);
        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(&message);

        if !self.span.is_dummy() {
            report = report.with_label(
                Label::new((filename, self.span.start as usize..self.span.end as usize))
                    .with_message(&self.message)
                    .with_color(color),
            );
        }

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        // stderr is the only sink; a failed write leaves nothing else to report to
        let _ = report.finish().eprint((filename, Source::from(listing)));
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, listing: &str) {
    for diag in diagnostics {
        diag.render(filename, listing);
    }
}

/// Serialize diagnostics as the structured JSON payload.
pub fn diagnostics_to_json(diagnostics: &[Diagnostic]) -> String {
    serde_json::to_string_pretty(diagnostics).unwrap_or_else(|_| "[]".to_string())
}

/// True when at least one diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods_accumulate() {
        let d = Diagnostic::error("tile-not-found", "no tile".to_string(), Span::new(3, 9))
            .with_note("first".to_string())
            .with_note("second".to_string())
            .with_help("declare it".to_string());
        assert!(d.is_error());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("declare it"));
        assert_eq!(d.span, Span::new(3, 9));
    }

    #[test]
    fn test_json_payload_has_code_and_severity() {
        let diags = vec![
            Diagnostic::error("invalid-depth", "depth 0".to_string(), Span::dummy()),
            Diagnostic::warning("liveness", "idle".to_string(), Span::dummy()),
        ];
        let json = diagnostics_to_json(&diags);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["code"], "invalid-depth");
        assert_eq!(parsed[0]["severity"], "error");
        assert_eq!(parsed[1]["severity"], "warning");
        assert!(parsed[0].get("help").is_none());
    }

    #[test]
    fn test_has_errors_ignores_warnings() {
        let warn = Diagnostic::warning("liveness", "w".to_string(), Span::dummy());
        assert!(!has_errors(&[warn.clone()]));
        let err = Diagnostic::error("liveness", "e".to_string(), Span::dummy());
        assert!(has_errors(&[warn, err]));
    }
}
