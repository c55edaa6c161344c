use std::ops::Range;

use crate::error::CompileError;

/// A kernel diagnostic (error or warning) ready for rendering.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub labels: Vec<(Range<usize>, String)>,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn error(message: String) -> Self {
        Self {
            severity: Severity::Error,
            message,
            labels: Vec::new(),
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn with_label(mut self, range: Range<usize>, message: String) -> Self {
        self.labels.push((range, message));
        self
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    fn report<'a>(
        &'a self,
        filename: &'a str,
        source: &str,
        color: bool,
    ) -> ariadne::Report<'a, (&'a str, Range<usize>)> {
        use ariadne::{Color, Config, Label, Report, ReportKind};

        let (kind, label_color) = match self.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
        };
        let clamp = |r: &Range<usize>| {
            let start = r.start.min(source.len());
            start..r.end.clamp(start, source.len())
        };
        let offset = self.labels.first().map_or(0, |(r, _)| clamp(r).start);

        let mut report = Report::build(kind, filename, offset)
            .with_config(Config::default().with_color(color))
            .with_message(&self.message);
        for (range, message) in &self.labels {
            report = report.with_label(
                Label::new((filename, clamp(range)))
                    .with_message(message)
                    .with_color(label_color),
            );
        }
        for note in &self.notes {
            report = report.with_note(note);
        }
        if let Some(help) = &self.help {
            report = report.with_help(help);
        }
        report.finish()
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        let source_cache = (filename, ariadne::Source::from(source));
        if let Err(e) = self.report(filename, source, true).eprint(source_cache) {
            tracing::warn!("failed to render diagnostic: {e}");
        }
    }

    /// Render without colors, for logs and snapshots.
    pub fn to_plain_string(&self, filename: &str, source: &str) -> String {
        let mut out = Vec::new();
        let source_cache = (filename, ariadne::Source::from(source));
        match self.report(filename, source, false).write(source_cache, &mut out) {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.message.clone(),
        }
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        let mut diag = Diagnostic::error(err.message.clone());
        for (range, message) in &err.labels {
            diag = diag.with_label(range.clone(), message.clone());
        }
        if diag.labels.is_empty() {
            diag = diag.with_help("kernels are WGSL with at least one @compute entry point".into());
        }
        diag
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_compile_error_keeps_labels() {
        let err = CompileError::new("expected `;`").with_label(4..9, "here");
        let d = Diagnostic::from(&err);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "expected `;`");
        assert_eq!(d.labels, vec![(4..9, "here".to_string())]);
        assert!(d.help.is_none());
    }

    #[test]
    fn unlabelled_error_gets_help() {
        let d = Diagnostic::from(&CompileError::new("module has no @compute entry point"));
        assert!(d.help.is_some());
    }

    #[test]
    fn plain_rendering_mentions_file_and_message() {
        let source = "fn main() {\n    let x = ;\n}\n";
        let d = Diagnostic::error("expected expression".to_string())
            .with_label(24..25, "found `;`".to_string())
            .with_note("while parsing a let".to_string());
        let text = d.to_plain_string("bad.wgsl", source);
        assert!(text.contains("expected expression"), "{text}");
        assert!(text.contains("bad.wgsl"), "{text}");
        assert!(text.contains("found `;`"), "{text}");
        assert!(!text.contains('\u{1b}'), "colors leaked: {text:?}");
    }

    #[test]
    fn out_of_range_labels_are_clamped() {
        let d = Diagnostic::warning("tail".to_string()).with_label(100..200, "past end".to_string());
        let text = d.to_plain_string("short.wgsl", "abc");
        assert!(text.contains("tail"));
    }

    #[test]
    fn render_does_not_panic() {
        let source = "@compute @workgroup_size(1)\nfn main() {}\n";
        let d = Diagnostic::warning("unused".to_string()).with_label(28..35, "here".to_string());
        render_diagnostics(&[d], "k.wgsl", source);
    }
}
