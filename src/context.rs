//! Caller context threaded through every device operation.

/// Opaque per-caller context.
///
/// The device layer never mutates or interprets it beyond attaching its
/// label to log spans. It exists so a runtime can tag work for diagnostics
/// and so the configuration hooks can resolve settings per caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    label: Option<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    /// Label used in log spans, `"-"` when unset.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_defaults() {
        assert_eq!(Context::new().label(), "-");
        assert_eq!(Context::with_label("pipeline-3").label(), "pipeline-3");
    }
}
