//! Non-fatal events raised while building a session.
//!
//! Every diagnostic is forwarded to the `log` facade at `warn` level as it is
//! recorded and kept in order so callers can inspect or re-emit them.

use serde::Serialize;
use std::fmt;

/// Category of a non-fatal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Dropped stimulus frames above tolerance.
    DroppedFrames,
    /// Running-speed outliers removed or long outlier runs.
    RunningOutliers,
    /// Block count differs from the expected count.
    BlockCount,
    /// A trailing segment was pushed into the next block or omitted.
    BlockRemainder,
    /// A sequence was dropped because its window left the recording.
    SequenceDropped,
    /// Anything else worth surfacing.
    Other,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::DroppedFrames => "dropped frames",
            DiagnosticKind::RunningOutliers => "running outliers",
            DiagnosticKind::BlockCount => "block count",
            DiagnosticKind::BlockRemainder => "block remainder",
            DiagnosticKind::SequenceDropped => "sequence dropped",
            DiagnosticKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Ordered list of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a diagnostic and emit it through `log::warn!`.
    pub fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{kind}: {message}");
        self.0.push(Diagnostic { kind, message });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A value together with the diagnostics produced while computing it.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub value: T,
    pub diagnostics: Diagnostics,
}

impl<T> Loaded<T> {
    pub fn new(value: T, diagnostics: Diagnostics) -> Self {
        Self { value, diagnostics }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Loaded<U> {
        Loaded { value: f(self.value), diagnostics: self.diagnostics }
    }

    pub fn into_parts(self) -> (T, Diagnostics) {
        (self.value, self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_order_and_filters_by_kind() {
        let mut d = Diagnostics::new();
        d.warn(DiagnosticKind::BlockCount, "3 blocks found, 2 expected");
        d.warn(DiagnosticKind::DroppedFrames, "0.1% dropped");
        d.warn(DiagnosticKind::BlockCount, "again");
        assert_eq!(d.len(), 3);
        assert_eq!(d.of_kind(DiagnosticKind::BlockCount).count(), 2);
        assert_eq!(d.iter().next().map(|x| x.message.as_str()), Some("3 blocks found, 2 expected"));
    }
}
