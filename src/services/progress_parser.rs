//! Recognizes human-readable progress markers in script output.

use regex::Regex;
use std::sync::LazyLock;

enum Shape {
    Percent,
    Ratio,
}

static PROGRESS_PATTERNS: LazyLock<Vec<(Regex, Shape)>> = LazyLock::new(|| {
    [
        (r"(?i)\bprogress:?\s*([0-9]+(?:\.[0-9]+)?)%", Shape::Percent),
        (r"(?i)\bcompleted:?\s*([0-9]+(?:\.[0-9]+)?)%", Shape::Percent),
        (r"(?i)\b([0-9]+(?:\.[0-9]+)?)%\s*complete", Shape::Percent),
        (
            r"(?i)\bcompleted:?\s*([0-9]+(?:\.[0-9]+)?)/([0-9]+(?:\.[0-9]+)?)",
            Shape::Ratio,
        ),
        (
            r"(?i)\btask:?\s*([0-9]+(?:\.[0-9]+)?)\s*of\s*([0-9]+(?:\.[0-9]+)?)",
            Shape::Ratio,
        ),
    ]
    .into_iter()
    .map(|(pattern, shape)| (Regex::new(pattern).expect("valid regex"), shape))
    .collect()
});

/// Returns the percentage encoded in `line`, trying each recognized shape in
/// priority order. Only the first shape that matches is considered.
pub fn parse_progress(line: &str) -> Option<f64> {
    if line.trim().is_empty() {
        return None;
    }

    let (captures, shape) = PROGRESS_PATTERNS
        .iter()
        .find_map(|(regex, shape)| regex.captures(line).map(|caps| (caps, shape)))?;

    let number = |idx: usize| captures.get(idx)?.as_str().parse::<f64>().ok();

    let progress = match shape {
        Shape::Percent => number(1),
        Shape::Ratio => match (number(1), number(2)) {
            (Some(current), Some(total)) if total != 0.0 => Some(current / total * 100.0),
            _ => None,
        },
    };

    match progress {
        Some(value) if value.is_finite() => Some(value),
        _ => {
            tracing::warn!("Failed to parse progress number from: {}", line);
            None
        }
    }
}
