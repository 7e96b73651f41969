//! Free-form timestamp parsing and duration rendering.

/// Parses `S`, `M:S` or `H:M:S` (each component may be decimal) into seconds.
///
/// Anything unparseable, negative or with more than three components yields
/// `0.0`; malformed input is never an error.
pub fn parse_seconds(input: &str) -> f64 {
    let input = input.trim();
    if input.is_empty() {
        return 0.0;
    }

    let parts: Option<Vec<f64>> = input
        .split(':')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value >= 0.0)
        })
        .collect();

    let total = match parts.as_deref() {
        Some([s]) => *s,
        Some([m, s]) => m * 60.0 + s,
        Some([h, m, s]) => h * 3600.0 + m * 60.0 + s,
        _ => 0.0,
    };
    // Huge components can overflow once scaled.
    if total.is_finite() { total } else { 0.0 }
}

/// A seek offset and a strictly positive duration, both in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimWindow {
    pub start: f64,
    pub duration: f64,
}

impl TrimWindow {
    /// Builds the window from the two form fields.
    ///
    /// A missing end, or an end not after the start, disables trimming.
    pub fn between(start: Option<&str>, end: Option<&str>) -> Option<Self> {
        let end = end.map(str::trim).filter(|value| !value.is_empty())?;
        let start = start.map(parse_seconds).unwrap_or(0.0);
        let duration = parse_seconds(end) - start;
        if duration > 0.0 {
            Some(Self { start, duration })
        } else {
            None
        }
    }
}

/// Formats seconds the way ffmpeg accepts them on the command line.
pub fn format_seconds(seconds: f64) -> String {
    // f64's Display never uses exponent notation, and drops a zero fraction.
    format!("{seconds}")
}

/// Renders durations as `H:MM:SS` or `M:SS` for short clips.
pub fn format_duration(duration: u64) -> String {
    let hours = duration / 3600;
    let minutes = (duration % 3600) / 60;
    let seconds = duration % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
