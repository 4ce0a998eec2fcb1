//! Filename helpers shared by the resolver and the stages.

/// Name used when nothing better can be derived.
pub const DEFAULT_FILENAME: &str = "video.mkv";

/// Longest sanitized stem kept, in characters.
const MAX_STEM_CHARS: usize = 200;

/// Characters that are illegal in file names on at least one common platform.
const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Make a user- or remote-supplied name safe to use as a single path segment.
///
/// Strips illegal and control characters, collapses whitespace runs to a single
/// space and trims leading dots so the result is never hidden or a traversal.
/// Returns an empty string if nothing usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_CHARS.contains(&c) || c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed
        .trim_start_matches(|c: char| c == '.' || c == ' ')
        .trim();

    trimmed.chars().take(MAX_STEM_CHARS).collect::<String>().trim().to_string()
}

/// Append `.ext` unless `name` already ends with it (case-insensitive).
pub fn ensure_extension(name: &str, ext: &str) -> String {
    let suffix = format!(".{}", ext.to_lowercase());
    if name.to_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Sanitize `name` and force the container extension, falling back to
/// `fallback` when the sanitized name is empty.
pub fn output_filename(name: Option<&str>, ext: &str, fallback: &str) -> String {
    let sanitized = name.map(sanitize_filename).unwrap_or_default();
    if sanitized.is_empty() {
        ensure_extension(fallback, ext)
    } else {
        ensure_extension(&sanitized, ext)
    }
}

/// Human-readable byte size (B/KB/MB/GB).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
