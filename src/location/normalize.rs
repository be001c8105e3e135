//! City name canonicalization for allow-list comparison.
//!
//! Two names match iff their normalized forms are byte-equal.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

/// Trailing region code such as " - TO" or "-TO". Runs on lowercased input.
static REGION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s*-\s*[a-z]{2}$").expect("static regex"));

/// Normalize a free-text city name.
///
/// Diacritics are removed, case is folded, surrounding whitespace is
/// trimmed, everything from the first comma on is dropped, and trailing
/// two-letter region codes are stripped. Total and idempotent.
pub fn normalize_city_name(raw: &str) -> String {
    let folded = fold(raw);
    let mut name = match folded.find(',') {
        Some(idx) => folded[..idx].trim().to_string(),
        None => folded.trim().to_string(),
    };

    while let Some(stripped) = REGION_SUFFIX
        .captures(&name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
    {
        name = stripped;
    }

    name
}

/// [`normalize_city_name`] for optional input; `None` yields "".
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize_city_name).unwrap_or_default()
}

/// Compatibility-decompose, drop combining marks, lowercase.
///
/// Decomposes a second time because lowercasing can reintroduce marks
/// (e.g. 'İ' lowercases to "i\u{307}").
fn fold(s: &str) -> String {
    let lowered: String = strip_marks(s).chars().flat_map(char::to_lowercase).collect();
    strip_marks(&lowered)
}

fn strip_marks(s: &str) -> String {
    s.nfkd().filter(|c| canonical_combining_class(*c) == 0).collect()
}
