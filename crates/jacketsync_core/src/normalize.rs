/// Map subscript (`₀`–`₉`) and superscript (`⁰`–`⁹`) digits to ASCII digits.
pub fn normalize_digits(value: &str) -> String {
    value.chars().map(ascii_digit_for).collect()
}

fn ascii_digit_for(ch: char) -> char {
    let offset = match ch {
        '\u{2080}'..='\u{2089}' => ch as u32 - 0x2080,
        '\u{2070}' => 0,
        '\u{00B9}' => 1,
        '\u{00B2}' => 2,
        '\u{00B3}' => 3,
        '\u{2074}'..='\u{2079}' => ch as u32 - 0x2070,
        _ => return ch,
    };
    char::from_digit(offset, 10).unwrap_or(ch)
}

/// Lookup slug: punctuation becomes a separator, whitespace runs collapse to a
/// single `_`, and the result is lower-cased.
///
/// `"  Fracture Ray! "` -> `"fracture_ray"`, `"INCARNATOR₀₀"` -> `"incarnator00"`.
pub fn slug(value: &str) -> String {
    let digits = normalize_digits(value.trim());
    let spaced: String = digits
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '_' || ch.is_whitespace() {
                ch
            } else {
                ' '
            }
        })
        .collect();
    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_lowercase()
}

/// Lower-cased, digit-normalized text with every space and underscore removed.
pub fn compact_key(value: &str) -> String {
    normalize_digits(value)
        .to_lowercase()
        .chars()
        .filter(|ch| !matches!(ch, ' ' | '_'))
        .collect()
}

/// Collapse internal whitespace runs to one space and drop leading/trailing whitespace.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
