/// Outcome of inspecting a filename stem for the wiki's hex byte encoding.
///
/// Fandom stores some uploads under names like `_CE_9F_CE_94`, where each
/// underscore-separated group is one byte of the UTF-8 encoded title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StemDecoding {
    Decoded(String),
    NotEncoded,
}

impl StemDecoding {
    pub fn into_title(self) -> Option<String> {
        match self {
            Self::Decoded(title) => Some(title),
            Self::NotEncoded => None,
        }
    }
}

const SEPARATOR: char = '_';

/// Decode a stem of the form `_XX_XX_XX` back to the title it encodes.
///
/// Any piece that is not exactly two hex digits, an empty byte sequence, or
/// invalid UTF-8 yields [`StemDecoding::NotEncoded`].
pub fn decode_stem(stem: &str) -> StemDecoding {
    let body = stem.strip_prefix(SEPARATOR).unwrap_or(stem);
    if body.is_empty() {
        return StemDecoding::NotEncoded;
    }

    let mut bytes = Vec::with_capacity(body.len() / 3 + 1);
    for piece in body.split(SEPARATOR) {
        let Some(byte) = hex_byte(piece) else {
            return StemDecoding::NotEncoded;
        };
        bytes.push(byte);
    }

    match String::from_utf8(bytes) {
        Ok(title) => StemDecoding::Decoded(title),
        Err(_) => StemDecoding::NotEncoded,
    }
}

/// Inverse of [`decode_stem`]: `ΟΔ` becomes `_CE_9F_CE_94`.
pub fn encode_title(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }
    let mut output = String::with_capacity(title.len() * 3);
    for byte in title.as_bytes() {
        output.push(SEPARATOR);
        output.push_str(&format!("{byte:02X}"));
    }
    output
}

fn hex_byte(piece: &str) -> Option<u8> {
    let bytes = piece.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u8::from_str_radix(piece, 16).ok()
}
