use std::collections::HashMap;
use std::sync::OnceLock;

use thiserror::Error;

/// Classic protocol strings are always this long on the wire.
pub const STRING_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("not enough data: expected {expected} bytes, got {got}")]
    NotEnoughData { expected: usize, got: usize },
    #[error("unknown packet id 0x{0:02X}")]
    UnknownPacket(u8),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// How strings leave the server. Classic clients are CP437 terminals;
/// the full table is only safe once the peer negotiated FullCP437 and
/// EmoteFix, otherwise anything outside ASCII is squashed to '?'.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMode {
    #[default]
    Ascii,
    FullCp437,
}

/// Code page 437, byte value to glyph.
const CP437_TABLE: [char; 256] = [
    '\u{0000}', '☺', '☻', '♥', '♦', '♣', '♠', '•', '◘', '○', '◙', '♂', '♀', '♪', '♫', '☼', //
    '►', '◄', '↕', '‼', '¶', '§', '▬', '↨', '↑', '↓', '→', '←', '∟', '↔', '▲', '▼', //
    ' ', '!', '"', '#', '$', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/', //
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?', //
    '@', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '[', '\\', ']', '^', '_', //
    '`', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', //
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '{', '|', '}', '~', '⌂', //
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

fn cp437_reverse() -> &'static HashMap<char, u8> {
    static REVERSE: OnceLock<HashMap<char, u8>> = OnceLock::new();
    REVERSE.get_or_init(|| {
        let mut map = HashMap::with_capacity(256);
        for (byte, &c) in CP437_TABLE.iter().enumerate() {
            map.entry(c).or_insert(byte as u8);
        }
        map
    })
}

/// Encode one char to its CP437 byte. Unmappable chars become '?'.
pub fn encode_char(c: char, mode: StringMode) -> u8 {
    if c.is_ascii() && c != '\u{007F}' {
        return c as u8;
    }
    match mode {
        StringMode::Ascii => b'?',
        StringMode::FullCp437 => cp437_reverse().get(&c).copied().unwrap_or(b'?'),
    }
}

/// Decode one CP437 byte to a char.
pub fn decode_char(byte: u8, mode: StringMode) -> char {
    match mode {
        StringMode::FullCp437 => CP437_TABLE[byte as usize],
        StringMode::Ascii => {
            if byte.is_ascii() && byte != 0x7F {
                byte as char
            } else {
                '?'
            }
        }
    }
}

/// Pack a string into the fixed 64-byte wire form: encode, truncate,
/// right-pad with spaces. A trailing '&' is stripped first (a dangling
/// color escape crashes older classic clients).
pub fn pack_string(s: &str, mode: StringMode) -> [u8; STRING_LEN] {
    let trimmed = s.strip_suffix('&').unwrap_or(s);
    let mut out = [b' '; STRING_LEN];
    for (slot, c) in out.iter_mut().zip(trimmed.chars()) {
        *slot = encode_char(c, mode);
    }
    out
}

/// Unpack a 64-byte wire string, trimming the space/NUL padding.
pub fn unpack_string(data: &[u8], mode: StringMode) -> String {
    let end = data
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    data[..end].iter().map(|&b| decode_char(b, mode)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_string_pads_to_64() {
        let packed = pack_string("hello", StringMode::Ascii);
        assert_eq!(packed.len(), STRING_LEN);
        assert_eq!(&packed[..5], b"hello");
        assert!(packed[5..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_pack_string_strips_trailing_ampersand() {
        let packed = pack_string("oops&", StringMode::Ascii);
        assert_eq!(unpack_string(&packed, StringMode::Ascii), "oops");
    }

    #[test]
    fn test_pack_string_truncates() {
        let long = "x".repeat(100);
        let packed = pack_string(&long, StringMode::Ascii);
        assert_eq!(unpack_string(&packed, StringMode::Ascii), "x".repeat(64));
    }

    #[test]
    fn test_ascii_mode_replaces_non_ascii() {
        let packed = pack_string("café ░", StringMode::Ascii);
        assert_eq!(unpack_string(&packed, StringMode::Ascii), "caf? ?");
    }

    #[test]
    fn test_full_cp437_roundtrip() {
        let message = "café ░▒▓ ♥";
        let packed = pack_string(message, StringMode::FullCp437);
        assert_eq!(unpack_string(&packed, StringMode::FullCp437), message);
    }

    #[test]
    fn test_unpack_trims_nul_padding() {
        let mut data = [0u8; STRING_LEN];
        data[..4].copy_from_slice(b"test");
        assert_eq!(unpack_string(&data, StringMode::Ascii), "test");
    }

    #[test]
    fn test_cp437_table_covers_ascii_identity() {
        for byte in 0x20..0x7F_u8 {
            assert_eq!(CP437_TABLE[byte as usize], byte as char);
        }
    }
}
