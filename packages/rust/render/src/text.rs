//! Text encoding and measurement for the standard Type1 fonts.

use dossier_shared::AVG_CHAR_WIDTH;

/// Courier is monospaced at 600/1000 em.
const MONO_CHAR_WIDTH: f32 = 0.6;

/// Byte written for characters WinAnsi cannot represent.
const REPLACEMENT: u8 = b'?';

/// Encode `text` as WinAnsi (CP1252) bytes.
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(win_ansi_byte).collect()
}

fn win_ansi_byte(c: char) -> u8 {
    let code = c as u32;
    match c {
        '\t' => b' ',
        ' '..='~' => code as u8,
        '\u{A0}'..='\u{FF}' => code as u8,
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => REPLACEMENT,
    }
}

/// Estimated width in points of `text` set at `size`.
pub(crate) fn text_width(text: &str, size: f32, mono: bool) -> f32 {
    let per_char = if mono { MONO_CHAR_WIDTH } else { AVG_CHAR_WIDTH };
    text.chars().count() as f32 * size * per_char
}

/// Lower-case roman numeral, used for front matter page labels.
pub(crate) fn roman(mut n: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];

    let mut out = String::new();
    for (value, symbol) in TABLE {
        while n >= value {
            out.push_str(symbol);
            n -= value;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_ansi_maps_latin_and_punctuation() {
        assert_eq!(encode_win_ansi("Café"), b"Caf\xE9".to_vec());
        assert_eq!(encode_win_ansi("“ok” – •"), vec![0x93, b'o', b'k', 0x94, b' ', 0x96, b' ', 0x95]);
    }

    #[test]
    fn unmappable_becomes_question_mark() {
        assert_eq!(encode_win_ansi("α→日"), b"???".to_vec());
    }

    #[test]
    fn roman_numerals() {
        assert_eq!(roman(1), "i");
        assert_eq!(roman(4), "iv");
        assert_eq!(roman(9), "ix");
        assert_eq!(roman(14), "xiv");
        assert_eq!(roman(2024), "mmxxiv");
    }

    #[test]
    fn monospace_is_wider() {
        assert!(text_width("abc", 10.0, true) > text_width("abc", 10.0, false));
    }
}
