//! Rough writing-system detection, used to narrow down which language models
//! are worth running on a page.

use schemars::JsonSchema;

use crate::prelude::*;

/// The writing systems we care about.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    /// Kana, usually mixed with kanji.
    Japanese,
    /// Hangul.
    Korean,
    /// Han characters with no kana.
    Chinese,
    /// Latin letters only.
    Latin,
}

/// Is this character hiragana or katakana?
fn is_kana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}')
}

/// Is this character a Hangul syllable or jamo?
fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

/// Is this character a CJK ideograph?
pub fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Guess the dominant script of `text`.
///
/// Any kana means Japanese, since Chinese never uses it. Otherwise any Hangul
/// means Korean, then Han means Chinese. Returns `None` if the text has no
/// letters at all.
pub fn detect_script(text: &str) -> Option<Script> {
    let mut han = false;
    let mut hangul = false;
    let mut latin = false;
    for c in text.chars() {
        if is_kana(c) {
            return Some(Script::Japanese);
        } else if is_hangul(c) {
            hangul = true;
        } else if is_han(c) {
            han = true;
        } else if c.is_ascii_alphabetic() {
            latin = true;
        }
    }
    if hangul {
        Some(Script::Korean)
    } else if han {
        Some(Script::Chinese)
    } else if latin {
        Some(Script::Latin)
    } else {
        None
    }
}

/// The script a single Tesseract model name recognizes, if we know it.
fn script_for_model_part(part: &str) -> Option<Script> {
    let base = part.strip_suffix("_vert").unwrap_or(part);
    match base {
        "jpn" => Some(Script::Japanese),
        "kor" => Some(Script::Korean),
        "chi_sim" | "chi_tra" => Some(Script::Chinese),
        "eng" | "fra" | "deu" | "spa" | "ita" | "por" | "nld" | "Latin" => Some(Script::Latin),
        _ => None,
    }
}

/// Does this model (possibly combined, like `jpn+eng`) handle `script`?
pub fn model_handles_script(model: &str, script: Script) -> bool {
    model
        .split('+')
        .any(|part| script_for_model_part(part) == Some(script))
}
