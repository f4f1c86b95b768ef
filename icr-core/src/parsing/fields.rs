//! Structured field derivation from a tokenized label.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::tokenizer::ParsedLabel;

static GRADE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(GEM\s+MT|GEM\s+MINT|MINT|NM-MT\+?|NM\+?|EX-MT\+?|EX\+?|VG-EX\+?|VG\+?|GOOD\+?|FR|PR)\s+(10|[1-9](?:\.5)?)\b",
    )
    .expect("grade regex is valid")
});
static AUTHENTIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAUTHENTIC\b").expect("authentic regex is valid"));
static HASH_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\s*([A-Z]{0,5}\d{1,3}[A-Z]?)\b").expect("hash number regex is valid")
});
static FRACTION_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3})/\d{1,3}\b").expect("fraction number regex is valid")
});
static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,3})\b").expect("bare number regex is valid"));
static GRADE_DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:GEM\s+MT|GEM\s+MINT|NM-MT\+?|EX-MT\+?|VG-EX\+?|MINT\b)")
        .expect("grade descriptor regex is valid")
});
static TOKEN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]+").expect("token split regex is valid"));

/// Modifier patterns, longest first so `REV.HOLO` is not also read as `HOLO`.
static MODIFIERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\b1ST\s*ED(?:ITION|\.)?", "1ST EDITION"),
        (r"\bSHADOWLESS\b", "SHADOWLESS"),
        (r"\bREV(?:ERSE)?\.?\s*(?:HOLO|FOIL)\b", "REVERSE HOLO"),
        (r"\bNON[-\s]?HOLO\b", "NON-HOLO"),
        (r"\bFULL\s+ART\b|\bFA/", "FULL ART"),
        (r"\bALT(?:ERNATE)?\.?\s+ART\b", "ALT ART"),
        (r"\bSECRET\b", "SECRET"),
        (r"\bPROMO\b", "PROMO"),
        (r"\bSTAFF\b", "STAFF"),
        (r"\bPRE-?RELEASE\b", "PRERELEASE"),
        (r"\bHOLO\b", "HOLO"),
    ]
    .into_iter()
    .map(|(pattern, canonical)| {
        (
            Regex::new(pattern).expect("modifier regex is valid"),
            canonical,
        )
    })
    .collect()
});

/// Words that never contribute to names or set names.
const STOP_WORDS: &[&str] = &["POKEMON", "P.M.", "P.M", "PM", "PSA", "CERT"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Japanese,
    Korean,
    Chinese,
    French,
    German,
    Italian,
    Spanish,
    Portuguese,
}

impl Language {
    const LABELED: [(Language, &'static str); 8] = [
        (Language::Japanese, "JAPANESE"),
        (Language::Korean, "KOREAN"),
        (Language::Chinese, "CHINESE"),
        (Language::French, "FRENCH"),
        (Language::German, "GERMAN"),
        (Language::Italian, "ITALIAN"),
        (Language::Spanish, "SPANISH"),
        (Language::Portuguese, "PORTUGUESE"),
    ];

    /// Non-English labels name their language; English is the default.
    fn detect(tokens: &BTreeSet<String>) -> Self {
        Self::LABELED
            .iter()
            .find(|(_, word)| tokens.contains(*word))
            .map_or(Language::English, |(lang, _)| *lang)
    }

    fn is_language_word(word: &str) -> bool {
        Self::LABELED.iter().any(|(_, w)| *w == word)
    }
}

/// Fields the matcher and reviewers work from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub cert_number: Option<String>,
    /// Numeric grade (`"10"`, `"8.5"`).
    pub grade: Option<String>,
    /// Grade descriptor (`"GEM MT"`, `"NM-MT"`, `"AUTHENTIC"`).
    pub grade_label: Option<String>,
    pub year: Option<u16>,
    pub card_name: Option<String>,
    pub set_name: Option<String>,
    pub language: Language,
    /// Normalized candidate card numbers, most explicit first.
    pub card_numbers: Vec<String>,
    pub name_tokens: Vec<String>,
    pub modifiers: Vec<String>,
    pub header: Option<String>,
    pub dynamic_fields: Vec<String>,
}

impl ExtractedFields {
    pub fn from_parsed(parsed: &ParsedLabel) -> Self {
        let header = parsed.header.as_deref().unwrap_or_default().to_uppercase();
        let body = parsed.dynamic_fields.join("\n").to_uppercase();
        let combined = format!("{header}\n{body}");

        let (grade, grade_label) = find_grade(&combined);
        let language = Language::detect(&tokenize(&combined));

        let mut header_rest = GRADE.replace_all(&header, " ").into_owned();
        let mut body_rest = GRADE.replace_all(&body, " ").into_owned();
        body_rest = AUTHENTIC.replace_all(&body_rest, " ").into_owned();
        body_rest = GRADE_DESCRIPTOR.replace_all(&body_rest, " ").into_owned();

        let mut modifiers = take_modifiers(&mut header_rest);
        for modifier in take_modifiers(&mut body_rest) {
            if !modifiers.contains(&modifier) {
                modifiers.push(modifier);
            }
        }

        let mut card_numbers = Vec::new();
        for text in [&mut header_rest, &mut body_rest] {
            collect_numbers(&HASH_NUMBER, text, &mut card_numbers);
        }
        for text in [&mut header_rest, &mut body_rest] {
            collect_numbers(&FRACTION_NUMBER, text, &mut card_numbers);
        }
        collect_numbers(&BARE_NUMBER, &mut body_rest, &mut card_numbers);

        let set_name = meaningful_words(&header_rest).join(" ");

        let mut name_tokens: Vec<String> = Vec::new();
        for word in meaningful_words(&body_rest) {
            if word.chars().any(|c| c.is_ascii_alphabetic())
                && word.len() >= 2
                && !name_tokens.contains(&word)
            {
                name_tokens.push(word);
            }
        }

        Self {
            cert_number: parsed.cert_number.clone(),
            grade,
            grade_label,
            year: parsed.year,
            card_name: (!name_tokens.is_empty()).then(|| name_tokens.join(" ")),
            set_name: (!set_name.is_empty()).then_some(set_name),
            language,
            card_numbers,
            name_tokens,
            modifiers,
            header: parsed.header.clone(),
            dynamic_fields: parsed.dynamic_fields.clone(),
        }
    }

    /// Every alphanumeric token on the label (header and dynamic fields).
    pub fn label_tokens(&self) -> BTreeSet<String> {
        let mut text = self.header.clone().unwrap_or_default();
        for field in &self.dynamic_fields {
            text.push(' ');
            text.push_str(field);
        }
        tokenize(&text)
    }
}

/// Uppercase alphanumeric tokens of `text`.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    TOKEN_SPLIT
        .split(&text.to_uppercase())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Canonical card number: uppercase, `#` and leading zeros stripped.
pub fn normalize_card_number(raw: &str) -> String {
    let upper = raw.trim().trim_start_matches('#').trim().to_uppercase();
    let prefix_len = upper
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (prefix, rest) = upper.split_at(prefix_len);
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, suffix) = rest.split_at(digits_end);
    let digits = digits.trim_start_matches('0');
    let digits = if digits.is_empty() && digits_end > 0 {
        "0"
    } else {
        digits
    };
    format!("{prefix}{digits}{suffix}")
}

fn find_grade(text: &str) -> (Option<String>, Option<String>) {
    if let Some(caps) = GRADE.captures(text) {
        let label = caps
            .get(1)
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "));
        return (caps.get(2).map(|m| m.as_str().to_string()), label);
    }
    if AUTHENTIC.is_match(text) {
        return (None, Some("AUTHENTIC".to_string()));
    }
    (None, None)
}

fn take_modifiers(text: &mut String) -> Vec<String> {
    let mut found = Vec::new();
    for (pattern, canonical) in MODIFIERS.iter() {
        if pattern.is_match(text) {
            found.push((*canonical).to_string());
            *text = pattern.replace_all(text, " ").into_owned();
        }
    }
    found
}

fn collect_numbers(pattern: &Regex, text: &mut String, out: &mut Vec<String>) {
    for caps in pattern.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let number = normalize_card_number(m.as_str());
            if !out.contains(&number) {
                out.push(number);
            }
        }
    }
    *text = pattern.replace_all(text, " ").into_owned();
}

fn meaningful_words(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '-' || c == '/' || c == ',')
        .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '\''))
        .filter(|w| !w.is_empty())
        .filter(|w| !STOP_WORDS.contains(w) && !Language::is_language_word(w))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::PsaLabelParser;

    fn fields(lines: &[&str]) -> ExtractedFields {
        let parsed = PsaLabelParser::with_year_range(1995, 2030).parse_lines(lines);
        ExtractedFields::from_parsed(&parsed)
    }

    #[test]
    fn test_vintage_holo_label() {
        let f = fields(&[
            "1999 POKEMON GAME #4",
            "CHARIZARD-HOLO 1ST EDITION",
            "NM-MT 8",
            "12345678",
        ]);

        assert_eq!(f.year, Some(1999));
        assert_eq!(f.cert_number.as_deref(), Some("12345678"));
        assert_eq!(f.grade.as_deref(), Some("8"));
        assert_eq!(f.grade_label.as_deref(), Some("NM-MT"));
        assert_eq!(f.set_name.as_deref(), Some("GAME"));
        assert_eq!(f.card_numbers, vec!["4"]);
        assert_eq!(f.modifiers, vec!["1ST EDITION", "HOLO"]);
        assert_eq!(f.card_name.as_deref(), Some("CHARIZARD"));
    }

    #[test]
    fn test_stray_grade_descriptor_not_a_name() {
        let f = fields(&["1999 POKEMON GAME", "BLASTOISE NM-MT", "12345678"]);
        assert_eq!(f.name_tokens, vec!["BLASTOISE"]);
    }

    #[test]
    fn test_grade_phrase() {
        let f = fields(&[
            "2016 POKEMON XY EVOLUTIONS #11",
            "CHARIZARD-HOLO",
            "GEM MT 10",
            "87654321",
        ]);
        assert_eq!(f.grade.as_deref(), Some("10"));
        assert_eq!(f.grade_label.as_deref(), Some("GEM MT"));
        assert_eq!(f.name_tokens, vec!["CHARIZARD"]);
        assert_eq!(f.set_name.as_deref(), Some("XY EVOLUTIONS"));
        assert_eq!(f.card_numbers, vec!["11"]);
    }

    #[test]
    fn test_half_grade_and_language() {
        let f = fields(&[
            "1996 POKEMON JAPANESE BASE #6",
            "GENGAR-HOLO NM-MT+ 8.5",
            "11223344",
        ]);
        assert_eq!(f.language, Language::Japanese);
        assert_eq!(f.grade.as_deref(), Some("8.5"));
        assert_eq!(f.grade_label.as_deref(), Some("NM-MT+"));
        assert_eq!(f.set_name.as_deref(), Some("BASE"));
        assert_eq!(f.name_tokens, vec!["GENGAR"]);
    }

    #[test]
    fn test_reverse_holo_not_double_counted() {
        let f = fields(&["2021 POKEMON SWSH", "PIKACHU REV.HOLO", "MINT 9", "55555555"]);
        assert_eq!(f.modifiers, vec!["REVERSE HOLO"]);
    }

    #[test]
    fn test_fraction_number() {
        let f = fields(&["2000 POKEMON ROCKET", "DARK CHARIZARD 4/82", "MINT 9", "55555556"]);
        assert_eq!(f.card_numbers, vec!["4"]);
        assert_eq!(f.name_tokens, vec!["DARK", "CHARIZARD"]);
    }

    #[test]
    fn test_english_default() {
        let f = fields(&["2002", "PIKACHU", "12345678"]);
        assert_eq!(f.language, Language::English);
        assert_eq!(f.grade, None);
        assert_eq!(f.set_name, None);
    }

    #[test]
    fn test_normalize_card_number() {
        assert_eq!(normalize_card_number("#004"), "4");
        assert_eq!(normalize_card_number("sv049"), "SV49");
        assert_eq!(normalize_card_number("0"), "0");
        assert_eq!(normalize_card_number("TG05a"), "TG5A");
    }

    #[test]
    fn test_label_tokens() {
        let f = fields(&["2002 POKEMON EXPEDITION", "MR. MIME", "12345678"]);
        let tokens = f.label_tokens();
        assert!(tokens.contains("MR"));
        assert!(tokens.contains("MIME"));
        assert!(tokens.contains("EXPEDITION"));
    }
}
