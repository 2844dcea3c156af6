//! Built-in language detectors with enum dispatch.
//!
//! The cache accepts any `LanguageDetector`; these two cover the common
//! case without an external model.

use enum_dispatch::enum_dispatch;
use isolang::Language;
use whatlang::Lang;

/// Best guess for a piece of text. `language` is an ISO 639-1 code.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub language: String,
    pub confidence: f64,
}

/// Reentrant detection capability. `None` means the detector could not
/// name any supported language.
#[enum_dispatch]
pub trait LanguageDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, text: &str) -> Option<Detection>;
}

#[enum_dispatch(LanguageDetector)]
pub enum BuiltinDetector {
    Whatlang(WhatlangDetector),
    Script(ScriptDetector),
}

fn to_whatlang(code: &str) -> Option<Lang> {
    match code {
        // whatlang uses Cmn for Mandarin
        "zh" => Some(Lang::Cmn),
        _ => Language::from_639_1(code).and_then(|lang| Lang::from_code(lang.to_639_3())),
    }
}

fn from_whatlang(lang: Lang) -> Option<String> {
    match lang {
        Lang::Cmn => Some("zh".to_string()),
        _ => Language::from_639_3(lang.code())
            .and_then(|lang| lang.to_639_1())
            .map(str::to_string),
    }
}

/// Trigram detection restricted to the supported languages.
pub struct WhatlangDetector {
    detector: whatlang::Detector,
}

impl WhatlangDetector {
    pub fn new(supported: &[String]) -> Self {
        let allowlist: Vec<Lang> = supported.iter().filter_map(|c| to_whatlang(c)).collect();
        tracing::info!("[Detection] Initializing Whatlang detector with {} languages", allowlist.len());
        let detector = if allowlist.is_empty() {
            whatlang::Detector::new()
        } else {
            whatlang::Detector::with_allowlist(allowlist)
        };
        Self { detector }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn name(&self) -> &'static str {
        "whatlang"
    }

    fn detect(&self, text: &str) -> Option<Detection> {
        let info = self.detector.detect(text)?;
        let language = from_whatlang(info.lang())?;
        Some(Detection {
            language,
            confidence: info.confidence(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Hangul,
    Kana,
    Han,
    Cyrillic,
    Arabic,
}

fn script_of(c: char) -> Option<Script> {
    match c {
        '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}' => Some(Script::Hangul),
        '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' => Some(Script::Kana),
        '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' => Some(Script::Han),
        '\u{0400}'..='\u{04FF}' => Some(Script::Cyrillic),
        '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' => Some(Script::Arabic),
        _ => None,
    }
}

/// Unicode-block heuristic. Only answers for scripts that pin down a
/// language; Latin text is left to the trigram detector.
pub struct ScriptDetector {
    supported: Vec<String>,
}

impl ScriptDetector {
    pub fn new(supported: &[String]) -> Self {
        Self {
            supported: supported.to_vec(),
        }
    }
}

impl LanguageDetector for ScriptDetector {
    fn name(&self) -> &'static str {
        "script"
    }

    fn detect(&self, text: &str) -> Option<Detection> {
        let (mut hangul, mut kana, mut han, mut cyrillic, mut arabic, mut letters) = (0, 0, 0, 0, 0, 0);
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            letters += 1;
            match script_of(c) {
                Some(Script::Hangul) => hangul += 1,
                Some(Script::Kana) => kana += 1,
                Some(Script::Han) => han += 1,
                Some(Script::Cyrillic) => cyrillic += 1,
                Some(Script::Arabic) => arabic += 1,
                None => {}
            }
        }
        if letters == 0 {
            return None;
        }

        // Kana marks Japanese even when most characters are kanji
        let (code, count) = if kana > 0 {
            ("ja", kana + han)
        } else {
            [("ko", hangul), ("zh", han), ("ru", cyrillic), ("ar", arabic)]
                .into_iter()
                .max_by_key(|(_, n)| *n)?
        };
        if count == 0 || !self.supported.iter().any(|c| c == code) {
            return None;
        }

        Some(Detection {
            language: code.to_string(),
            confidence: count as f64 / letters as f64,
        })
    }
}
