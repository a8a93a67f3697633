//! Request model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output language preference for rationale and explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Auto,
    Zh,
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Auto => "auto",
            Locale::Zh => "zh",
            Locale::En => "en",
        }
    }

    /// Resolve `Auto` against the request text: any CJK ideograph means `Zh`.
    pub fn resolve(self, text: &str) -> Locale {
        match self {
            Locale::Auto => {
                if text.chars().any(is_cjk) {
                    Locale::Zh
                } else {
                    Locale::En
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Locale::Auto),
            "zh" | "cn" | "zh-cn" => Ok(Locale::Zh),
            "en" => Ok(Locale::En),
            other => Err(format!("unknown locale '{}' (expected auto, zh or en)", other)),
        }
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

/// A single user request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub text: String,
    pub locale: Locale,
    pub debug: bool,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            text: text.into().trim().to_string(),
            locale: Locale::Auto,
            debug: false,
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Fixed id, for reproducible tests and replays.
    pub fn with_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Locale with `Auto` resolved against the text.
    pub fn effective_locale(&self) -> Locale {
        self.locale.resolve(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_auto_detects_chinese() {
        assert_eq!(Locale::Auto.resolve("查看磁盘空间"), Locale::Zh);
        assert_eq!(Locale::Auto.resolve("show disk space"), Locale::En);
        assert_eq!(Locale::En.resolve("查看磁盘空间"), Locale::En);
    }

    #[test]
    fn test_locale_parse() {
        assert_eq!("ZH".parse::<Locale>(), Ok(Locale::Zh));
        assert_eq!("auto".parse::<Locale>(), Ok(Locale::Auto));
        assert!("fr".parse::<Locale>().is_err());
    }

    #[test]
    fn test_request_builder() {
        let req = Request::new("  list files  ").with_debug(true).with_id("r-1");
        assert_eq!(req.text, "list files");
        assert!(req.debug);
        assert_eq!(req.request_id, "r-1");
        assert_eq!(req.effective_locale(), Locale::En);
    }
}
