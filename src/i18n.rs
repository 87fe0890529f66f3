//! Localized user-facing texts.
//!
//! The table is loaded once at startup and shared read-only. Lookups never
//! fail: a missing language falls back to the default language, and a key
//! missing there too is echoed back as-is.

use std::collections::HashMap;
use std::path::Path;

use crate::error::ConfigError;

/// Language used when the requested one has no entry for a key.
pub const DEFAULT_LANGUAGE: &str = "en";

const EMBEDDED_TRANSLATIONS: &str = include_str!("../translations.json");

/// Read-only `(language, key) -> text` table.
#[derive(Debug, Clone, Default)]
pub struct Translations {
    table: HashMap<String, HashMap<String, String>>,
}

impl Translations {
    /// Parse a `{"lang": {"key": "text"}}` JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let table = serde_json::from_str(raw)
            .map_err(|e| ConfigError::ParseError(format!("translations: {}", e)))?;
        Ok(Self { table })
    }

    /// Load translations from a JSON file.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    /// The table shipped with the binary.
    pub fn embedded() -> Self {
        // The embedded file is part of the build; a parse failure means a broken release.
        Self::from_json(EMBEDDED_TRANSLATIONS).unwrap_or_else(|e| {
            tracing::error!("Embedded translations are invalid: {}", e);
            Self::default()
        })
    }

    /// Look up `key` for `language`, falling back to the default language, then to the key.
    pub fn localized_text<'a>(&'a self, key: &'a str, language: &str) -> &'a str {
        if let Some(text) = self.table.get(language).and_then(|t| t.get(key)) {
            return text;
        }
        tracing::warn!(
            language = %language,
            key = %key,
            "No translation available, falling back to default language"
        );
        match self.table.get(DEFAULT_LANGUAGE).and_then(|t| t.get(key)) {
            Some(text) => text,
            None => {
                tracing::warn!(key = %key, "No default translation found, echoing key");
                key
            }
        }
    }

    /// Languages present in the table.
    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.table.keys().map(String::as_str).collect();
        langs.sort_unstable();
        langs
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn sample() -> Translations {
        Translations::from_json(
            r#"{
                "en": {"greeting": "Hello", "farewell": "Bye"},
                "id": {"greeting": "Halo"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn exact_match() {
        assert_eq!(sample().localized_text("greeting", "id"), "Halo");
    }

    #[test]
    fn missing_key_falls_back_to_default_language() {
        assert_eq!(sample().localized_text("farewell", "id"), "Bye");
    }

    #[test]
    fn missing_language_falls_back_to_default_language() {
        assert_eq!(sample().localized_text("greeting", "fr"), "Hello");
    }

    #[test]
    fn missing_everywhere_echoes_key() {
        assert_eq!(sample().localized_text("unknown_key", "id"), "unknown_key");
    }

    #[test]
    fn embedded_table_has_default_language() {
        let translations = Translations::embedded();
        assert!(translations.languages().contains(&DEFAULT_LANGUAGE));
        assert_ne!(translations.localized_text("timeout", "en"), "timeout");
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            Translations::from_json("not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"en": {{"k": "v"}}}}"#).unwrap();
        let translations = Translations::load(file.path()).await.unwrap();
        assert_eq!(translations.localized_text("k", "en"), "v");
    }
}
