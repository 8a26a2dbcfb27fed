//! Optional translation of zoning labels into a target language.
//!
//! Regional services answer in Catalan, Spanish, German, or Portuguese;
//! translation is strictly best-effort and a failed lookup never fails
//! the resolution that produced the label.

use async_trait::async_trait;

#[async_trait]
pub trait LabelTranslator: Send + Sync {
    /// Translates `text` into `target_lang` (an ISO 639-1 code). Returns
    /// `None` when the backend is unavailable or has no answer; the caller
    /// keeps the original label in that case.
    async fn translate(&self, text: &str, target_lang: &str) -> Option<String>;
}

/// Translator that never answers. Used when translation is disabled.
pub struct NoopTranslator;

#[async_trait]
impl LabelTranslator for NoopTranslator {
    async fn translate(&self, _text: &str, _target_lang: &str) -> Option<String> {
        None
    }
}
