use tracing::{info, warn};
use wp_format::Language;

/// User-facing text in both supported languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedText {
    pub en: String,
    pub id: String,
}

impl LocalizedText {
    pub fn new(en: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            id: id.into(),
        }
    }

    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::En => &self.en,
            Language::Id => &self.id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: LocalizedText,
}

/// Toast-style side channel. Failures that reach the user go through here,
/// never through a panic or a modal state.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => warn!(en = %notice.text.en, id = %notice.text.id, "notice"),
            NoticeLevel::Success | NoticeLevel::Info => {
                info!(en = %notice.text.en, id = %notice.text.id, "notice")
            }
        }
    }
}
