use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::debug;

use crate::api::{MessageEntry, WikiReadApi};
use crate::schema::{FieldSpec, option_message_key};

pub const MESSAGE_KEY_PREFIX: &str = "Template:I18n/Wikimedia_Resource_Center/";

// English texts for the messages workflows depend on.
const BUILTIN_MESSAGES: &[(&str, &str)] = &[
    ("editor-ang-preeditsummary", "Adding new group: "),
    ("add-new-individual", "Adding new individual: "),
    ("added-categories", "Added categories: "),
    ("added-category", "Added category: "),
    ("user-page", "User:"),
];

/// Interface messages for one language.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Messages {
    language: String,
    entries: BTreeMap<String, String>,
}

impl Messages {
    /// Only the built-in English texts.
    pub fn builtin() -> Self {
        Self {
            language: "en".to_string(),
            entries: BTreeMap::new(),
        }
    }

    /// Build from a message collection; a missing translation falls back to
    /// the source definition.
    pub fn from_entries(language: &str, entries: Vec<MessageEntry>) -> Self {
        let mut map = BTreeMap::new();
        for entry in entries {
            let key = entry
                .key
                .strip_prefix(MESSAGE_KEY_PREFIX)
                .unwrap_or(&entry.key)
                .to_string();
            let text = entry
                .translation
                .filter(|text| !text.is_empty())
                .or(entry.definition);
            if let Some(text) = text {
                map.insert(key, text);
            }
        }
        Self {
            language: language.to_string(),
            entries: map,
        }
    }

    pub fn load<A: WikiReadApi + ?Sized>(api: &mut A, group: &str, language: &str) -> Result<Self> {
        let entries = api
            .get_message_collection(group, language)
            .with_context(|| format!("failed to load messages of {group} ({language})"))?;
        debug!(group, language, count = entries.len(), "loaded interface messages");
        Ok(Self::from_entries(language, entries))
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str).or_else(|| {
            BUILTIN_MESSAGES
                .iter()
                .find(|(builtin, _)| *builtin == key)
                .map(|(_, text)| *text)
        })
    }

    /// Message text, or the key itself when unknown.
    pub fn text(&self, key: &str) -> String {
        self.get(key).unwrap_or(key).to_string()
    }

    /// Display label for one option value of a choice or list field.
    pub fn option_label(&self, field: &FieldSpec, value: &str) -> String {
        let Some(prefix) = field.label_prefix else {
            return value.to_string();
        };
        self.get(&option_message_key(prefix, value))
            .unwrap_or(value)
            .to_string()
    }

    /// Loaded messages merged over the built-in defaults, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut merged = BUILTIN_MESSAGES
            .iter()
            .map(|(key, text)| (*key, *text))
            .collect::<BTreeMap<_, _>>();
        for (key, text) in &self.entries {
            merged.insert(key.as_str(), text.as_str());
        }
        merged.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::Messages;
    use crate::api::MessageEntry;
    use crate::schema::Collection;

    fn entry(key: &str, definition: &str, translation: Option<&str>) -> MessageEntry {
        MessageEntry {
            key: format!("Template:I18n/Wikimedia_Resource_Center/{key}"),
            definition: Some(definition.to_string()),
            translation: translation.map(ToString::to_string),
        }
    }

    #[test]
    fn translations_win_over_definitions() {
        let messages = Messages::from_entries(
            "fr",
            vec![
                entry("user-page", "User:", Some("Utilisateur:")),
                entry("audience-for-developers", "For developers", None),
                entry("added-category", "Added category: ", Some("")),
            ],
        );
        assert_eq!(messages.language(), "fr");
        assert_eq!(messages.text("user-page"), "Utilisateur:");
        assert_eq!(messages.text("audience-for-developers"), "For developers");
        assert_eq!(messages.text("added-category"), "Added category: ");
    }

    #[test]
    fn builtin_defaults_cover_workflow_messages() {
        let messages = Messages::builtin();
        assert_eq!(messages.text("editor-ang-preeditsummary"), "Adding new group: ");
        assert_eq!(messages.text("add-new-individual"), "Adding new individual: ");
        assert_eq!(messages.text("no-such-message"), "no-such-message");
        assert_eq!(messages.iter().count(), 5);
    }

    #[test]
    fn option_labels_use_prefixed_keys() {
        let messages = Messages::from_entries(
            "en",
            vec![
                entry("audience-for-developers", "Developers", None),
                entry("survey-skills", "Surveys", None),
            ],
        );
        let resources = Collection::Resources.schema();
        let audiences = resources.field("audiences").expect("audiences");
        assert_eq!(messages.option_label(audiences, "For developers"), "Developers");
        assert_eq!(
            messages.option_label(audiences, "For contributors"),
            "For contributors"
        );

        let skills = Collection::Individuals
            .schema()
            .field("skills")
            .expect("skills");
        assert_eq!(messages.option_label(skills, "Survey skills"), "Surveys");

        let header = resources.field("header").expect("header");
        assert_eq!(messages.option_label(header, "Anything"), "Anything");
    }
}
