use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::schema::Collection;

pub const DEFAULT_API_URL: &str = "https://meta.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wrctool/0.2";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_MESSAGE_GROUP: &str = "page-Template:I18n/Wikimedia_Resource_Center";
pub const DEFAULT_TRANSLATION_PAGE: &str = "Template:I18n/Wikimedia_Resource_Center";
pub const DEFAULT_TRANSLATION_SECTION: u32 = 4;
const DEFAULT_RESOURCE_PURGE: &str = "Wikimedia Resource Center";
const DEFAULT_CONNECT_PURGE: &str = "Connect";
const DEFAULT_GROUP_PAGE_PREFIX: &str = "Connect/";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WrcConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub messages: MessagesSection,
    #[serde(default)]
    pub collections: CollectionsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MessagesSection {
    pub group: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionsSection {
    pub resources: Option<CollectionSection>,
    pub groups: Option<CollectionSection>,
    pub individuals: Option<CollectionSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionSection {
    pub module: Option<String>,
    pub purge: Option<Vec<String>>,
    pub translation_page: Option<String>,
    pub translation_section: Option<u32>,
    pub page_prefix: Option<String>,
}

/// Wiki connection settings after env and config resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSettings {
    pub api_url: String,
    pub user_agent: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTarget {
    pub page: String,
    pub section: u32,
}

/// Where a collection lives on the wiki and what to touch after saving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSettings {
    pub collection: Collection,
    pub module: String,
    pub purge: Vec<String>,
    /// Resources only.
    pub translation: Option<TranslationTarget>,
    /// Title prefix of per-entry pages. Individuals fall back to the
    /// `user-page` message when unset.
    pub page_prefix: Option<String>,
}

impl WrcConfig {
    /// Resolve wiki settings: env > config > defaults.
    pub fn wiki_settings(&self) -> WikiSettings {
        self.wiki_settings_with_lookup(&|key| env::var(key).ok())
    }

    pub fn wiki_settings_with_lookup(
        &self,
        lookup_env: &dyn Fn(&str) -> Option<String>,
    ) -> WikiSettings {
        let pick = |key: &str, configured: &Option<String>, default: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| non_empty(configured))
                .unwrap_or_else(|| default.to_string())
        };
        WikiSettings {
            api_url: pick("WIKI_API_URL", &self.wiki.api_url, DEFAULT_API_URL),
            user_agent: pick("WIKI_USER_AGENT", &self.wiki.user_agent, DEFAULT_USER_AGENT),
            language: pick("WIKI_LANGUAGE", &self.wiki.language, DEFAULT_LANGUAGE),
        }
    }

    pub fn message_group(&self) -> String {
        non_empty(&self.messages.group).unwrap_or_else(|| DEFAULT_MESSAGE_GROUP.to_string())
    }

    pub fn collection(&self, collection: Collection) -> CollectionSettings {
        let section = match collection {
            Collection::Resources => self.collections.resources.as_ref(),
            Collection::Groups => self.collections.groups.as_ref(),
            Collection::Individuals => self.collections.individuals.as_ref(),
        };
        let section = section.cloned().unwrap_or_default();

        let module = non_empty(&section.module)
            .unwrap_or_else(|| collection.schema().default_module.to_string());
        let purge = section.purge.clone().unwrap_or_else(|| {
            let default = match collection {
                Collection::Resources => DEFAULT_RESOURCE_PURGE,
                Collection::Groups | Collection::Individuals => DEFAULT_CONNECT_PURGE,
            };
            vec![default.to_string()]
        });
        let translation = match collection {
            Collection::Resources => Some(TranslationTarget {
                page: non_empty(&section.translation_page)
                    .unwrap_or_else(|| DEFAULT_TRANSLATION_PAGE.to_string()),
                section: section
                    .translation_section
                    .unwrap_or(DEFAULT_TRANSLATION_SECTION),
            }),
            Collection::Groups | Collection::Individuals => None,
        };
        let page_prefix = non_empty(&section.page_prefix).or_else(|| match collection {
            Collection::Groups => Some(DEFAULT_GROUP_PAGE_PREFIX.to_string()),
            Collection::Resources | Collection::Individuals => None,
        });

        CollectionSettings {
            collection,
            module,
            purge,
            translation,
            page_prefix,
        }
    }
}

/// Load and parse a WrcConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WrcConfig> {
    if !config_path.exists() {
        return Ok(WrcConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WrcConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Commented template written by `init`.
pub fn config_template() -> String {
    format!(
        r#"# wrctool configuration. Environment variables WIKI_API_URL,
# WIKI_USER_AGENT and WIKI_LANGUAGE take precedence over [wiki].

[wiki]
api_url = "{DEFAULT_API_URL}"
user_agent = "{DEFAULT_USER_AGENT}"
language = "{DEFAULT_LANGUAGE}"

[messages]
group = "{DEFAULT_MESSAGE_GROUP}"

[collections.resources]
module = "{resources}"
purge = ["{DEFAULT_RESOURCE_PURGE}"]
translation_page = "{DEFAULT_TRANSLATION_PAGE}"
translation_section = {DEFAULT_TRANSLATION_SECTION}

[collections.groups]
module = "{groups}"
purge = ["{DEFAULT_CONNECT_PURGE}"]
page_prefix = "{DEFAULT_GROUP_PAGE_PREFIX}"

[collections.individuals]
module = "{individuals}"
purge = ["{DEFAULT_CONNECT_PURGE}"]
# page_prefix defaults to the "user-page" message ("User:").
"#,
        resources = Collection::Resources.schema().default_module,
        groups = Collection::Groups.schema().default_module,
        individuals = Collection::Individuals.schema().default_module,
    )
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
