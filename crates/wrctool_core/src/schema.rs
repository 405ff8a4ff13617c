use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// The three editable collections of the Wikimedia Resource Center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Resources,
    Groups,
    Individuals,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Self::Resources, Self::Groups, Self::Individuals];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::Groups => "groups",
            Self::Individuals => "individuals",
        }
    }

    pub fn schema(self) -> &'static CollectionSchema {
        match self {
            Self::Resources => &RESOURCES,
            Self::Groups => &GROUPS,
            Self::Individuals => &INDIVIDUALS,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resources" | "resource" | "content" => Ok(Self::Resources),
            "groups" | "group" => Ok(Self::Groups),
            "individuals" | "individual" | "users" => Ok(Self::Individuals),
            other => bail!("unknown collection `{other}` (expected resources, groups or individuals)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Multiline,
    /// Single value from a fixed option list.
    Choice(&'static [&'static str]),
    /// Sequence of values from a fixed option list.
    List(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub translatable: bool,
    /// Message-key prefix for option labels, e.g. `audience-`.
    pub label_prefix: Option<&'static str>,
}

impl FieldSpec {
    const fn text(key: &'static str) -> Self {
        Self {
            key,
            kind: FieldKind::Text,
            required: false,
            translatable: false,
            label_prefix: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn translatable(mut self) -> Self {
        self.translatable = true;
        self
    }

    const fn multiline(mut self) -> Self {
        self.kind = FieldKind::Multiline;
        self
    }

    const fn choice(mut self, options: &'static [&'static str], prefix: &'static str) -> Self {
        self.kind = FieldKind::Choice(options);
        self.label_prefix = Some(prefix);
        self
    }

    const fn list(mut self, options: &'static [&'static str], prefix: &'static str) -> Self {
        self.kind = FieldKind::List(options);
        self.label_prefix = Some(prefix);
        self
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, FieldKind::List(_))
    }

    pub fn options(&self) -> Option<&'static [&'static str]> {
        match self.kind {
            FieldKind::Choice(options) | FieldKind::List(options) => Some(options),
            FieldKind::Text | FieldKind::Multiline => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Random token assigned when the entry is first saved.
    GeneratedId,
    /// User-supplied value; spaces are stored as underscores.
    UnderscoredName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryTemplates {
    /// Message key whose text prefixes the add summary, if any.
    pub add_message: Option<&'static str>,
    pub add: &'static str,
    pub edit: &'static str,
    pub remove: &'static str,
}

#[derive(Debug)]
pub struct CollectionSchema {
    pub collection: Collection,
    pub default_module: &'static str,
    pub key_field: &'static str,
    pub key_strategy: KeyStrategy,
    /// Field used to name the entry in summaries.
    pub display_field: &'static str,
    pub fields: &'static [FieldSpec],
    pub defaults: &'static [(&'static str, &'static str)],
    pub summaries: SummaryTemplates,
}

impl CollectionSchema {
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.key == key)
    }

    pub fn normalize_key(&self, value: &str) -> String {
        match self.key_strategy {
            KeyStrategy::GeneratedId => value.trim().to_string(),
            KeyStrategy::UnderscoredName => value.trim().replace(' ', "_"),
        }
    }

    pub fn translatable_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|field| field.translatable)
    }
}

pub const RESOURCE_CATEGORIES: &[&str] = &[
    "Contact and Questions",
    "Skills Development",
    "Grants Support",
    "Programs Support",
    "Software Basics",
    "Software Development",
    "Technical Infrastructure",
    "Global Reach Partnerships",
    "Legal",
    "Communications",
];

pub const RESOURCE_AUDIENCES: &[&str] = &[
    "For program coordinators",
    "For contributors",
    "For developers",
    "For affiliate organizers",
];

pub const INDIVIDUAL_SKILLS: &[&str] = &[
    "Program design skills",
    "Program evaluation skills",
    "Program planning skills",
    "Program management skills",
    "Storytelling skills",
    "Press relations experience",
    "Annual planning skills",
    "Survey skills",
    "Fundraising skills",
    "Financial skills",
    "Affiliate collaboration skills",
    "Event organization and planning skills",
    "Event program design skills",
    "Facilitation skills",
    "Online governance experience",
    "New affiliate proposal experience",
];

// Checkbox "run by the Wikimedia Foundation": stored as community = 'no'.
const COMMUNITY_FLAG: &[&str] = &["no"];

static RESOURCES: CollectionSchema = CollectionSchema {
    collection: Collection::Resources,
    default_module: "Module:Wikimedia Resource Center/Content",
    key_field: "unique_id",
    key_strategy: KeyStrategy::GeneratedId,
    display_field: "header",
    fields: &[
        FieldSpec::text("unique_id"),
        FieldSpec::text("header").required().translatable(),
        FieldSpec::text("description").multiline().translatable(),
        FieldSpec::text("contact").translatable(),
        FieldSpec::text("related").translatable(),
        FieldSpec::text("category").choice(RESOURCE_CATEGORIES, "category-"),
        FieldSpec::text("audiences").list(RESOURCE_AUDIENCES, "audience-"),
        FieldSpec::text("community").choice(COMMUNITY_FLAG, "community-"),
    ],
    defaults: &[],
    summaries: SummaryTemplates {
        add_message: None,
        add: "Adding entry ",
        edit: "Editing entry ",
        remove: "Removing entry ",
    },
};

static GROUPS: CollectionSchema = CollectionSchema {
    collection: Collection::Groups,
    default_module: "Module:Wikimedia Resource Center/Groups",
    key_field: "name",
    key_strategy: KeyStrategy::UnderscoredName,
    display_field: "name",
    fields: &[
        FieldSpec::text("type").required(),
        FieldSpec::text("name").required(),
        FieldSpec::text("description").multiline().required(),
        FieldSpec::text("icon"),
        FieldSpec::text("facebook"),
        FieldSpec::text("twitter"),
        FieldSpec::text("youtube"),
    ],
    defaults: &[("type", "group")],
    summaries: SummaryTemplates {
        add_message: Some("editor-ang-preeditsummary"),
        add: "Adding new group: ",
        edit: "Editing entry: ",
        remove: "Removing entry: ",
    },
};

static INDIVIDUALS: CollectionSchema = CollectionSchema {
    collection: Collection::Individuals,
    default_module: "Module:Wikimedia Resource Center/Individuals",
    key_field: "name",
    key_strategy: KeyStrategy::UnderscoredName,
    display_field: "name",
    fields: &[
        FieldSpec::text("type").required(),
        FieldSpec::text("name").required(),
        FieldSpec::text("description").multiline().required(),
        FieldSpec::text("icon"),
        FieldSpec::text("skills").list(INDIVIDUAL_SKILLS, ""),
    ],
    defaults: &[("type", "user")],
    summaries: SummaryTemplates {
        add_message: Some("add-new-individual"),
        add: "Adding new individual: ",
        edit: "Editing individual: ",
        remove: "Removing individual: ",
    },
};

/// Message key for an option label: lowercase, spaces become hyphens.
pub fn option_message_key(prefix: &str, value: &str) -> String {
    format!("{prefix}{}", value.to_lowercase().replace(' ', "-"))
}
