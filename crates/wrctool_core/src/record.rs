use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::lua_table::{FieldKey, LuaTable, LuaValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::List(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::List(items) => items.is_empty(),
        }
    }

    /// Human-readable form used by reports and edit summaries.
    pub fn display(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

/// One entry of a collection, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: FieldValue) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Build a record from one raw entry table of a data module.
    pub fn from_lua_table(table: &LuaTable) -> Result<Self> {
        let mut record = Self::new();
        for field in &table.fields {
            let key = match field.key.as_ref().and_then(FieldKey::as_str) {
                Some(key) => key,
                None => bail!(
                    "entry contains a positional or non-string key ({} value)",
                    field.value.type_name()
                ),
            };
            match &field.value {
                LuaValue::Nil => {}
                LuaValue::Table(list) => {
                    let mut items = Vec::new();
                    for item in &list.fields {
                        if item.key.is_some() {
                            bail!("field `{key}` must be a plain list of strings");
                        }
                        match item.value.scalar_text() {
                            Some(text) => items.push(text),
                            None => bail!(
                                "field `{key}` contains a nested {} value",
                                item.value.type_name()
                            ),
                        }
                    }
                    record.set(key, FieldValue::List(items));
                }
                scalar => {
                    if let Some(text) = scalar.scalar_text() {
                        record.set(key, FieldValue::Text(text));
                    }
                }
            }
        }
        Ok(record)
    }
}

/// Clean every positional entry of the table returned by a data module.
pub fn records_from_module(module: &LuaValue) -> Result<Vec<Record>> {
    let Some(root) = module.as_table() else {
        bail!(
            "data module must return a table, found {}",
            module.type_name()
        );
    };

    let mut records = Vec::new();
    for (index, entry) in root.positional().enumerate() {
        let Some(table) = entry.as_table() else {
            bail!(
                "entry #{} must be a table, found {}",
                index + 1,
                entry.type_name()
            );
        };
        let record = Record::from_lua_table(table)
            .map_err(|error| error.context(format!("invalid entry #{}", index + 1)))?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEdit {
    Set(FieldValue),
    Clear,
}

/// Field changes for a single entry, applied in key order.
///
/// Setting an empty value removes the key, the same as an emptied form field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryEdits {
    edits: BTreeMap<String, FieldEdit>,
}

impl EntryEdits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.edits
            .insert(key.into(), FieldEdit::Set(FieldValue::Text(value.into())));
        self
    }

    pub fn set_list<I, S>(&mut self, key: impl Into<String>, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.edits
            .insert(key.into(), FieldEdit::Set(FieldValue::List(items)));
        self
    }

    pub fn clear(&mut self, key: impl Into<String>) -> &mut Self {
        self.edits.insert(key.into(), FieldEdit::Clear);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldEdit> {
        self.edits.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldEdit)> {
        self.edits.iter().map(|(key, edit)| (key.as_str(), edit))
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn apply_to(&self, record: &mut Record) {
        for (key, edit) in &self.edits {
            match edit {
                FieldEdit::Set(value) if !value.is_empty() => record.set(key.clone(), value.clone()),
                FieldEdit::Set(_) | FieldEdit::Clear => {
                    record.remove(key);
                }
            }
        }
    }
}
