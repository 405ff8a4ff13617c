use std::collections::HashSet;

use anyhow::{Result, bail};
use rand::Rng;
use serde::Serialize;

use crate::record::{EntryEdits, FieldEdit, FieldValue, Record};
use crate::schema::{CollectionSchema, FieldKind, KeyStrategy};

const UNIQUE_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const UNIQUE_ID_LENGTH: usize = 11;
const UNIQUE_ID_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryAction {
    Added,
    Edited,
    Removed,
}

impl EntryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Edited => "edited",
            Self::Removed => "removed",
        }
    }
}

/// Source of unique ids for newly added entries.
pub trait IdSource {
    fn next_id(&mut self) -> String;
}

/// Base-36 tokens from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&mut self) -> String {
        let mut rng = rand::thread_rng();
        (0..UNIQUE_ID_LENGTH)
            .map(|_| char::from(UNIQUE_ID_ALPHABET[rng.gen_range(0..UNIQUE_ID_ALPHABET.len())]))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub records: Vec<Record>,
    pub action: EntryAction,
    /// Stored key of the affected entry.
    pub key: String,
    /// Position of the affected entry (in the old list for removals).
    pub index: usize,
    /// The entry as written, or as it was before removal.
    pub entry: Record,
}

/// Apply one add, edit or removal to `records`.
///
/// `target` names the entry to change; `None` adds a new entry. At most one
/// record is touched: when several share the target key, only the first
/// matches.
pub fn reconcile(
    schema: &CollectionSchema,
    mut records: Vec<Record>,
    target: Option<&str>,
    edits: &EntryEdits,
    delete: bool,
    ids: &mut dyn IdSource,
) -> Result<Reconciliation> {
    if !delete {
        validate_edits(schema, edits)?;
    }

    let Some(target) = target else {
        if delete {
            bail!(
                "removing a {} entry requires its `{}`",
                schema.collection,
                schema.key_field
            );
        }
        let entry = build_new_entry(schema, &records, edits, ids)?;
        let key = stored_key(schema, &entry)?;
        let index = records.len();
        records.push(entry.clone());
        return Ok(Reconciliation {
            records,
            action: EntryAction::Added,
            key,
            index,
            entry,
        });
    };

    let index = find_entry_index(schema, &records, target).ok_or_else(|| {
        anyhow::anyhow!(
            "no {} entry with {} `{}`",
            schema.collection,
            schema.key_field,
            target.trim()
        )
    })?;

    if delete {
        let entry = records.remove(index);
        let key = stored_key(schema, &entry)?;
        return Ok(Reconciliation {
            records,
            action: EntryAction::Removed,
            key,
            index,
            entry,
        });
    }

    let mut entry = records[index].clone();
    edits.apply_to(&mut entry);
    apply_defaults(schema, &mut entry);
    normalize_key_field(schema, &mut entry);
    check_required(schema, &entry)?;
    let key = stored_key(schema, &entry)?;
    let collides = find_entry_index(schema, &records, &key).is_some_and(|other| other != index);
    if collides {
        bail!(
            "another {} entry already uses {} `{key}`",
            schema.collection,
            schema.key_field
        );
    }
    records[index] = entry.clone();

    Ok(Reconciliation {
        records,
        action: EntryAction::Edited,
        key,
        index,
        entry,
    })
}

/// Position of the first entry whose key matches `target` after normalization.
pub fn find_entry_index(
    schema: &CollectionSchema,
    records: &[Record],
    target: &str,
) -> Option<usize> {
    let wanted = schema.normalize_key(target);
    if wanted.is_empty() {
        return None;
    }
    records.iter().position(|record| {
        record
            .text(schema.key_field)
            .map(|value| schema.normalize_key(value) == wanted)
            .unwrap_or(false)
    })
}

/// Reject edits to unknown fields and values outside a field's options.
pub fn validate_edits(schema: &CollectionSchema, edits: &EntryEdits) -> Result<()> {
    for (key, edit) in edits.iter() {
        let Some(field) = schema.field(key) else {
            let known = schema
                .fields
                .iter()
                .map(|field| field.key)
                .collect::<Vec<_>>()
                .join(", ");
            bail!(
                "unknown {} field `{key}` (expected one of: {known})",
                schema.collection
            );
        };
        if key == schema.key_field && schema.key_strategy == KeyStrategy::GeneratedId {
            bail!("`{key}` is assigned automatically and cannot be edited");
        }
        let FieldEdit::Set(value) = edit else {
            continue;
        };
        match (field.kind, value) {
            (FieldKind::Text | FieldKind::Multiline, FieldValue::Text(_)) => {}
            (FieldKind::Choice(options), FieldValue::Text(text)) => {
                if !text.is_empty() && !options.contains(&text.as_str()) {
                    bail!(
                        "`{text}` is not a valid {key} (expected one of: {})",
                        options.join(", ")
                    );
                }
            }
            (FieldKind::List(options), FieldValue::List(items)) => {
                for item in items {
                    if !options.contains(&item.as_str()) {
                        bail!(
                            "`{item}` is not a valid {key} value (expected any of: {})",
                            options.join(", ")
                        );
                    }
                }
            }
            (FieldKind::List(_), FieldValue::Text(_)) => bail!("field `{key}` expects a list"),
            (_, FieldValue::List(_)) => bail!("field `{key}` expects a single value"),
        }
    }
    Ok(())
}

fn build_new_entry(
    schema: &CollectionSchema,
    records: &[Record],
    edits: &EntryEdits,
    ids: &mut dyn IdSource,
) -> Result<Record> {
    let mut entry = Record::new();
    apply_defaults(schema, &mut entry);

    if schema.key_strategy == KeyStrategy::GeneratedId {
        let taken = records
            .iter()
            .filter_map(|record| record.text(schema.key_field))
            .collect::<HashSet<_>>();
        let id = (0..UNIQUE_ID_ATTEMPTS)
            .map(|_| ids.next_id())
            .find(|candidate| !candidate.is_empty() && !taken.contains(candidate.as_str()))
            .ok_or_else(|| anyhow::anyhow!("failed to generate an unused unique id"))?;
        entry.set(schema.key_field, FieldValue::Text(id));
    }

    edits.apply_to(&mut entry);
    normalize_key_field(schema, &mut entry);
    check_required(schema, &entry)?;

    let key = stored_key(schema, &entry)?;
    if find_entry_index(schema, records, &key).is_some() {
        bail!(
            "a {} entry with {} `{key}` already exists",
            schema.collection,
            schema.key_field
        );
    }
    Ok(entry)
}

fn apply_defaults(schema: &CollectionSchema, entry: &mut Record) {
    for (key, value) in schema.defaults {
        if !entry.contains(key) {
            entry.set(*key, FieldValue::Text((*value).to_string()));
        }
    }
}

fn normalize_key_field(schema: &CollectionSchema, entry: &mut Record) {
    if let Some(value) = entry.text(schema.key_field) {
        let normalized = schema.normalize_key(value);
        entry.set(schema.key_field, FieldValue::Text(normalized));
    }
}

fn check_required(schema: &CollectionSchema, entry: &Record) -> Result<()> {
    let missing = schema
        .fields
        .iter()
        .filter(|field| field.required)
        .filter(|field| entry.get(field.key).is_none_or(FieldValue::is_empty))
        .map(|field| field.key)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "{} entry is missing required field(s): {}",
            schema.collection,
            missing.join(", ")
        );
    }
    Ok(())
}

fn stored_key(schema: &CollectionSchema, entry: &Record) -> Result<String> {
    entry
        .text(schema.key_field)
        .filter(|value| !value.trim().is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "{} entry has no `{}` value",
                schema.collection,
                schema.key_field
            )
        })
}
