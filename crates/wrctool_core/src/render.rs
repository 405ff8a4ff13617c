use crate::record::{FieldValue, Record};
use crate::schema::CollectionSchema;

const LINE_BREAK_MARKER: &str = "<br />";
const LUA_RESERVED_WORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];
const GROUP_PAGE_FIELDS: &[(&str, &str)] = &[
    ("description", "introduction"),
    ("icon", "icon"),
    ("facebook", "facebook"),
    ("twitter", "twitter"),
    ("youtube", "youtube"),
];

/// Serialize a collection back into its Lua data module.
///
/// Schema fields come first in schema order; other keys follow in lexical
/// order so nothing stored on the page is lost. Empty strings are omitted.
pub fn render_module(schema: &CollectionSchema, records: &[Record]) -> String {
    let mut out = String::from("return {\n");
    for record in records {
        out.push_str("\t{\n");
        for (key, value) in ordered_fields(schema, record) {
            let value = if key == schema.key_field {
                match value {
                    FieldValue::Text(text) => FieldValue::Text(schema.normalize_key(text)),
                    other => other.clone(),
                }
            } else {
                value.clone()
            };
            out.push_str("\t\t");
            out.push_str(&lua_key(key));
            out.push_str(" = ");
            out.push_str(&lua_literal(&value));
            out.push_str(",\n");
        }
        out.push_str("\t},\n");
    }
    out.push('}');
    out
}

/// Translation markup for every translatable field of every record.
pub fn render_translation_section(schema: &CollectionSchema, records: &[Record]) -> String {
    let mut out = String::from("==Content==\n");
    for record in records {
        let Some(uid) = record.text(schema.key_field) else {
            continue;
        };
        for field in schema.translatable_fields() {
            let Some(value) = record.get(field.key).filter(|value| !value.is_empty()) else {
                continue;
            };
            out.push_str(&format!(
                "* <translate><!--T:content-{uid}-{}--> {}</translate>\n",
                field.key,
                value.display()
            ));
        }
    }
    out
}

/// Wikitext of a group's landing page.
pub fn render_group_page(record: &Record) -> String {
    let mut out = String::from("{{Connect group\n");
    for (field, param) in GROUP_PAGE_FIELDS {
        if let Some(value) = record.get(field).filter(|value| !value.is_empty()) {
            out.push_str(&format!("| {param} = {}\n", value.display()));
        }
    }
    out.push_str("}}\n[[Category:Connect groups|{{SUBPAGENAME}}]]");
    out
}

/// Append category links for each skill the page does not link yet.
///
/// Returns the new text and the skills that were added.
pub fn append_skill_categories(page_text: &str, skills: &[String]) -> (String, Vec<String>) {
    let mut out = page_text.to_string();
    let mut added = Vec::new();
    for skill in skills {
        let link = format!("[[Category:{skill}]]");
        if out.contains(&link) || added.contains(skill) {
            continue;
        }
        out.push('\n');
        out.push_str(&link);
        added.push(skill.clone());
    }
    (out, added)
}

pub fn lua_literal(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => quote(text),
        FieldValue::List(items) => {
            let items = items.iter().map(|item| quote(item)).collect::<Vec<_>>();
            format!("{{{}}}", items.join(", "))
        }
    }
}

/// Escape text for a single-quoted Lua string.
pub fn escape_text(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace("\r\n", "\n")
        .replace(['\n', '\r'], LINE_BREAK_MARKER)
        .replace('\'', "\\'")
}

fn quote(value: &str) -> String {
    format!("'{}'", escape_text(value))
}

/// Bare field name when Lua allows one, `['...']` otherwise.
fn lua_key(key: &str) -> String {
    let mut chars = key.chars();
    let is_name = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !LUA_RESERVED_WORDS.contains(&key);
    if is_name {
        key.to_string()
    } else {
        let escaped = key
            .replace('\\', "\\\\")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\'', "\\'");
        format!("['{escaped}']")
    }
}

fn ordered_fields<'a>(
    schema: &CollectionSchema,
    record: &'a Record,
) -> Vec<(&'a str, &'a FieldValue)> {
    let mut fields = schema
        .fields
        .iter()
        .filter_map(|field| record.iter().find(|(key, _)| *key == field.key))
        .collect::<Vec<_>>();
    // Record iteration is already lexical.
    fields.extend(record.iter().filter(|(key, _)| schema.field(key).is_none()));
    // Empty lists stay as `{}`.
    fields.retain(|(_, value)| !matches!(value, FieldValue::Text(text) if text.is_empty()));
    fields
}
