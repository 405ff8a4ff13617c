use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::api::{
    EditRequest, MediaWikiClient, MediaWikiClientConfig, RemotePage, WikiReadApi, WikiWriteApi,
};
use crate::config::{CollectionSettings, WrcConfig};
use crate::lua_table::parse_module;
use crate::messages::Messages;
use crate::reconcile::{EntryAction, IdSource, RandomIds, Reconciliation, find_entry_index, reconcile};
use crate::record::{EntryEdits, FieldValue, Record, records_from_module};
use crate::render::{
    append_skill_categories, render_group_page, render_module, render_translation_section,
};
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::schema::{Collection, CollectionSchema};

pub const MODULE_CONTENT_MODEL: &str = "Scribunto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Bot credentials from `WIKI_BOT_USER` / `WIKI_BOT_PASS`.
    pub fn from_env() -> Option<Self> {
        let username = env::var("WIKI_BOT_USER").ok()?.trim().to_string();
        let password = env::var("WIKI_BOT_PASS").ok()?;
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

/// A collection as currently stored on the wiki.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub collection: Collection,
    pub page: RemotePage,
    pub records: Vec<Record>,
}

impl CollectionSnapshot {
    pub fn schema(&self) -> &'static CollectionSchema {
        self.collection.schema()
    }

    /// Key and display label of every entry, in stored order.
    pub fn entry_labels(&self) -> Vec<(String, String)> {
        let schema = self.schema();
        self.records
            .iter()
            .map(|record| {
                let key = record.text(schema.key_field).unwrap_or("").to_string();
                let label = record
                    .get(schema.display_field)
                    .map(FieldValue::display)
                    .unwrap_or_default();
                (key, label)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    /// Key of the entry to change; `None` adds a new entry.
    pub target: Option<String>,
    pub edits: EntryEdits,
    pub delete: bool,
    pub summary: Option<String>,
    pub extra_purge: Vec<String>,
    pub dry_run: bool,
    pub no_backup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FollowUpResult {
    pub title: String,
    pub description: String,
    pub ok: bool,
    pub no_change: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub collection: Collection,
    pub module: String,
    pub action: EntryAction,
    pub key: String,
    pub summary: String,
    pub dry_run: bool,
    pub changed: bool,
    pub diff: String,
    pub backup_path: Option<String>,
    pub revision_id: Option<i64>,
    pub follow_ups: Vec<FollowUpResult>,
    pub purged: Vec<String>,
    pub request_count: usize,
}

impl SaveReport {
    pub fn success(&self) -> bool {
        self.follow_ups.iter().all(|item| item.ok)
    }
}

/// Everything a save needs besides the wiki connection.
pub struct SaveContext<'a> {
    pub paths: &'a ResolvedPaths,
    pub settings: &'a CollectionSettings,
    pub messages: &'a Messages,
    pub credentials: Option<&'a Credentials>,
}

pub fn connect(config: &WrcConfig) -> Result<MediaWikiClient> {
    MediaWikiClient::new(MediaWikiClientConfig::from_config(config))
}

/// Fetch messages for `language`, or the configured language when `None`.
pub fn load_messages<A: WikiReadApi + ?Sized>(
    api: &mut A,
    config: &WrcConfig,
    language: Option<&str>,
) -> Result<Messages> {
    let settings = config.wiki_settings();
    let language = language.unwrap_or(&settings.language);
    Messages::load(api, &config.message_group(), language)
}

/// Messages for edit summaries and page prefixes; a save never fails on them.
pub fn load_messages_or_builtin<A: WikiReadApi + ?Sized>(
    api: &mut A,
    config: &WrcConfig,
) -> Messages {
    load_messages(api, config, None).unwrap_or_else(|error| {
        warn!("using built-in messages: {error:#}");
        Messages::builtin()
    })
}

pub fn load_collection<A: WikiReadApi + ?Sized>(
    api: &mut A,
    settings: &CollectionSettings,
) -> Result<CollectionSnapshot> {
    let page = api
        .get_page(&settings.module)?
        .ok_or_else(|| anyhow::anyhow!("data module does not exist: {}", settings.module))?;
    debug!(
        module = %settings.module,
        page_id = page.page_id,
        revision = page.revision_id,
        "fetched data module"
    );
    if let Some(model) = page.content_model.as_deref()
        && model != MODULE_CONTENT_MODEL
    {
        bail!("{} has content model `{model}`, not a Lua module", settings.module);
    }
    let module = parse_module(&page.content)
        .with_context(|| format!("failed to read {}", settings.module))?;
    let records = records_from_module(&module)
        .with_context(|| format!("failed to read {}", settings.module))?;
    Ok(CollectionSnapshot {
        collection: settings.collection,
        page,
        records,
    })
}

pub fn list_entries<A: WikiReadApi + ?Sized>(
    api: &mut A,
    settings: &CollectionSettings,
) -> Result<CollectionSnapshot> {
    load_collection(api, settings)
}

pub fn show_entry<A: WikiReadApi + ?Sized>(
    api: &mut A,
    settings: &CollectionSettings,
    key: &str,
) -> Result<Record> {
    let snapshot = load_collection(api, settings)?;
    let schema = snapshot.schema();
    let index = find_entry_index(schema, &snapshot.records, key).ok_or_else(|| {
        anyhow::anyhow!(
            "no {} entry with {} `{}`",
            settings.collection,
            schema.key_field,
            key.trim()
        )
    })?;
    Ok(snapshot.records[index].clone())
}

/// Re-serialize the stored collection, or its translation section.
pub fn render_stored<A: WikiReadApi + ?Sized>(
    api: &mut A,
    settings: &CollectionSettings,
    translations: bool,
) -> Result<String> {
    let snapshot = load_collection(api, settings)?;
    let schema = snapshot.schema();
    if translations {
        if schema.translatable_fields().next().is_none() {
            bail!("{} have no translatable fields", settings.collection);
        }
        return Ok(render_translation_section(schema, &snapshot.records));
    }
    Ok(render_module(schema, &snapshot.records))
}

/// Add, edit or remove one entry against the configured wiki.
pub fn save_entry(
    paths: &ResolvedPaths,
    config: &WrcConfig,
    collection: Collection,
    request: &SaveRequest,
) -> Result<SaveReport> {
    let mut api = connect(config)?;
    let settings = config.collection(collection);
    let messages = load_messages_or_builtin(&mut api, config);
    let credentials = Credentials::from_env();
    let context = SaveContext {
        paths,
        settings: &settings,
        messages: &messages,
        credentials: credentials.as_ref(),
    };
    save_entry_with_api(&mut api, &context, request, &mut RandomIds)
}

pub fn save_entry_with_api<A: WikiWriteApi>(
    api: &mut A,
    context: &SaveContext<'_>,
    request: &SaveRequest,
    ids: &mut dyn IdSource,
) -> Result<SaveReport> {
    let settings = context.settings;
    let snapshot = load_collection(api, settings)?;
    let schema = snapshot.schema();
    let stored = snapshot.page;

    let reconciliation = reconcile(
        schema,
        snapshot.records,
        request.target.as_deref(),
        &request.edits,
        request.delete,
        ids,
    )?;
    let rendered = render_module(schema, &reconciliation.records);
    let diff = unified_diff(&stored.content, &rendered, &settings.module);
    let summary = request
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| default_summary(schema, context.messages, &reconciliation));
    let changed = rendered != stored.content;

    let mut report = SaveReport {
        collection: settings.collection,
        module: settings.module.clone(),
        action: reconciliation.action,
        key: reconciliation.key.clone(),
        summary: summary.clone(),
        dry_run: request.dry_run,
        changed,
        diff,
        backup_path: None,
        revision_id: None,
        follow_ups: Vec::new(),
        purged: Vec::new(),
        request_count: 0,
    };

    if request.dry_run || !changed {
        info!(
            action = reconciliation.action.as_str(),
            key = %reconciliation.key,
            dry_run = request.dry_run,
            changed,
            "module not written"
        );
        report.request_count = api.request_count();
        return Ok(report);
    }

    let Some(credentials) = context.credentials else {
        bail!("WIKI_BOT_USER and WIKI_BOT_PASS must be set to save changes");
    };

    if !request.no_backup {
        let path = write_backup(context.paths, settings, &stored.content)?;
        report.backup_path = Some(normalize_for_display(&path));
    }

    api.login(&credentials.username, &credentials.password)?;

    let outcome = api.edit_page(&EditRequest {
        nocreate: true,
        content_model: Some(MODULE_CONTENT_MODEL.to_string()),
        base_timestamp: Some(stored.timestamp.clone()),
        start_timestamp: stored.fetched_at.clone(),
        ..EditRequest::new(&settings.module, &rendered, &summary)
    })?;
    report.revision_id = outcome.new_revision_id;
    info!(
        module = %outcome.title,
        action = reconciliation.action.as_str(),
        key = %reconciliation.key,
        revision = ?outcome.new_revision_id,
        "saved data module"
    );

    report.follow_ups = run_follow_ups(api, context, &reconciliation, &summary);

    let purge_titles = purge_titles(settings, &request.extra_purge);
    if !purge_titles.is_empty() {
        match api.purge_pages(&purge_titles) {
            Ok(purged) => report.purged = purged,
            Err(error) => {
                warn!("purge failed: {error:#}");
                report.follow_ups.push(FollowUpResult {
                    title: purge_titles.join("|"),
                    description: "purge".to_string(),
                    ok: false,
                    no_change: false,
                    error: Some(format!("{error:#}")),
                });
            }
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn run_follow_ups<A: WikiWriteApi>(
    api: &mut A,
    context: &SaveContext<'_>,
    reconciliation: &Reconciliation,
    summary: &str,
) -> Vec<FollowUpResult> {
    let settings = context.settings;
    let mut results = Vec::new();
    let removed = reconciliation.action == EntryAction::Removed;

    match settings.collection {
        Collection::Resources => {
            if let Some(target) = &settings.translation {
                let text =
                    render_translation_section(settings.collection.schema(), &reconciliation.records);
                let description = format!("translation section {}", target.section);
                let outcome = api
                    .edit_page(&EditRequest {
                        section: Some(target.section),
                        nocreate: true,
                        ..EditRequest::new(&target.page, text, summary)
                    })
                    .map(|outcome| outcome.no_change);
                results.push(follow_up(&target.page, description, outcome));
            }
        }
        Collection::Groups if !removed => {
            let prefix = settings.page_prefix.as_deref().unwrap_or_default();
            let title = format!("{prefix}{}", reconciliation.key);
            let outcome = api
                .edit_page(&EditRequest::new(
                    &title,
                    render_group_page(&reconciliation.entry),
                    summary,
                ))
                .map(|outcome| outcome.no_change);
            results.push(follow_up(&title, "group page".to_string(), outcome));
        }
        Collection::Individuals if !removed => {
            let skills = match reconciliation.entry.get("skills") {
                Some(FieldValue::List(skills)) if !skills.is_empty() => skills.clone(),
                _ => return results,
            };
            let prefix = settings
                .page_prefix
                .clone()
                .unwrap_or_else(|| context.messages.text("user-page"));
            let title = format!("{prefix}{}", reconciliation.key);
            let outcome = add_skill_categories(api, context.messages, &title, &skills);
            results.push(follow_up(&title, "skill categories".to_string(), outcome));
        }
        Collection::Groups | Collection::Individuals => {}
    }

    results
}

fn add_skill_categories<A: WikiWriteApi>(
    api: &mut A,
    messages: &Messages,
    title: &str,
    skills: &[String],
) -> Result<bool> {
    let page = api
        .get_page(title)?
        .ok_or_else(|| anyhow::anyhow!("page does not exist: {title}"))?;
    let (text, added) = append_skill_categories(&page.content, skills);
    if added.is_empty() {
        return Ok(true);
    }
    let summary_key = if added.len() > 1 {
        "added-categories"
    } else {
        "added-category"
    };
    let summary = format!("{}{}", messages.text(summary_key), added.join(", "));
    let outcome = api.edit_page(&EditRequest {
        nocreate: true,
        base_timestamp: Some(page.timestamp.clone()),
        start_timestamp: page.fetched_at.clone(),
        ..EditRequest::new(title, text, summary)
    })?;
    Ok(outcome.no_change)
}

fn follow_up(title: &str, description: String, outcome: Result<bool>) -> FollowUpResult {
    match outcome {
        Ok(no_change) => FollowUpResult {
            title: title.to_string(),
            description,
            ok: true,
            no_change,
            error: None,
        },
        Err(error) => {
            warn!(title, "{description} failed: {error:#}");
            FollowUpResult {
                title: title.to_string(),
                description,
                ok: false,
                no_change: false,
                error: Some(format!("{error:#}")),
            }
        }
    }
}

fn default_summary(
    schema: &CollectionSchema,
    messages: &Messages,
    reconciliation: &Reconciliation,
) -> String {
    let name = reconciliation
        .entry
        .get(schema.display_field)
        .map(FieldValue::display)
        .unwrap_or_else(|| reconciliation.key.clone());
    let templates = &schema.summaries;
    let prefix = match reconciliation.action {
        EntryAction::Added => templates
            .add_message
            .and_then(|key| messages.get(key))
            .unwrap_or(templates.add)
            .to_string(),
        EntryAction::Edited => templates.edit.to_string(),
        EntryAction::Removed => templates.remove.to_string(),
    };
    format!("{prefix}{name}")
}

fn purge_titles(settings: &CollectionSettings, extra: &[String]) -> Vec<String> {
    let mut titles: Vec<String> = Vec::new();
    for title in settings.purge.iter().chain(extra) {
        let title = title.trim();
        if !title.is_empty() && !titles.iter().any(|existing| existing == title) {
            titles.push(title.to_string());
        }
    }
    titles
}

pub fn unified_diff(old: &str, new: &str, title: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{title} (stored)"), &format!("{title} (rendered)"))
        .to_string()
}

fn write_backup(paths: &ResolvedPaths, settings: &CollectionSettings, content: &str) -> Result<PathBuf> {
    let path = plan_backup_path(&paths.backups_dir, settings, content)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create backup dir {}", parent.display()))?;
    }
    fs::write(&path, content)
        .with_context(|| format!("failed to write backup {}", path.display()))?;
    debug!(path = %path.display(), "wrote module backup");
    Ok(path)
}

fn plan_backup_path(
    backups_dir: &Path,
    settings: &CollectionSettings,
    content: &str,
) -> Result<PathBuf> {
    let timestamp = unix_timestamp()?;
    let safe_title = sanitize_title_for_filename(&settings.module);
    Ok(backups_dir
        .join(settings.collection.as_str())
        .join(format!("{safe_title}_{timestamp}_{}.lua", content_hash(content))))
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn sanitize_title_for_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        if matches!(ch, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_whitespace()
        {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use anyhow::bail;
    use tempfile::tempdir;

    use super::{
        Credentials, SaveContext, SaveRequest, content_hash, load_messages_or_builtin,
        render_stored, sanitize_title_for_filename, save_entry_with_api, show_entry,
    };
    use crate::api::{
        EditOutcome, EditRequest, MessageEntry, RemotePage, WikiReadApi, WikiWriteApi,
    };
    use crate::config::WrcConfig;
    use crate::messages::Messages;
    use crate::reconcile::{EntryAction, IdSource};
    use crate::record::EntryEdits;
    use crate::runtime::{ResolvedPaths, ValueSource};
    use crate::schema::Collection;

    const RESOURCES_MODULE: &str = "Module:Wikimedia Resource Center/Content";
    const GROUPS_MODULE: &str = "Module:Wikimedia Resource Center/Groups";
    const INDIVIDUALS_MODULE: &str = "Module:Wikimedia Resource Center/Individuals";

    #[derive(Default)]
    struct MockApi {
        pages: BTreeMap<String, RemotePage>,
        edits: Vec<EditRequest>,
        purged: Vec<String>,
        failing_titles: Vec<String>,
        messages_unavailable: bool,
        logged_in: bool,
        request_count: usize,
    }

    impl MockApi {
        fn with_page(mut self, title: &str, content: &str) -> Self {
            self.pages.insert(
                title.to_string(),
                RemotePage {
                    title: title.to_string(),
                    page_id: 1,
                    revision_id: 10,
                    timestamp: "2024-05-01T00:00:00Z".to_string(),
                    content: content.to_string(),
                    content_model: None,
                    fetched_at: Some("2024-05-02T00:00:00Z".to_string()),
                },
            );
            self
        }
    }

    impl WikiReadApi for MockApi {
        fn get_page(&mut self, title: &str) -> anyhow::Result<Option<RemotePage>> {
            self.request_count += 1;
            Ok(self.pages.get(title).cloned())
        }

        fn get_message_collection(
            &mut self,
            _group: &str,
            _language: &str,
        ) -> anyhow::Result<Vec<MessageEntry>> {
            self.request_count += 1;
            if self.messages_unavailable {
                bail!("MediaWiki API error [badparameter]: unknown message group");
            }
            Ok(Vec::new())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiWriteApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> anyhow::Result<()> {
            self.request_count += 1;
            self.logged_in = true;
            Ok(())
        }

        fn edit_page(&mut self, request: &EditRequest) -> anyhow::Result<EditOutcome> {
            self.request_count += 1;
            if !self.logged_in {
                bail!("not logged in");
            }
            if self.failing_titles.contains(&request.title) {
                bail!("MediaWiki API error [protectedpage]: This page has been protected");
            }
            self.edits.push(request.clone());
            Ok(EditOutcome {
                title: request.title.clone(),
                new_revision_id: Some(11),
                no_change: false,
            })
        }

        fn purge_pages(&mut self, titles: &[String]) -> anyhow::Result<Vec<String>> {
            self.request_count += 1;
            self.purged.extend(titles.iter().cloned());
            Ok(titles.to_vec())
        }
    }

    struct FixedId(&'static str);

    impl IdSource for FixedId {
        fn next_id(&mut self) -> String {
            self.0.to_string()
        }
    }

    fn test_paths(root: &std::path::Path) -> ResolvedPaths {
        let state_dir = root.join(".wrctool");
        ResolvedPaths {
            project_root: root.to_path_buf(),
            backups_dir: state_dir.join("backups"),
            config_path: state_dir.join("config.toml"),
            state_dir,
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "Bot@wrc".to_string(),
            password: "secret".to_string(),
        }
    }

    const RESOURCES_SOURCE: &str = "return {\n\t{\n\t\tunique_id = 'r1',\n\t\theader = 'Grants',\n\t\tcategory = 'Grants Support',\n\t},\n}";

    #[test]
    fn adding_a_resource_writes_module_translations_and_purges() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let credentials = credentials();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: Some(&credentials),
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);

        let mut edits = EntryEdits::new();
        edits
            .set_text("header", "Legal help")
            .set_text("description", "Ask us\nanything");
        let request = SaveRequest {
            edits,
            extra_purge: vec!["Wikimedia Resource Center".to_string(), "Extra".to_string()],
            ..SaveRequest::default()
        };

        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("newid")).expect("save");

        assert!(report.success());
        assert!(report.changed);
        assert_eq!(report.action, EntryAction::Added);
        assert_eq!(report.key, "newid");
        assert_eq!(report.summary, "Adding entry Legal help");
        assert_eq!(report.revision_id, Some(11));

        assert_eq!(api.edits.len(), 2);
        let module_edit = &api.edits[0];
        assert_eq!(module_edit.title, RESOURCES_MODULE);
        assert!(module_edit.nocreate);
        assert_eq!(module_edit.content_model.as_deref(), Some("Scribunto"));
        assert_eq!(module_edit.base_timestamp.as_deref(), Some("2024-05-01T00:00:00Z"));
        assert_eq!(module_edit.start_timestamp.as_deref(), Some("2024-05-02T00:00:00Z"));
        assert!(module_edit.text.contains(
            "\t{\n\t\tunique_id = 'newid',\n\t\theader = 'Legal help',\n\t\tdescription = 'Ask us<br />anything',\n\t},\n}"
        ));

        let translation_edit = &api.edits[1];
        assert_eq!(translation_edit.title, "Template:I18n/Wikimedia_Resource_Center");
        assert_eq!(translation_edit.section, Some(4));
        assert!(
            translation_edit
                .text
                .contains("* <translate><!--T:content-newid-description--> Ask us\nanything</translate>\n")
        );

        assert_eq!(
            api.purged,
            vec!["Wikimedia Resource Center".to_string(), "Extra".to_string()]
        );

        let backup = report.backup_path.expect("backup path");
        assert!(backup.contains("/backups/resources/Module_Wikimedia_Resource_Center_Content_"));
        assert!(backup.ends_with(&format!("_{}.lua", content_hash(RESOURCES_SOURCE))));
        let saved = fs::read_to_string(&backup).expect("read backup");
        assert_eq!(saved, RESOURCES_SOURCE);
    }

    #[test]
    fn missing_credentials_refuse_the_save_before_any_backup() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: None,
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);

        let mut edits = EntryEdits::new();
        edits.set_text("header", "Grants and funding");
        let request = SaveRequest {
            target: Some("r1".to_string()),
            edits,
            ..SaveRequest::default()
        };
        let error = save_entry_with_api(&mut api, &context, &request, &mut FixedId("x"))
            .expect_err("credentials required");

        assert!(error.to_string().contains("WIKI_BOT_USER"));
        assert!(api.edits.is_empty());
        assert!(!paths.backups_dir.exists());
    }

    #[test]
    fn unavailable_message_group_falls_back_to_builtin_messages() {
        let mut api = MockApi {
            messages_unavailable: true,
            ..MockApi::default()
        };

        let messages = load_messages_or_builtin(&mut api, &WrcConfig::default());

        assert_eq!(api.request_count, 1);
        assert_eq!(messages.text("user-page"), "User:");
        assert_eq!(messages.iter().count(), Messages::builtin().iter().count());
    }

    #[test]
    fn non_lua_page_is_not_read_as_a_data_module() {
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);
        if let Some(page) = api.pages.get_mut(RESOURCES_MODULE) {
            page.content_model = Some("wikitext".to_string());
        }

        let error = show_entry(&mut api, &settings, "r1").expect_err("wrong content model");
        assert!(error.to_string().contains("content model `wikitext`"));
    }

    #[test]
    fn dry_run_reports_diff_without_writing() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: None,
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);

        let request = SaveRequest {
            target: Some("r1".to_string()),
            delete: true,
            dry_run: true,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("dry run");

        assert!(report.dry_run);
        assert!(report.changed);
        assert_eq!(report.action, EntryAction::Removed);
        assert_eq!(report.summary, "Removing entry Grants");
        assert!(report.diff.contains("-\t\theader = 'Grants',"));
        assert!(report.backup_path.is_none());
        assert!(api.edits.is_empty());
        assert!(!paths.backups_dir.exists());
    }

    #[test]
    fn unchanged_module_is_not_written() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: None,
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);

        let mut edits = EntryEdits::new();
        edits.set_text("header", "Grants");
        let request = SaveRequest {
            target: Some("r1".to_string()),
            edits,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("save");
        assert!(!report.changed);
        assert!(report.diff.is_empty());
        assert!(api.edits.is_empty());
        assert!(!api.logged_in);
    }

    #[test]
    fn saving_requires_credentials() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: None,
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);
        let request = SaveRequest {
            target: Some("r1".to_string()),
            delete: true,
            no_backup: true,
            ..SaveRequest::default()
        };
        let error = save_entry_with_api(&mut api, &context, &request, &mut FixedId("x"))
            .expect_err("must fail");
        assert!(error.to_string().contains("WIKI_BOT_USER"));
        assert!(api.edits.is_empty());
    }

    #[test]
    fn editing_a_group_rewrites_its_connect_page() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Groups);
        let messages = Messages::builtin();
        let credentials = credentials();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: Some(&credentials),
        };
        let source = "return {\n\t{ type = 'group', name = 'Art_Feminism', description = 'Edit-a-thons' },\n}";
        let mut api = MockApi::default().with_page(GROUPS_MODULE, source);

        let mut edits = EntryEdits::new();
        edits.set_text("icon", "File:AF.svg");
        let request = SaveRequest {
            target: Some("Art Feminism".to_string()),
            edits,
            no_backup: true,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("save");

        assert_eq!(report.summary, "Editing entry: Art_Feminism");
        assert_eq!(api.edits.len(), 2);
        let page = &api.edits[1];
        assert_eq!(page.title, "Connect/Art_Feminism");
        assert!(!page.nocreate);
        assert_eq!(
            page.text,
            "{{Connect group\n| introduction = Edit-a-thons\n| icon = File:AF.svg\n}}\n[[Category:Connect groups|{{SUBPAGENAME}}]]"
        );
        assert_eq!(api.purged, vec!["Connect".to_string()]);
    }

    #[test]
    fn removing_a_group_leaves_its_page_alone() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Groups);
        let messages = Messages::builtin();
        let credentials = credentials();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: Some(&credentials),
        };
        let source = "return {\n\t{ type = 'group', name = 'Alpha', description = 'A' },\n\t{ type = 'group', name = 'Beta', description = 'B' },\n}";
        let mut api = MockApi::default().with_page(GROUPS_MODULE, source);

        let request = SaveRequest {
            target: Some("Alpha".to_string()),
            delete: true,
            no_backup: true,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("save");
        assert_eq!(report.summary, "Removing entry: Alpha");
        assert!(report.follow_ups.is_empty());
        assert_eq!(api.edits.len(), 1);
        assert_eq!(
            api.edits[0].text,
            "return {\n\t{\n\t\ttype = 'group',\n\t\tname = 'Beta',\n\t\tdescription = 'B',\n\t},\n}"
        );
    }

    #[test]
    fn adding_an_individual_tags_their_user_page() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Individuals);
        let messages = Messages::builtin();
        let credentials = credentials();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: Some(&credentials),
        };
        let mut api = MockApi::default()
            .with_page(INDIVIDUALS_MODULE, "return {}")
            .with_page("User:Jane_Doe", "About me\n[[Category:Survey skills]]");

        let mut edits = EntryEdits::new();
        edits
            .set_text("name", "Jane Doe")
            .set_text("description", "Organizer")
            .set_list("skills", ["Survey skills", "Financial skills"]);
        let request = SaveRequest {
            edits,
            no_backup: true,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("save");

        assert!(report.success());
        assert_eq!(report.summary, "Adding new individual: Jane_Doe");
        assert_eq!(api.edits.len(), 2);
        let user_page = &api.edits[1];
        assert_eq!(user_page.title, "User:Jane_Doe");
        assert!(user_page.nocreate);
        assert_eq!(user_page.summary, "Added category: Financial skills");
        assert_eq!(
            user_page.text,
            "About me\n[[Category:Survey skills]]\n[[Category:Financial skills]]"
        );
        assert!(api.edits[0].text.contains("\t\ttype = 'user',\n"));
    }

    #[test]
    fn failed_follow_up_is_reported_without_undoing_the_module_edit() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let messages = Messages::builtin();
        let credentials = credentials();
        let context = SaveContext {
            paths: &paths,
            settings: &settings,
            messages: &messages,
            credentials: Some(&credentials),
        };
        let mut api = MockApi::default().with_page(RESOURCES_MODULE, RESOURCES_SOURCE);
        api.failing_titles
            .push("Template:I18n/Wikimedia_Resource_Center".to_string());

        let mut edits = EntryEdits::new();
        edits.set_text("contact", "grants@example.org");
        let request = SaveRequest {
            target: Some("r1".to_string()),
            edits,
            summary: Some("Fix contact".to_string()),
            no_backup: true,
            ..SaveRequest::default()
        };
        let report =
            save_entry_with_api(&mut api, &context, &request, &mut FixedId("x")).expect("save");

        assert!(!report.success());
        assert_eq!(report.summary, "Fix contact");
        assert_eq!(api.edits.len(), 1);
        assert_eq!(api.edits[0].title, RESOURCES_MODULE);
        let failure = &report.follow_ups[0];
        assert!(!failure.ok);
        assert!(
            failure
                .error
                .as_deref()
                .is_some_and(|error| error.contains("protectedpage"))
        );
        assert_eq!(api.purged, vec!["Wikimedia Resource Center".to_string()]);
    }

    #[test]
    fn show_and_render_read_the_stored_module() {
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Resources);
        let mut api = MockApi::default().with_page(
            RESOURCES_MODULE,
            "return { { unique_id = \"r1\", header = \"Grants\", description = 'Line\\nbreak' } }",
        );

        let record = show_entry(&mut api, &settings, "r1").expect("show");
        assert_eq!(record.text("header"), Some("Grants"));
        assert!(show_entry(&mut api, &settings, "missing").is_err());

        let module = render_stored(&mut api, &settings, false).expect("render");
        assert_eq!(
            module,
            "return {\n\t{\n\t\tunique_id = 'r1',\n\t\theader = 'Grants',\n\t\tdescription = 'Line<br />break',\n\t},\n}"
        );
        let section = render_stored(&mut api, &settings, true).expect("translations");
        assert!(section.starts_with("==Content==\n* <translate><!--T:content-r1-header--> Grants"));

        let groups = config.collection(Collection::Groups);
        let mut api = MockApi::default().with_page(GROUPS_MODULE, "return {}");
        assert!(render_stored(&mut api, &groups, true).is_err());
    }

    #[test]
    fn missing_module_is_an_error() {
        let config = WrcConfig::default();
        let settings = config.collection(Collection::Groups);
        let mut api = MockApi::default();
        let error = show_entry(&mut api, &settings, "Alpha").expect_err("must fail");
        assert!(error.to_string().contains("data module does not exist"));
    }

    #[test]
    fn backup_names_are_filesystem_safe() {
        assert_eq!(
            sanitize_title_for_filename("Module:Wikimedia Resource Center/Groups"),
            "Module_Wikimedia_Resource_Center_Groups"
        );
        assert_eq!(content_hash("return {}").len(), 8);
    }
}
