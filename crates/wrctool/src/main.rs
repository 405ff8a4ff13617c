use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wrctool_core::config::{WrcConfig, load_config};
use wrctool_core::editor::{
    SaveReport, SaveRequest, connect, list_entries, load_messages, render_stored, save_entry,
    show_entry,
};
use wrctool_core::messages::Messages;
use wrctool_core::record::{EntryEdits, FieldValue, Record};
use wrctool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use wrctool_core::schema::{Collection, CollectionSchema};

#[derive(Debug, Parser)]
#[command(
    name = "wrctool",
    version,
    about = "Edit the Wikimedia Resource Center data modules"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, help = "Log debug output to stderr")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .wrctool/ and a commented config.toml")]
    Init(InitArgs),
    #[command(about = "List the entries of a collection")]
    List(ListArgs),
    #[command(about = "Show one entry")]
    Show(ShowArgs),
    #[command(about = "Append a new entry")]
    Add(AddArgs),
    #[command(about = "Edit an entry in place")]
    Edit(EditArgs),
    #[command(about = "Remove an entry")]
    Delete(DeleteArgs),
    #[command(about = "Print the stored collection re-serialized")]
    Render(RenderArgs),
    #[command(about = "Print interface messages")]
    Messages(MessagesArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    collection: Collection,
    #[arg(long, help = "Print entries as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ShowArgs {
    collection: Collection,
    key: String,
    #[arg(long, value_name = "LANG", help = "Show option labels in this language")]
    lang: Option<String>,
    #[arg(long, help = "Print the entry as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct SaveArgs {
    #[arg(long, help = "Edit summary (replaces the default)")]
    summary: Option<String>,
    #[arg(long = "purge", value_name = "TITLE", help = "Additional page to purge")]
    purge: Vec<String>,
    #[arg(long, help = "Report the diff without saving")]
    dry_run: bool,
    #[arg(long, help = "Skip the local backup of the module")]
    no_backup: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    collection: Collection,
    #[arg(long = "set", value_name = "KEY=VALUE", help = "Field value; list items split on ';'")]
    set: Vec<String>,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Debug, Args)]
struct EditArgs {
    collection: Collection,
    key: String,
    #[arg(long = "set", value_name = "KEY=VALUE", help = "Field value; list items split on ';'")]
    set: Vec<String>,
    #[arg(long = "clear", value_name = "KEY", help = "Remove a field")]
    clear: Vec<String>,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    collection: Collection,
    key: String,
    #[arg(long, help = "Confirm the removal")]
    yes: bool,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Debug, Args)]
struct RenderArgs {
    collection: Collection,
    #[arg(long, help = "Render the translation section instead of the module")]
    translations: bool,
}

#[derive(Debug, Args)]
struct MessagesArgs {
    #[arg(long, value_name = "LANG")]
    lang: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::List(args)) => run_list(&runtime, args),
        Some(Commands::Show(args)) => run_show(&runtime, args),
        Some(Commands::Add(args)) => {
            let edits = parse_edits(args.collection.schema(), &args.set, &[])?;
            run_save(&runtime, args.collection, None, edits, false, args.save)
        }
        Some(Commands::Edit(args)) => {
            let edits = parse_edits(args.collection.schema(), &args.set, &args.clear)?;
            if edits.is_empty() {
                bail!("edit requires at least one --set or --clear");
            }
            run_save(
                &runtime,
                args.collection,
                Some(args.key),
                edits,
                false,
                args.save,
            )
        }
        Some(Commands::Delete(args)) => {
            if !args.yes && !args.save.dry_run {
                bail!(
                    "refusing to remove {} entry `{}` without --yes (or use --dry-run)",
                    args.collection,
                    args.key
                );
            }
            run_save(
                &runtime,
                args.collection,
                Some(args.key),
                EntryEdits::new(),
                true,
                args.save,
            )
        }
        Some(Commands::Render(args)) => run_render(&runtime, args),
        Some(Commands::Messages(args)) => run_messages(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("WRCTOOL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized wrctool runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("backups_dir: {}", normalize_for_display(&paths.backups_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions, args: ListArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let settings = config.collection(args.collection);
    let mut api = connect(&config)?;
    let snapshot = list_entries(&mut api, &settings)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot.records)?);
        return Ok(());
    }

    println!("collection: {}", snapshot.collection);
    println!("module: {}", settings.module);
    println!("revision_id: {}", snapshot.page.revision_id);
    println!("timestamp: {}", snapshot.page.timestamp);
    println!("entries: {}", snapshot.records.len());
    for (key, label) in snapshot.entry_labels() {
        if key == label || label.is_empty() {
            println!("  {key}");
        } else {
            println!("  {key}: {label}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_show(runtime: &RuntimeOptions, args: ShowArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let settings = config.collection(args.collection);
    let mut api = connect(&config)?;
    let record = show_entry(&mut api, &settings, &args.key)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let messages = match args.lang.as_deref() {
        Some(lang) => Some(load_messages(&mut api, &config, Some(lang))?),
        None => None,
    };
    print_record(args.collection.schema(), &record, messages.as_ref());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_save(
    runtime: &RuntimeOptions,
    collection: Collection,
    target: Option<String>,
    edits: EntryEdits,
    delete: bool,
    args: SaveArgs,
) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let request = SaveRequest {
        target,
        edits,
        delete,
        summary: args.summary,
        extra_purge: args.purge,
        dry_run: args.dry_run,
        no_backup: args.no_backup,
    };
    let report = save_entry(&paths, &config, collection, &request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_save_report(&report);
        print_diagnostics(runtime, &paths);
    }

    if !report.success() {
        bail!("module saved but one or more follow-up edits failed");
    }
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, args: RenderArgs) -> Result<()> {
    let (_, config) = load_runtime(runtime)?;
    let settings = config.collection(args.collection);
    let mut api = connect(&config)?;
    let text = render_stored(&mut api, &settings, args.translations)?;
    println!("{text}");
    Ok(())
}

fn run_messages(runtime: &RuntimeOptions, args: MessagesArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let mut api = connect(&config)?;
    let messages = load_messages(&mut api, &config, args.lang.as_deref())?;

    println!("group: {}", config.message_group());
    println!("language: {}", messages.language());
    let entries = messages.iter().collect::<Vec<_>>();
    println!("messages: {}", entries.len());
    for (key, text) in entries {
        println!("  {key}: {text}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_record(schema: &CollectionSchema, record: &Record, messages: Option<&Messages>) {
    let mut keys: Vec<&str> = schema.fields.iter().map(|field| field.key).collect();
    keys.extend(record.keys().filter(|key| schema.field(key).is_none()));
    for key in keys {
        let Some(value) = record.get(key) else {
            continue;
        };
        let rendered = match (schema.field(key), messages) {
            (Some(field), Some(messages)) if field.options().is_some() => match value {
                FieldValue::Text(text) => messages.option_label(field, text),
                FieldValue::List(items) => items
                    .iter()
                    .map(|item| messages.option_label(field, item))
                    .collect::<Vec<_>>()
                    .join(", "),
            },
            _ => value.display(),
        };
        println!("{key}: {rendered}");
    }
}

fn print_save_report(report: &SaveReport) {
    println!("collection: {}", report.collection);
    println!("module: {}", report.module);
    println!("action: {}", report.action.as_str());
    println!("key: {}", report.key);
    println!("summary: {}", report.summary);
    println!("dry_run: {}", report.dry_run);
    println!("changed: {}", report.changed);
    if let Some(path) = &report.backup_path {
        println!("backup_path: {path}");
    }
    if let Some(revision) = report.revision_id {
        println!("revision_id: {revision}");
    }
    for item in &report.follow_ups {
        match &item.error {
            Some(error) => println!("follow_up: {} ({}) failed: {error}", item.title, item.description),
            None if item.no_change => println!("follow_up: {} ({}) unchanged", item.title, item.description),
            None => println!("follow_up: {} ({}) saved", item.title, item.description),
        }
    }
    if !report.purged.is_empty() {
        println!("purged: {}", report.purged.join(", "));
    }
    println!("requests: {}", report.request_count);
    if !report.diff.is_empty() {
        println!("\n{}", report.diff.trim_end());
    }
}

/// Turn `--set key=value` and `--clear key` flags into edits.
fn parse_edits(schema: &CollectionSchema, sets: &[String], clears: &[String]) -> Result<EntryEdits> {
    let mut edits = EntryEdits::new();
    for item in sets {
        let Some((key, value)) = item.split_once('=') else {
            bail!("--set expects KEY=VALUE, got `{item}`");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("--set expects KEY=VALUE, got `{item}`");
        }
        let is_list = schema.field(key).is_some_and(|field| field.is_list());
        if is_list {
            let items = value
                .split(';')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>();
            edits.set_list(key, items);
        } else {
            edits.set_text(key, value.replace("\\n", "\n"));
        }
    }
    for key in clears {
        edits.clear(key.trim());
    }
    Ok(edits)
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, WrcConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

#[cfg(test)]
mod tests {
    use super::parse_edits;
    use wrctool_core::record::{FieldEdit, FieldValue};
    use wrctool_core::schema::Collection;

    #[test]
    fn list_fields_split_on_semicolons() {
        let schema = Collection::Resources.schema();
        let edits = parse_edits(
            schema,
            &[
                "audiences=For developers; For contributors;".to_string(),
                "description=Line one\\nLine two".to_string(),
                "header=a=b".to_string(),
            ],
            &["contact".to_string()],
        )
        .expect("parse");

        assert_eq!(
            edits.get("audiences"),
            Some(&FieldEdit::Set(FieldValue::List(vec![
                "For developers".to_string(),
                "For contributors".to_string(),
            ])))
        );
        assert_eq!(
            edits.get("description"),
            Some(&FieldEdit::Set(FieldValue::Text("Line one\nLine two".to_string())))
        );
        assert_eq!(
            edits.get("header"),
            Some(&FieldEdit::Set(FieldValue::Text("a=b".to_string())))
        );
        assert_eq!(edits.get("contact"), Some(&FieldEdit::Clear));
    }

    #[test]
    fn rejects_set_without_equals() {
        let schema = Collection::Groups.schema();
        assert!(parse_edits(schema, &["name".to_string()], &[]).is_err());
        assert!(parse_edits(schema, &["=x".to_string()], &[]).is_err());
    }
}
