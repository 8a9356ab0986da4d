use anyhow::{bail, Context, Result};
use serde::Serialize;
use soulforge::{
    http::UreqClient,
    launch::SystemLauncher,
    library::{BatchReport, Toggle},
    ModManager,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

enum CliCommand {
    GameGet,
    GameSet(PathBuf),
    CatalogRefresh,
    CatalogList { filter: Option<String> },
    CatalogOutdated,
    ModsList,
    ModsDir,
    ModsInstall(String),
    ModsEnable { names: Vec<String>, with: Vec<String> },
    ModsDisable(Vec<String>),
    ModsUninstall(Vec<String>),
    ModsReconcile,
    PacksList,
    PacksCreate(PackCreateOptions),
    PacksDelete(String),
    PacksExport(String),
    PacksImport(String),
    PacksActivate(String),
    PacksDeactivate,
    ModeGet,
    ModeSet { vanilla: bool },
    ApiInstall,
    Launch,
    Paths,
    Help,
    Version,
}

struct PackCreateOptions {
    name: String,
    description: String,
    author: String,
    mods: Option<Vec<String>>,
}

pub fn run(data_dir: &Path) -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (format, tokens) = parse_global_options(&args);
    let command = parse_command(&tokens)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("Soulforge v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let manager = ModManager::open(
                data_dir,
                Arc::new(UreqClient::new()),
                Arc::new(SystemLauncher),
            )
            .with_context(|| format!("open data dir {}", data_dir.display()))?;
            run_command(&manager, command, format)
        }
    }
}

fn parse_global_options(args: &[String]) -> (OutputFormat, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        tokens.push(arg.to_string());
    }
    (format, tokens)
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let head = tokens.first().map(String::as_str);
    let sub = tokens.get(1).map(String::as_str);
    let rest = tokens.get(2..).unwrap_or(&[]);

    let command = match (head, sub) {
        (None, _) | (Some("--help" | "-h" | "help"), _) => CliCommand::Help,
        (Some("--version" | "-V" | "version"), _) => CliCommand::Version,
        (Some("game"), None | Some("get")) => CliCommand::GameGet,
        (Some("game"), Some("set")) => {
            let dir = rest.first().context("game set requires a directory")?;
            CliCommand::GameSet(PathBuf::from(dir))
        }
        (Some("catalog"), Some("refresh")) => CliCommand::CatalogRefresh,
        (Some("catalog"), None | Some("list")) => CliCommand::CatalogList {
            filter: flag_value(rest, "--filter")?,
        },
        (Some("catalog"), Some("outdated")) => CliCommand::CatalogOutdated,
        (Some("mods"), None | Some("list")) => CliCommand::ModsList,
        (Some("mods"), Some("dir")) => CliCommand::ModsDir,
        (Some("mods"), Some("install")) => {
            let name = rest.first().context("mods install requires a mod name")?;
            CliCommand::ModsInstall(name.to_string())
        }
        (Some("mods"), Some("enable")) => {
            let (names, with) = split_with(rest);
            if names.is_empty() {
                bail!("mods enable requires at least one mod name");
            }
            CliCommand::ModsEnable { names, with }
        }
        (Some("mods"), Some("disable")) => CliCommand::ModsDisable(required_names(rest, "disable")?),
        (Some("mods"), Some("uninstall")) => {
            CliCommand::ModsUninstall(required_names(rest, "uninstall")?)
        }
        (Some("mods"), Some("reconcile")) => CliCommand::ModsReconcile,
        (Some("packs"), None | Some("list")) => CliCommand::PacksList,
        (Some("packs"), Some("create")) => CliCommand::PacksCreate(parse_pack_create(rest)?),
        (Some("packs"), Some("delete")) => CliCommand::PacksDelete(pack_name(rest, "delete")?),
        (Some("packs"), Some("export")) => CliCommand::PacksExport(pack_name(rest, "export")?),
        (Some("packs"), Some("import")) => {
            let code = rest.first().context("packs import requires a pack code")?;
            CliCommand::PacksImport(code.to_string())
        }
        (Some("packs"), Some("activate")) => {
            CliCommand::PacksActivate(pack_name(rest, "activate")?)
        }
        (Some("packs"), Some("deactivate")) => CliCommand::PacksDeactivate,
        (Some("mode"), None | Some("get")) => CliCommand::ModeGet,
        (Some("mode"), Some("vanilla")) => CliCommand::ModeSet { vanilla: true },
        (Some("mode"), Some("modded")) => CliCommand::ModeSet { vanilla: false },
        (Some("api"), None | Some("install")) => CliCommand::ApiInstall,
        (Some("launch"), _) => CliCommand::Launch,
        (Some("paths"), _) => CliCommand::Paths,
        (Some(head), Some(sub)) => bail!("Unknown command: {head} {sub} (see --help)"),
        (Some(head), None) => bail!("Unknown command: {head} (see --help)"),
    };
    Ok(command)
}

fn flag_value(args: &[String], flag: &str) -> Result<Option<String>> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
            return Ok(Some(value.to_string()));
        }
        if arg == flag {
            let value = iter
                .next()
                .with_context(|| format!("{flag} requires a value"))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

/// `a b --with c d` -> (`[a, b]`, `[c, d]`).
fn split_with(args: &[String]) -> (Vec<String>, Vec<String>) {
    match args.iter().position(|arg| arg == "--with") {
        Some(index) => (args[..index].to_vec(), args[index + 1..].to_vec()),
        None => (args.to_vec(), Vec::new()),
    }
}

fn required_names(args: &[String], verb: &str) -> Result<Vec<String>> {
    if args.is_empty() {
        bail!("mods {verb} requires at least one mod name");
    }
    Ok(args.to_vec())
}

fn pack_name(args: &[String], verb: &str) -> Result<String> {
    args.first()
        .cloned()
        .with_context(|| format!("packs {verb} requires a pack name"))
}

fn parse_pack_create(args: &[String]) -> Result<PackCreateOptions> {
    let mut name = None;
    let mut description = String::new();
    let mut author = String::new();
    let mut mods: Option<Vec<String>> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--description" => {
                description = iter.next().context("--description requires a value")?.clone();
            }
            "--author" => {
                author = iter.next().context("--author requires a value")?.clone();
            }
            "--mods" => {
                let list = iter.next().context("--mods requires a comma separated list")?;
                mods = Some(
                    list.split(',')
                        .map(str::trim)
                        .filter(|entry| !entry.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            value if name.is_none() && !value.starts_with("--") => name = Some(value.to_string()),
            value => bail!("Unexpected argument for packs create: {value}"),
        }
    }
    Ok(PackCreateOptions {
        name: name.context("packs create requires a pack name")?,
        description,
        author,
        mods,
    })
}

fn run_command(manager: &ModManager, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::GameGet => {
            let dir = manager.game_directory();
            emit(format, &dir, |dir| match dir {
                Some(dir) => println!("{}", dir.display()),
                None => println!("Game directory not set (use `soulforge game set <dir>`)"),
            })
        }
        CliCommand::GameSet(dir) => {
            let report = manager.select_game_directory(&dir)?;
            emit(format, &report, |report| {
                println!("Game directory set to {}", dir.display());
                if report.changed() {
                    println!(
                        "Reconciled: {} added, {} removed",
                        report.added.len(),
                        report.removed.len()
                    );
                }
            })
        }
        CliCommand::CatalogRefresh => {
            let outcome = manager.refresh_catalog()?;
            emit(format, &outcome, |outcome| {
                if let Some(error) = &outcome.error {
                    println!("Using cached catalog: {error}");
                } else if outcome.updated {
                    println!("Catalog updated");
                } else if outcome.fetched {
                    println!("Catalog unchanged");
                } else {
                    println!("Catalog is fresh");
                }
            })
        }
        CliCommand::CatalogList { filter } => {
            refresh_quietly(manager)?;
            let mods = manager.catalog();
            let needle = filter.map(|filter| filter.to_lowercase());
            let items: Vec<_> = mods
                .iter()
                .filter(|descriptor| match &needle {
                    Some(needle) => {
                        descriptor.name.to_lowercase().contains(needle)
                            || descriptor.description.to_lowercase().contains(needle)
                    }
                    None => true,
                })
                .collect();
            emit(format, &items, |items| {
                for item in items {
                    println!("{:<32} {:<12} {}", item.name, item.version, item.description);
                }
            })
        }
        CliCommand::CatalogOutdated => {
            refresh_quietly(manager)?;
            let outdated = manager.outdated_mods()?;
            emit(format, &outdated, |outdated| {
                if outdated.is_empty() {
                    println!("All installed mods match the catalog");
                }
                for item in outdated {
                    println!("{:<32} {} -> {}", item.name, item.installed, item.available);
                }
            })
        }
        CliCommand::ModsList => {
            let ledger = manager.installed_mods()?;
            emit(format, &ledger, |ledger| {
                for (name, record) in ledger.mods() {
                    let enabled = if record.enabled { "x" } else { " " };
                    println!("[{enabled}] {name:<32} {}", record.version);
                }
            })
        }
        CliCommand::ModsDir => {
            let dir = manager.ensure_mods_dir()?;
            emit(format, &dir, |dir| println!("{}", dir.display()))
        }
        CliCommand::ModsInstall(name) => {
            refresh_quietly(manager)?;
            let outcome = manager.install_from_catalog(&name)?;
            emit(format, &outcome, |outcome| {
                for skipped in &outcome.skipped {
                    println!("Already installed: {skipped}");
                }
                for installed in &outcome.installed {
                    println!("Installed: {installed}");
                }
            })
        }
        CliCommand::ModsEnable { names, with } => {
            if let [name] = names.as_slice() {
                manager.set_enabled(name, true, &with)?;
                emit(format, &name, |name| println!("Enabled {name}"))
            } else {
                let mut changes: Vec<Toggle> =
                    names.iter().map(|name| Toggle::new(name, true)).collect();
                changes.extend(with.iter().map(|name| Toggle::new(name, true)));
                let report = manager.batch_set_enabled(&changes)?;
                emit_batch(format, &report, "enabled")
            }
        }
        CliCommand::ModsDisable(names) => {
            let changes: Vec<Toggle> = names.iter().map(|name| Toggle::new(name, false)).collect();
            let report = manager.batch_set_enabled(&changes)?;
            emit_batch(format, &report, "disabled")
        }
        CliCommand::ModsUninstall(names) => {
            let report = manager.batch_uninstall(&names)?;
            emit_batch(format, &report, "uninstalled")
        }
        CliCommand::ModsReconcile => {
            let report = manager.reconcile()?;
            emit(format, &report, |report| {
                for name in &report.added {
                    println!("Adopted untracked folder: {name}");
                }
                for name in &report.removed {
                    println!("Dropped missing mod: {name}");
                }
                if let Some(pack) = &report.pack_cleared {
                    println!("Deactivated pack: {pack}");
                }
                if !report.changed() {
                    println!("Nothing to reconcile");
                }
            })
        }
        CliCommand::PacksList => {
            let registry = manager.packs()?;
            emit(format, &registry, |registry| {
                for (name, pack) in &registry.packs {
                    let marker = if registry.active_pack.as_deref() == Some(name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {name} ({} mods) {}", pack.mods.len(), pack.description);
                }
            })
        }
        CliCommand::PacksCreate(options) => {
            let pack = manager.create_pack(
                &options.name,
                &options.description,
                &options.author,
                options.mods,
            )?;
            emit(format, &pack, |pack| {
                println!("Created pack {} with {} mods", pack.name, pack.mods.len())
            })
        }
        CliCommand::PacksDelete(name) => {
            manager.delete_pack(&name)?;
            emit(format, &name, |name| println!("Deleted pack {name}"))
        }
        CliCommand::PacksExport(name) => {
            let code = manager.export_pack(&name)?;
            emit(format, &code, |code| println!("{code}"))
        }
        CliCommand::PacksImport(code) => {
            let pack = manager.import_pack(&code)?;
            emit(format, &pack, |pack| {
                println!("Imported pack {} with {} mods", pack.name, pack.mods.len())
            })
        }
        CliCommand::PacksActivate(name) => {
            manager.set_active_pack(Some(&name))?;
            emit(format, &name, |name| println!("Activated pack {name}"))
        }
        CliCommand::PacksDeactivate => {
            manager.set_active_pack(None)?;
            emit(format, &(), |_| println!("No active pack"))
        }
        CliCommand::ModeGet => {
            #[derive(Serialize)]
            struct ModeItem {
                vanilla: bool,
                assembly: Option<String>,
            }
            let item = ModeItem {
                vanilla: manager.vanilla_mode(),
                assembly: manager
                    .assembly_state()
                    .ok()
                    .map(|state| state.to_string()),
            };
            emit(format, &item, |item| {
                let mode = if item.vanilla { "vanilla" } else { "modded" };
                match &item.assembly {
                    Some(assembly) => println!("Mode: {mode} (assembly: {assembly})"),
                    None => println!("Mode: {mode}"),
                }
            })
        }
        CliCommand::ModeSet { vanilla } => {
            let outcome = manager.set_vanilla_mode(vanilla)?;
            emit(format, &outcome, |outcome| match outcome {
                Some(outcome) if outcome.renamed > 0 => {
                    println!("Assembly switched from {} to {}", outcome.from, outcome.to)
                }
                Some(outcome) => println!("Assembly unchanged ({})", outcome.to),
                None => println!("Mode saved; no game directory selected"),
            })
        }
        CliCommand::ApiInstall => {
            let outcome = manager.install_api()?;
            emit(format, &outcome, |outcome| match &outcome.version {
                Some(version) => println!("Modding API {version} installed"),
                None => println!("Modding API already installed"),
            })
        }
        CliCommand::Launch => {
            let report = manager.launch()?;
            emit(format, &report, |report| {
                println!(
                    "Launched ({:?}), assembly {}, {} mods active",
                    report.method, report.assembly, report.mods_copied
                )
            })
        }
        CliCommand::Paths => {
            #[derive(Serialize)]
            struct PathsItem {
                data_dir: PathBuf,
                game_root: Option<PathBuf>,
                managed_dir: Option<PathBuf>,
                mods_cache_dir: Option<PathBuf>,
                active_mods_dir: Option<PathBuf>,
            }
            let paths = manager.game_paths().ok();
            let item = PathsItem {
                data_dir: manager.data_dir().to_path_buf(),
                game_root: paths.as_ref().map(|paths| paths.game_root.clone()),
                managed_dir: paths.as_ref().map(|paths| paths.managed_dir.clone()),
                mods_cache_dir: paths.as_ref().map(|paths| paths.mods_cache_dir.clone()),
                active_mods_dir: paths.as_ref().map(|paths| paths.active_mods_dir.clone()),
            };
            emit(format, &item, |item| {
                println!("data:        {}", item.data_dir.display());
                for (label, path) in [
                    ("game:", &item.game_root),
                    ("managed:", &item.managed_dir),
                    ("mods cache:", &item.mods_cache_dir),
                    ("active mods:", &item.active_mods_dir),
                ] {
                    match path {
                        Some(path) => println!("{label:<12} {}", path.display()),
                        None => println!("{label:<12} -"),
                    }
                }
            })
        }
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

/// Runs the time-gated refresh; a stale cache is fine for listing.
fn refresh_quietly(manager: &ModManager) -> Result<()> {
    let outcome = manager.refresh_catalog().context("refresh mod catalog")?;
    if let Some(error) = outcome.error {
        eprintln!("Warning: using cached catalog ({error})");
    }
    Ok(())
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

fn emit_batch(format: OutputFormat, report: &BatchReport, verb: &str) -> Result<()> {
    emit(format, report, |report| {
        println!("{} {verb}, {} failed", report.succeeded, report.failed);
        for error in &report.errors {
            println!("  {}: {}", error.name, error.error);
        }
        if let Some(pack) = &report.pack_cleared {
            println!("Deactivated pack: {pack}");
        }
    })
}

fn print_help() {
    println!("Soulforge v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  soulforge game get|set <dir>                 Show or select the game directory");
    println!("  soulforge catalog refresh                    Refresh the mod catalog");
    println!("  soulforge catalog list [--filter <text>]     List catalog mods");
    println!("  soulforge catalog outdated                   Installed mods with a new version");
    println!("  soulforge mods list                          List installed mods");
    println!("  soulforge mods dir                           Create and print the mods folder");
    println!("  soulforge mods install <name>                Install a mod and its dependencies");
    println!("  soulforge mods enable <names..> [--with <deps..>]");
    println!("  soulforge mods disable <names..>");
    println!("  soulforge mods uninstall <names..>");
    println!("  soulforge mods reconcile                     Sync the ledger with the mods folder");
    println!("  soulforge packs list");
    println!("  soulforge packs create <name> [--description <text>] [--author <name>] [--mods a,b]");
    println!("  soulforge packs delete|export|activate <name>");
    println!("  soulforge packs import <code>");
    println!("  soulforge packs deactivate");
    println!("  soulforge mode get|vanilla|modded            Show or switch the game assembly");
    println!("  soulforge api install                        Reinstall the modding API");
    println!("  soulforge launch                             Prepare and launch the game");
    println!("  soulforge paths                              Show detected paths");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                         Output format");
    println!("  -h, --help                                   Show help");
    println!("  -V, --version                                Show version");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn format_flag_is_stripped_anywhere() {
        let (format, tokens) = parse_global_options(&args(&["mods", "--format", "json", "list"]));
        assert!(format == OutputFormat::Json);
        assert_eq!(tokens, args(&["mods", "list"]));
    }

    #[test]
    fn enable_splits_dependency_list() {
        let command = parse_command(&args(&["mods", "enable", "Addon", "--with", "Core"])).unwrap();
        match command {
            CliCommand::ModsEnable { names, with } => {
                assert_eq!(names, args(&["Addon"]));
                assert_eq!(with, args(&["Core"]));
            }
            _ => panic!("expected mods enable"),
        }
    }

    #[test]
    fn pack_create_options() {
        let command = parse_command(&args(&[
            "packs", "create", "Speed", "--author", "me", "--mods", "A, B",
        ]))
        .unwrap();
        match command {
            CliCommand::PacksCreate(options) => {
                assert_eq!(options.name, "Speed");
                assert_eq!(options.author, "me");
                assert_eq!(options.mods, Some(args(&["A", "B"])));
            }
            _ => panic!("expected packs create"),
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_command(&args(&["frobnicate"])).is_err());
        assert!(parse_command(&args(&["mods", "install"])).is_err());
    }
}
