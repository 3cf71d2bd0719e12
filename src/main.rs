mod auth;
mod client;
mod config;
mod descriptor;
mod discovery;
mod launcher;
mod model;
mod process_tree;
mod repository;
mod runner;
mod setup;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use config::{
    config_dir_from_path, ensure_parent, expand_path, load_config_or_default,
    mark_setup_complete, read_config, resolve_config_path, BridgeMode, ConfigError, Settings,
    DEFAULT_CONFIG_YAML,
};
use descriptor::BridgeInfo;
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use discovery::{BridgeChooser, Discovery, DiscoveryError};
use model::{Task, Workspace};
use repository::{JsonRepository, RepositoryError, TaskCatalog};
use runner::{open_runner, RunnerError};
use setup::{ExtensionInstaller, SetupError, BRIDGE_EXTENSION_ID, BRIDGE_EXTENSION_URL};
use serde::Serialize;
use serde_json::json;
use std::env;
use std::fs;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "VSTR_LOG";

#[derive(Parser, Debug)]
#[command(name = "vstr", version, about = "Run task terminals inside your editor")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true, value_enum)]
    mode: Option<BridgeMode>,
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommand,
    },
    /// Shortcut for `task run`.
    Run { name: String },
    Bridge {
        #[command(subcommand)]
        command: BridgeCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Check that the bridge extension is installed and offer to install it.
    Setup {
        /// Install without asking.
        #[arg(long)]
        yes: bool,
        /// Run again even when setup already completed.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    Run {
        name: String,
    },
    Create {
        #[arg(long, required_unless_present = "file", conflicts_with = "file")]
        name: Option<String>,
        #[arg(long, requires = "name")]
        path: Option<String>,
        #[arg(long = "cmd", requires = "name")]
        cmds: Vec<String>,
        #[arg(long, default_value = "terminal")]
        icon: String,
        #[arg(long, default_value = "terminal.ansiWhite")]
        icon_color: String,
        /// JSON array of tasks to import in one go.
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    Edit {
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long = "cmd")]
        cmds: Vec<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        icon_color: Option<String>,
    },
    List {
        #[arg(long, short = 'n')]
        only_names: bool,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    Run {
        name: String,
        /// Launch through the editor CLI instead of a bridge.
        #[arg(long)]
        local: bool,
        #[arg(long)]
        parallel: bool,
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    Create {
        name: String,
        #[arg(long = "task", required = true)]
        tasks: Vec<String>,
    },
    List,
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum BridgeCommand {
    List,
    Status,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Edit,
    Validate,
    Path,
}

#[derive(Debug, Error)]
enum VstrError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("process error: {0}")]
    Process(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ErrorDetails {
    error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl VstrError {
    fn details(&self) -> ErrorDetails {
        let (code, hint) = match self {
            VstrError::Config(_) => ("config_error", Some("Run `vstr config validate` to see what is wrong.")),
            VstrError::Io(_) => ("io_error", None),
            VstrError::Json(_) => ("json_error", None),
            VstrError::Repository(_) => ("repository_error", Some("Check the tasks and workspaces files.")),
            VstrError::Discovery(err) => (err.error_code(), Some(err.hint())),
            VstrError::Runner(err) => (err.error_code(), err.hint()),
            VstrError::Setup(err) => (err.error_code(), Some(err.hint())),
            VstrError::Prompt(_) => ("prompt_failed", None),
            VstrError::Invalid(_) => ("invalid_input", None),
            VstrError::Process(_) => ("process_error", None),
        };
        ErrorDetails {
            error_code: code.to_string(),
            hint: hint.map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ErrorDetails>,
}

#[derive(Debug)]
struct Context {
    config_path: PathBuf,
    json: bool,
    mode: Option<BridgeMode>,
}

/// Numbered prompt on stderr, so `--json` output on stdout stays parseable.
struct PromptChooser;

impl BridgeChooser for PromptChooser {
    fn choose(&self, bridges: &[BridgeInfo]) -> Result<String, DiscoveryError> {
        if !io::stdin().is_terminal() {
            return Err(DiscoveryError::Prompt(format!(
                "{} bridges are running and stdin is not a terminal",
                bridges.len()
            )));
        }
        eprintln!("{}", style("Multiple bridges are running:").bold());
        for (idx, bridge) in bridges.iter().enumerate() {
            eprintln!(
                "  {}. {} (port {}) {}",
                idx + 1,
                bridge.display_name(),
                bridge.port,
                style(&bridge.workspace_path).dim()
            );
        }
        Input::<String>::new()
            .with_prompt(format!("Select a bridge [1-{}]", bridges.len()))
            .interact_text()
            .map_err(|err| DiscoveryError::Prompt(err.to_string()))
    }
}

fn main() -> Result<(), VstrError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let ctx = build_context(&cli);

    let result = match cli.command {
        Commands::Task { command } => handle_task(&ctx, command),
        Commands::Workspace { command } => handle_workspace(&ctx, command),
        Commands::Run { name } => handle_run_task(&ctx, &name),
        Commands::Bridge { command } => handle_bridge(&ctx, command),
        Commands::Config { command } => handle_config(&ctx, command),
        Commands::Setup { yes, force } => handle_setup(&ctx, yes, force),
    };

    if let Err(err) = result {
        let details = err.details();
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                error_details: Some(details),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{} {err}", style("error:").red().bold());
            if let Some(hint) = details.hint {
                eprintln!("{} {hint}", style("hint:").yellow());
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        json: cli.json,
        mode: cli.mode,
    }
}

fn load_settings(ctx: &Context) -> Result<Settings, VstrError> {
    let cfg = load_config_or_default(&ctx.config_path)?;
    let mut settings = Settings::resolve(&cfg, &config_dir_from_path(&ctx.config_path));
    if let Some(mode) = ctx.mode {
        settings.mode = mode;
    }
    tracing::debug!(
        config = %ctx.config_path.display(),
        mode = settings.mode.as_str(),
        bridge_dir = %settings.discovery.bridge_dir.display(),
        "resolved settings"
    );
    Ok(settings)
}

fn open_repository(settings: &Settings) -> JsonRepository {
    JsonRepository::new(settings.tasks_file.clone(), settings.workspaces_file.clone())
}

fn handle_task(ctx: &Context, command: TaskCommand) -> Result<(), VstrError> {
    match command {
        TaskCommand::Run { name } => handle_run_task(ctx, &name),
        TaskCommand::Create {
            name,
            path,
            cmds,
            icon,
            icon_color,
            file,
        } => {
            let repo = open_repository(&load_settings(ctx)?);
            if let Some(file) = file {
                let count = repo.import_tasks(&file)?;
                return report(
                    ctx,
                    json!({"imported": count, "tasks_file": repo.tasks_file()}),
                    &format!("Imported {count} task(s) from {}", file.display()),
                );
            }
            let name = name.unwrap_or_default();
            let task = Task {
                name: name.trim().to_string(),
                path: resolve_task_path(path.as_deref().unwrap_or("."))?,
                cmds,
                icon,
                icon_color,
            };
            reject_problems(&task)?;
            repo.save_task(task.clone())?;
            report(
                ctx,
                serde_json::to_value(&task)?,
                &format!("Task '{}' created", task.name),
            )
        }
        TaskCommand::Edit {
            name,
            new_name,
            path,
            cmds,
            icon,
            icon_color,
        } => {
            let repo = open_repository(&load_settings(ctx)?);
            let mut task = repo.find_task(&name)?.ok_or_else(|| RepositoryError::NotFound {
                kind: "task",
                name: name.clone(),
            })?;
            if let Some(new_name) = new_name {
                task.name = new_name.trim().to_string();
            }
            if let Some(path) = path {
                task.path = resolve_task_path(&path)?;
            }
            if !cmds.is_empty() {
                task.cmds = cmds;
            }
            if let Some(icon) = icon {
                task.icon = icon;
            }
            if let Some(icon_color) = icon_color {
                task.icon_color = icon_color;
            }
            reject_problems(&task)?;
            repo.update_task(&name, task.clone())?;
            report(
                ctx,
                serde_json::to_value(&task)?,
                &format!("Task '{}' updated", task.name),
            )
        }
        TaskCommand::List { only_names } => {
            let repo = open_repository(&load_settings(ctx)?);
            let tasks = repo.list_tasks()?;
            if ctx.json {
                let payload = if only_names {
                    json!(tasks.iter().map(|task| &task.name).collect::<Vec<_>>())
                } else {
                    serde_json::to_value(&tasks)?
                };
                return output(ctx, payload);
            }
            print_tasks(&tasks, only_names);
            Ok(())
        }
        TaskCommand::Delete { name } => {
            let repo = open_repository(&load_settings(ctx)?);
            repo.delete_task(&name)?;
            report(ctx, json!({"deleted": name}), &format!("Task '{name}' deleted"))
        }
    }
}

fn handle_workspace(ctx: &Context, command: WorkspaceCommand) -> Result<(), VstrError> {
    match command {
        WorkspaceCommand::Run {
            name,
            local,
            parallel,
            delay_ms,
        } => {
            let mut settings = load_settings(ctx)?;
            if local {
                settings.mode = BridgeMode::Local;
            }
            if parallel {
                settings.launch.parallel = true;
            }
            if let Some(delay_ms) = delay_ms {
                settings.launch.delay = Duration::from_millis(delay_ms);
            }
            let repo = open_repository(&settings);
            let runner = open_runner(&settings, &repo, &PromptChooser, !ctx.json)?;
            let summary = runner.run_workspace(&name)?;
            report(
                ctx,
                serde_json::to_value(&summary)?,
                &format!(
                    "Workspace '{}' launched ({} terminal(s))",
                    summary.name,
                    summary.tasks.len()
                ),
            )
        }
        WorkspaceCommand::Create { name, tasks } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(VstrError::Invalid("workspace name is required".to_string()));
            }
            let repo = open_repository(&load_settings(ctx)?);
            let mut members = Vec::with_capacity(tasks.len());
            for task_name in &tasks {
                let task = repo.find_task(task_name)?.ok_or_else(|| RepositoryError::NotFound {
                    kind: "task",
                    name: task_name.clone(),
                })?;
                members.push(task);
            }
            let workspace = Workspace {
                name,
                tasks: members,
            };
            repo.save_workspace(workspace.clone())?;
            report(
                ctx,
                serde_json::to_value(&workspace)?,
                &format!(
                    "Workspace '{}' created with {} task(s)",
                    workspace.name,
                    workspace.tasks.len()
                ),
            )
        }
        WorkspaceCommand::List => {
            let repo = open_repository(&load_settings(ctx)?);
            let workspaces = repo.list_workspaces()?;
            if ctx.json {
                return output(ctx, serde_json::to_value(&workspaces)?);
            }
            if workspaces.is_empty() {
                println!("No workspaces found.");
            }
            for workspace in &workspaces {
                let names: Vec<&str> = workspace.tasks.iter().map(|t| t.name.as_str()).collect();
                println!("{}  {}", style(&workspace.name).bold(), style(names.join(", ")).dim());
            }
            Ok(())
        }
        WorkspaceCommand::Delete { name } => {
            let repo = open_repository(&load_settings(ctx)?);
            repo.delete_workspace(&name)?;
            report(ctx, json!({"deleted": name}), &format!("Workspace '{name}' deleted"))
        }
    }
}

fn handle_run_task(ctx: &Context, name: &str) -> Result<(), VstrError> {
    let settings = load_settings(ctx)?;
    let repo = open_repository(&settings);
    let runner = open_runner(&settings, &repo, &PromptChooser, !ctx.json)?;
    let summary = runner.run_task(name)?;
    report(
        ctx,
        serde_json::to_value(&summary)?,
        &format!("Task '{}' launched", summary.name),
    )
}

fn handle_bridge(ctx: &Context, command: BridgeCommand) -> Result<(), VstrError> {
    let settings = load_settings(ctx)?;
    let discovery = Discovery::new(settings.discovery.clone());
    match command {
        BridgeCommand::List => {
            let bridges = discovery.list_available_bridges()?;
            if ctx.json {
                let rows: Vec<_> = bridges.iter().map(bridge_json).collect();
                return output(ctx, json!(rows));
            }
            if bridges.is_empty() {
                println!("No running bridges found in {}", discovery.bridge_dir().display());
            }
            for bridge in &bridges {
                println!(
                    "{:>5}  {}  {}  {}",
                    bridge.port,
                    style(bridge.display_name()).bold(),
                    style(&bridge.workspace_path).dim(),
                    if bridge.secure { "secure" } else { "legacy" }
                );
            }
            Ok(())
        }
        BridgeCommand::Status => {
            let dir = discovery.bridge_dir().to_path_buf();
            let secure = discovery.discover_secure_bridge();
            let live = discovery.list_available_bridges()?.len();
            let payload = json!({
                "bridge_dir": dir,
                "bridge_dir_exists": dir.is_dir(),
                "mode": settings.mode.as_str(),
                "live_bridges": live,
                "secure_bridge": secure.as_ref().ok().map(bridge_json),
                "secure_error": secure.as_ref().err().map(|err| err.to_string()),
            });
            if ctx.json {
                return output(ctx, payload);
            }
            println!("{} {}", style("Bridge directory:").bold(), dir.display());
            println!("{} {}", style("Mode:").bold(), settings.mode.as_str());
            println!("{} {live}", style("Live bridges:").bold());
            match secure {
                Ok(bridge) => println!(
                    "{} {} on port {} (instance {})",
                    style("Secure bridge:").bold(),
                    bridge.display_name(),
                    bridge.port,
                    bridge.instance_id
                ),
                Err(err) => {
                    println!("{} {}", style("Secure bridge:").bold(), style(&err).red());
                    println!("  {}", style(err.hint()).dim());
                }
            }
            Ok(())
        }
    }
}

fn bridge_json(bridge: &BridgeInfo) -> serde_json::Value {
    json!({
        "port": bridge.port,
        "pid": bridge.pid,
        "instance_id": bridge.instance_id,
        "workspace_name": bridge.workspace_name,
        "workspace_path": bridge.workspace_path,
        "timestamp": bridge.timestamp,
        "secure": bridge.secure,
    })
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), VstrError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            ensure_parent(&ctx.config_path)?;
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Edit => {
            if !ctx.config_path.exists() {
                ensure_parent(&ctx.config_path)?;
                fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            }
            let editor = env::var("VISUAL").ok().or_else(|| env::var("EDITOR").ok());
            let Some(editor) = editor else {
                return Err(VstrError::Process(
                    "EDITOR is not set; please edit the config file manually".to_string(),
                ));
            };
            let status = Command::new(editor)
                .arg(&ctx.config_path)
                .status()
                .map_err(|err| VstrError::Process(format!("failed to launch editor: {err}")))?;
            if !status.success() {
                return Err(VstrError::Process("editor exited with error".to_string()));
            }
            output(ctx, json!({"path": ctx.config_path}))
        }
        ConfigCommand::Validate => {
            let _cfg = read_config(&ctx.config_path)?;
            output(ctx, json!({"path": ctx.config_path, "valid": true}))
        }
        ConfigCommand::Path => output(ctx, json!({"path": ctx.config_path})),
    }
}

fn handle_setup(ctx: &Context, yes: bool, force: bool) -> Result<(), VstrError> {
    let cfg = load_config_or_default(&ctx.config_path)?;
    if cfg.setup_complete && !force {
        return report(
            ctx,
            json!({"setup_complete": true, "changed": false}),
            "Setup already completed (use --force to run it again)",
        );
    }
    if !yes && (ctx.json || !io::stdin().is_terminal()) {
        return Err(VstrError::Process(
            "interactive setup requires a TTY; re-run with `vstr setup --yes`".to_string(),
        ));
    }

    let settings = Settings::resolve(&cfg, &config_dir_from_path(&ctx.config_path));
    let installer = ExtensionInstaller::resolve(settings.launch.editor_command.as_deref())?;
    let already_installed = installer.is_installed()?;
    if already_installed {
        if !ctx.json {
            println!("{} bridge extension is already installed", style("✓").green().bold());
        }
    } else {
        if !yes {
            println!("{}", style("Extension required").yellow().bold());
            println!("vstr talks to the editor through the {BRIDGE_EXTENSION_ID} extension.");
            println!("  {} {}", style("Manual install:").dim(), BRIDGE_EXTENSION_URL);
            let install = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Install the bridge extension now?")
                .default(true)
                .interact()?;
            if !install {
                println!(
                    "{} the bridge extension is required; run `vstr setup` again when ready",
                    style("!").yellow().bold()
                );
                return Ok(());
            }
        }
        let output = installer.install()?;
        tracing::debug!(%output, "bridge extension installed");
        if !ctx.json {
            println!(
                "{} bridge extension installed; restart the editor to activate it",
                style("✓").green().bold()
            );
        }
    }

    mark_setup_complete(&ctx.config_path)?;
    report(
        ctx,
        json!({
            "setup_complete": true,
            "changed": true,
            "extension": BRIDGE_EXTENSION_ID,
            "installed": !already_installed,
            "editor": installer.command(),
        }),
        "Setup completed",
    )
}

/// Expands `~/`, anchors relative paths at the working directory and
/// requires the result to be an existing directory.
fn resolve_task_path(raw: &str) -> Result<String, VstrError> {
    let expanded = PathBuf::from(expand_path(raw.trim()));
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir()?.join(expanded)
    };
    if !absolute.is_dir() {
        return Err(VstrError::Invalid(format!(
            "path does not exist: {}",
            absolute.display()
        )));
    }
    Ok(normalize(&absolute).to_string_lossy().to_string())
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn reject_problems(task: &Task) -> Result<(), VstrError> {
    let problems = task.problems();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(VstrError::Invalid(problems.join("; ")))
    }
}

fn print_tasks(tasks: &[Task], only_names: bool) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }
    if only_names {
        println!("{}", style("Task Names:").bold());
        for task in tasks {
            println!("- {}", task.name);
        }
        return;
    }
    let home = dirs::home_dir().map(|home| home.to_string_lossy().to_string());
    for task in tasks {
        let path = match &home {
            Some(home) if !home.is_empty() && task.path.starts_with(home.as_str()) => {
                task.path.replacen(home.as_str(), "~", 1)
            }
            _ => task.path.clone(),
        };
        println!(
            "{}  {}  {}  {}",
            style(&task.name).bold(),
            path,
            style(task.cmds.join(", ")).dim(),
            style(format!("{} {}", task.icon, task.icon_color)).dim()
        );
    }
}

/// Success output: the JSON envelope with `--json`, otherwise a one-line
/// message.
fn report(ctx: &Context, payload: serde_json::Value, message: &str) -> Result<(), VstrError> {
    if ctx.json {
        return output(ctx, payload);
    }
    println!("{} {message}", style("✓").green().bold());
    Ok(())
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), VstrError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_details: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), VstrError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
