//! Dockhand - Docker Engine installer for Linux hosts
//!
//! Installs Docker Engine from the vendor repository on the machine it runs on.
//! - install: detect the distribution and run the installation steps
//! - uninstall: stop the engine and remove its packages
//! - show: print the steps as a bash script or cloud-init user-data
//! - detect: print what this host resolves to

mod config;
mod progress;
mod prompt;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::{env, io};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use console::{Emoji, style};
use dockhand_provision::{
    AuditLog, BashRenderer, Channel, CloudInitRenderer, DockerConfig, EffectiveUser,
    ExecutionResult, Executor, FileSink, InstallationProfile, Manifest, OsIdentity, Renderer,
    SystemRunner, resolve,
};
use tracing_subscriber::EnvFilter;

use config::{Overrides, config_path, load_config, resolve_docker_config, resolve_log_file};
use progress::ConsoleSink;
use prompt::{Prompter, Terminal};

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static WHALE: Emoji<'_, '_> = Emoji("🐳 ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");

#[derive(Parser, Debug)]
#[command(name = "dockhand", version, about = "Install Docker Engine on this Linux host")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (global)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show config file path and exit
    #[arg(long)]
    show_config: bool,

    /// More diagnostics on stderr (-v info, -vv debug); RUST_LOG also works
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Read the host identity from this file instead of /etc/os-release
    #[arg(long, global = true, value_name = "PATH")]
    os_release: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install Docker Engine
    Install(InstallArgs),

    /// Remove Docker Engine
    Uninstall(UninstallArgs),

    /// Print the installation steps without running them
    Show(ShowArgs),

    /// Show the detected distribution and installation profile
    Detect,
}

#[derive(Parser, Debug)]
struct InstallArgs {
    /// User to add to the docker group
    #[arg(short, long, conflicts_with = "no_user")]
    user: Option<String>,

    /// Do not add any user to the docker group
    #[arg(long)]
    no_user: bool,

    /// Docker data directory
    #[arg(long, value_name = "DIR")]
    data_root: Option<String>,

    /// Repository channel (stable, test)
    #[arg(long)]
    channel: Option<Channel>,

    /// Per-step time limit in seconds (0 disables it)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Audit log file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Answer yes to every question
    #[arg(short, long)]
    yes: bool,

    /// Show the steps without running them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct UninstallArgs {
    /// Also delete images, containers, volumes and /etc/docker
    #[arg(long)]
    purge: bool,

    /// Audit log file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Answer yes to every question
    #[arg(short, long)]
    yes: bool,

    /// Show the steps without running them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    /// Output format
    #[arg(value_enum)]
    format: OutputFormat,

    /// Show the removal steps instead
    #[arg(long)]
    uninstall: bool,

    /// Plain script without color codes
    #[arg(long)]
    no_color: bool,
}

/// Output format for show command
#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    /// Executable bash script
    Bash,
    /// Cloud-init YAML format
    CloudInit,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Show config path and exit
    if args.show_config {
        let path = args.config.clone().unwrap_or_else(config_path);
        println!("{} Config: {}", FOLDER, path.display());
        if path.exists() {
            println!("  {CHECK} exists");
        } else {
            println!("  {} not found (will use defaults)", style("!").yellow());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let file_config = load_config(args.config.as_deref())?;
    let identity = || load_identity(args.os_release.as_deref());

    match &args.command {
        Some(Commands::Install(install)) => run_install(install, &file_config, &identity()?),
        Some(Commands::Uninstall(uninstall)) => run_uninstall(uninstall, &file_config, &identity()?),
        Some(Commands::Show(show)) => run_show(show, &file_config, &identity()?),
        Some(Commands::Detect) => Ok(run_detect(&identity()?)),
        None => {
            Args::command().print_help()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Diagnostics go to stderr; `-v` beats `RUST_LOG`, which beats the default
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn load_identity(path: Option<&Path>) -> Result<OsIdentity> {
    let identity = match path {
        Some(path) => OsIdentity::from_file(path)?,
        None => OsIdentity::load().context("Cannot determine the host distribution")?,
    };
    tracing::debug!(?identity, "host identity");
    Ok(identity)
}

fn interactive(yes: bool) -> bool {
    !yes && io::stdin().is_terminal()
}

fn open_audit_log(path: &Path) -> AuditLog {
    let mut log = AuditLog::new().with_sink(ConsoleSink::new());
    match FileSink::open(path) {
        Ok(sink) => log.add_sink(sink),
        Err(e) => {
            tracing::warn!("audit log {} unavailable: {e}", path.display());
            eprintln!(
                "{} Cannot write audit log {}: {e}",
                style("!").yellow(),
                path.display()
            );
        }
    }
    log
}

/// Run install
fn run_install(args: &InstallArgs, config: &config::Config, identity: &OsIdentity) -> Result<ExitCode> {
    let cli = Overrides {
        user: args.user.clone(),
        no_user: args.no_user,
        data_root: args.data_root.clone(),
        channel: args.channel,
        timeout_secs: args.timeout,
        log_file: args.log_file.clone(),
        purge: false,
    };
    let mut docker = resolve_docker_config(&cli, config, env_var)?;
    let interactive = interactive(args.yes);

    if docker.user.is_none() && !args.no_user && interactive && !args.dry_run {
        docker.user = prompt::ask_username(&Terminal, env_var("SUDO_USER").as_deref())?;
    }

    print_banner();
    print_settings_table(identity, &docker);

    if args.dry_run {
        return Ok(print_dry_run(identity, |profile| Manifest::docker_install(profile, &docker)));
    }

    if interactive && !Terminal.confirm("Install Docker Engine on this host?", true)? {
        println!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    let log_path = resolve_log_file(&cli, config, env_var);
    let mut log = open_audit_log(&log_path);
    log.info(format!(
        "dockhand {} install on {}",
        env!("CARGO_PKG_VERSION"),
        identity.display_name()
    ));

    println!("\n{WHALE} Installing Docker Engine...\n");
    let runner = SystemRunner::new();
    let result = Executor::new(&runner, &mut log).provision(&EffectiveUser, identity, |profile| {
        Manifest::docker_install(profile, &docker)
    });
    log.close();

    print_summary("Install", &result, &log_path);
    if result.succeeded {
        print_next_steps(&docker);
    }
    Ok(exit_code(&result))
}

/// Run uninstall
fn run_uninstall(
    args: &UninstallArgs,
    config: &config::Config,
    identity: &OsIdentity,
) -> Result<ExitCode> {
    let cli = Overrides {
        no_user: true,
        log_file: args.log_file.clone(),
        purge: args.purge,
        ..Default::default()
    };
    let docker = resolve_docker_config(&cli, config, env_var)?;

    print_banner();
    print_settings_table(identity, &docker);

    if args.dry_run {
        return Ok(print_dry_run(identity, |profile| Manifest::docker_uninstall(profile, &docker)));
    }

    if interactive(args.yes) {
        let question = if args.purge {
            format!(
                "Remove Docker Engine and delete {}, /var/lib/containerd and /etc/docker?",
                docker.data_root
            )
        } else {
            "Remove Docker Engine from this host? (images and volumes are kept)".to_string()
        };
        if !Terminal.confirm(&question, false)? {
            println!("Aborted.");
            return Ok(ExitCode::SUCCESS);
        }
    } else if !args.yes {
        bail!("Refusing to uninstall without --yes when not running interactively");
    }

    let log_path = resolve_log_file(&cli, config, env_var);
    let mut log = open_audit_log(&log_path);
    log.info(format!(
        "dockhand {} uninstall on {}",
        env!("CARGO_PKG_VERSION"),
        identity.display_name()
    ));

    println!("\n{WHALE} Removing Docker Engine...\n");
    let runner = SystemRunner::new();
    let result = Executor::new(&runner, &mut log).provision(&EffectiveUser, identity, |profile| {
        Manifest::docker_uninstall(profile, &docker)
    });
    log.close();

    print_summary("Uninstall", &result, &log_path);
    Ok(exit_code(&result))
}

/// Run show command
fn run_show(args: &ShowArgs, config: &config::Config, identity: &OsIdentity) -> Result<ExitCode> {
    let docker = resolve_docker_config(&Overrides::default(), config, env_var)?;
    let profile = resolve(identity)?;

    let manifest = if args.uninstall {
        Manifest::docker_uninstall(&profile, &docker)?
    } else {
        Manifest::docker_install(&profile, &docker)?
    };

    match args.format {
        OutputFormat::CloudInit => {
            let yaml = CloudInitRenderer::new()
                .render(&manifest)
                .context("Failed to render cloud-init")?;
            println!("{yaml}");
        }
        OutputFormat::Bash => {
            let renderer = BashRenderer::new().verbose(true).color(!args.no_color);
            let script = match renderer.render(&manifest) {
                Ok(script) => script,
                Err(never) => match never {},
            };
            println!("{script}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Run detect command
fn run_detect(identity: &OsIdentity) -> ExitCode {
    println!("\n{LOOKING_GLASS} Host\n");
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.add_row(vec![Cell::new("Name").fg(Color::Cyan), Cell::new(identity.display_name())]);
    table.add_row(vec![Cell::new("ID").fg(Color::Cyan), Cell::new(&identity.id)]);
    table.add_row(vec![
        Cell::new("ID_LIKE").fg(Color::Cyan),
        Cell::new(identity.id_like.join(" ")),
    ]);
    table.add_row(vec![
        Cell::new("Codename").fg(Color::Cyan),
        Cell::new(identity.version_codename.as_deref().unwrap_or("-")),
    ]);
    println!("{table}");

    match resolve(identity) {
        Ok(profile) => {
            print_profile_table(&profile);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\n{CROSS} {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_profile_table(profile: &InstallationProfile) {
    println!("\n{} Installation profile\n", style("▸").blue().bold());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.add_row(vec!["Distribution", &profile.distro.to_string()]);
    table.add_row(vec!["Codename", profile.codename.as_deref().unwrap_or("-")]);
    table.add_row(vec!["Package manager", &format!("{:?}", profile.family())]);
    table.add_row(vec!["Init system", &format!("{:?}", profile.service_manager())]);
    table.add_row(vec!["Packages", &profile.docker_packages().join(" ")]);
    table.add_row(vec![
        "Repository",
        profile.repository_url().as_deref().unwrap_or("distribution"),
    ]);
    table.add_row(vec![
        "Install commands",
        &profile.install_commands(Channel::default()).join("\n"),
    ]);
    println!("{table}");
}

fn print_banner() {
    println!();
    println!("{}", style("╔═══════════════════════════════════════╗").cyan().bold());
    println!("{}", style("║        DOCKHAND DOCKER INSTALLER      ║").cyan().bold());
    println!("{}", style("╚═══════════════════════════════════════╝").cyan().bold());
}

fn print_settings_table(identity: &OsIdentity, docker: &DockerConfig) {
    println!("\n{} Configuration\n", style("▸").blue().bold());

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("Setting").fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    table.add_row(vec!["Host", identity.display_name()]);
    table.add_row(vec!["Channel", docker.channel.as_str()]);
    table.add_row(vec!["Data root", &docker.data_root]);
    table.add_row(vec![
        "Logging",
        &format!("json-file, {} x {}", docker.log_max_file, docker.log_max_size),
    ]);
    table.add_row(vec!["docker group", docker.user.as_deref().unwrap_or("-")]);
    table.add_row(vec![
        "Step limit",
        &docker
            .step_timeout
            .map_or_else(|| "none".to_string(), |t| format!("{}s", t.as_secs())),
    ]);
    println!("{table}");
}

/// Print the manifest the run would execute
fn print_dry_run<F>(identity: &OsIdentity, plan: F) -> ExitCode
where
    F: FnOnce(&InstallationProfile) -> Result<Manifest, dockhand_provision::ProvisionError>,
{
    let manifest = match resolve(identity).and_then(|profile| plan(&profile)) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("\n{CROSS} {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("\n{} Dry run - {} steps, nothing executed\n", style("i").cyan(), manifest.len());
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        Cell::new("#").fg(Color::Cyan),
        Cell::new("Step").fg(Color::Cyan),
        Cell::new("On failure").fg(Color::Cyan),
    ]);
    for (i, planned) in manifest.steps.iter().enumerate() {
        let policy = if planned.is_required() {
            Cell::new("stop").fg(Color::Red)
        } else {
            Cell::new("continue").fg(Color::Yellow)
        };
        table.add_row(vec![Cell::new(i + 1), Cell::new(planned.description()), policy]);
    }
    println!("{table}");
    ExitCode::SUCCESS
}

fn print_summary(operation: &str, result: &ExecutionResult, log_path: &Path) {
    println!();
    let (outcome, color) = if result.succeeded {
        ("succeeded", Color::Green)
    } else {
        ("failed", Color::Red)
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.add_row(vec![
        Cell::new(operation).fg(Color::Cyan),
        Cell::new(outcome).fg(color),
    ]);
    table.add_row(vec![
        Cell::new("Steps run").fg(Color::Cyan),
        Cell::new(result.attempted),
    ]);
    table.add_row(vec![
        Cell::new("Already done").fg(Color::Cyan),
        Cell::new(result.skipped),
    ]);
    table.add_row(vec![
        Cell::new("Optional failures").fg(Color::Cyan),
        Cell::new(result.error_count),
    ]);
    if let Some(failure) = &result.failure {
        let reason = failure.to_string();
        table.add_row(vec![
            Cell::new("Reason").fg(Color::Cyan),
            Cell::new(reason.lines().next().unwrap_or_default()).fg(Color::Red),
        ]);
    }
    table.add_row(vec![
        Cell::new("Audit log").fg(Color::Cyan),
        Cell::new(log_path.display()),
    ]);
    println!("{table}");

    for warning in &result.warnings {
        let text = warning.to_string();
        println!(
            "  {} {}",
            style("!").yellow(),
            text.lines().next().unwrap_or_default()
        );
    }

    if !result.succeeded && result.attempted > 0 {
        println!();
        println!(
            "{} Completed steps are not rolled back. Fix the cause and run again;",
            style("!").yellow()
        );
        println!("  steps that are already done will be skipped.");
    }
}

fn print_next_steps(docker: &DockerConfig) {
    println!();
    if let Some(user) = &docker.user {
        println!(
            "{SPARKLE} Docker is ready. {user} must log out and back in (or run {}) to use it without sudo.",
            style("newgrp docker").cyan()
        );
    } else {
        println!("{SPARKLE} Docker is ready.");
    }
}

fn exit_code(result: &ExecutionResult) -> ExitCode {
    if result.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_install_flags() {
        let args = Args::try_parse_from([
            "dockhand",
            "install",
            "--user",
            "chi",
            "--channel",
            "test",
            "--timeout",
            "60",
            "-y",
            "--dry-run",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.verbose, 2);
        let Some(Commands::Install(install)) = args.command else {
            panic!("expected install");
        };
        assert_eq!(install.user.as_deref(), Some("chi"));
        assert_eq!(install.channel, Some(Channel::Test));
        assert_eq!(install.timeout, Some(60));
        assert!(install.yes && install.dry_run);
    }

    #[test]
    fn test_user_conflicts_with_no_user() {
        assert!(Args::try_parse_from(["dockhand", "install", "--user", "chi", "--no-user"]).is_err());
    }

    #[test]
    fn test_cli_parses_show_and_globals() {
        let args = Args::try_parse_from([
            "dockhand",
            "show",
            "cloud-init",
            "--uninstall",
            "--os-release",
            "/tmp/os-release",
        ])
        .unwrap();

        assert_eq!(args.os_release.as_deref(), Some(Path::new("/tmp/os-release")));
        let Some(Commands::Show(show)) = args.command else {
            panic!("expected show");
        };
        assert!(matches!(show.format, OutputFormat::CloudInit));
        assert!(show.uninstall);
    }

    #[test]
    fn test_load_identity_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("os-release");
        std::fs::write(&path, "ID=debian\nVERSION_CODENAME=bookworm\n").unwrap();

        let identity = load_identity(Some(&path)).unwrap();
        assert_eq!(identity.id, "debian");
        assert!(load_identity(Some(&dir.path().join("missing"))).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }
}
