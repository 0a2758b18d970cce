use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{AppConfig, ConfigManager};
use crate::error::{ConnectionError, ResolutionError};
use crate::models::{normalize_tags, split_list, HostEntry};
use crate::registry::HostRegistry;
use crate::resolver::{resolve_in, OverrideSet};
use crate::session::openssh::OpenSshConnector;
use crate::session::{EntryKind, Session, SessionManager};
use crate::ssh_config::load_ssh_config;
use crate::ssh_service;
use crate::transfer::tree::{self, file_name, Side};
use crate::transfer::{Direction, JobId, JobStatus, ProgressSnapshot, TaskStatus, TransferEngine};

#[derive(Debug, Parser)]
#[command(name = "sshm", version, about = "Manage SSH hosts, connect to them and move files around")]
pub struct Cli {
    /// Log at debug level regardless of the config
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List hosts
    List {
        /// Filter such as `tag:prod user:admin web*`
        #[arg(short, long)]
        filter: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Open an interactive shell. Extra ssh-style flags override the profile
    Connect {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },
    /// Add a host
    Add(HostArgs),
    /// Change fields of an existing host
    Edit(HostArgs),
    /// Remove a host
    #[command(alias = "remove")]
    Rm { name: String },
    /// Rename a host
    Rename { old: String, new: String },
    /// Add or remove tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Import hosts from the SSH config
    Import {
        /// Overwrite hosts that already exist
        #[arg(long)]
        force: bool,
    },
    /// Download a file or directory
    Get {
        name: String,
        remote: String,
        local: Option<String>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Upload a file or directory
    Put {
        name: String,
        local: String,
        remote: Option<String>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Open the file explorer for a host
    Explore {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        overrides: Vec<String>,
    },
    /// Open the interactive host list (default)
    Tui,
}

#[derive(Debug, Args)]
pub struct HostArgs {
    pub name: String,
    /// Address; required for `add`
    pub host: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    #[arg(short, long)]
    pub user: Option<String>,
    #[arg(short, long)]
    pub identity: Option<String>,
    /// Comma separated jump hosts
    #[arg(short = 'J', long)]
    pub jump: Option<String>,
    /// Comma separated tags, replacing the current ones
    #[arg(long)]
    pub tags: Option<String>,
    /// Folder name; an empty value moves the host to the root
    #[arg(long)]
    pub folder: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TagAction {
    Add { name: String, tags: String },
    #[command(alias = "rm")]
    Del { name: String, tags: String },
}

#[derive(Debug, Subcommand)]
pub enum FolderAction {
    Add { name: String },
    Rm { name: String },
    Rename { old: String, new: String },
    List,
}

/// A transfer that did not end `Completed`.
#[derive(Debug, thiserror::Error)]
#[error("job {job} {status}")]
pub struct JobIncomplete {
    pub job: JobId,
    pub status: &'static str,
}

/// Process exit code for an error returned by `run`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<ResolutionError>() {
        return match e {
            ResolutionError::NoMatchingHost(_) | ResolutionError::AmbiguousHost { .. } => 2,
            _ => 3,
        };
    }
    if err.downcast_ref::<ConnectionError>().is_some() {
        return 3;
    }
    if err.downcast_ref::<JobIncomplete>().is_some() {
        return 4;
    }
    1
}

/// Run a non-interactive subcommand.
pub async fn run(command: Command, manager: &ConfigManager, config: &AppConfig) -> Result<()> {
    match command {
        Command::List { filter, folder } => {
            let registry = manager.open_registry(config)?;
            for line in list_hosts(&registry, filter.as_deref(), folder.as_deref())? {
                println!("{}", line);
            }
        }
        Command::Connect { name, overrides } => {
            let registry = manager.open_registry(config)?;
            let overrides = OverrideSet::from_args(&overrides)?;
            let spec = resolve_in(&registry, &name, &overrides)?;
            let status = ssh_service::connect_interactive(&spec)?;
            if ssh_service::is_connection_failure(&status) {
                return Err(ConnectionError::Unreachable {
                    target: spec.to_string(),
                    detail: "ssh exited with status 255".to_string(),
                }
                .into());
            }
        }
        Command::Import { force } => {
            let mut registry = manager.load_registry()?;
            let stanzas = load_ssh_config(&config.ssh_config_path())?;
            let report = registry.merge_imported(stanzas, force);
            manager.save_registry(&registry)?;
            println!(
                "Imported {} hosts ({} replaced, {} skipped)",
                report.added, report.replaced, report.skipped
            );
        }
        Command::Get {
            name,
            remote,
            local,
            recursive,
        } => transfer(manager, config, &name, Direction::Download, remote, local, recursive).await?,
        Command::Put {
            name,
            local,
            remote,
            recursive,
        } => transfer(manager, config, &name, Direction::Upload, local, remote, recursive).await?,
        Command::Explore { .. } | Command::Tui => bail!("interactive commands are started by the binary"),
        edit => {
            let mut registry = manager.open_registry(config)?;
            let message = apply_edit(&mut registry, edit)?;
            manager.save_registry(&registry)?;
            println!("{}", message);
        }
    }
    Ok(())
}

/// One line per host, optionally narrowed by a filter and a folder.
pub fn list_hosts(registry: &HostRegistry, filter: Option<&str>, folder: Option<&str>) -> Result<Vec<String>> {
    if let Some(folder) = folder {
        if !registry.folders().any(|f| f == folder) {
            bail!("Folder '{}' does not exist", folder);
        }
    }
    let hosts = match filter {
        Some(expr) => registry.filter(expr),
        None => registry.hosts().collect(),
    };

    Ok(hosts
        .into_iter()
        .filter(|h| folder.map_or(true, |f| h.folder.as_deref() == Some(f)))
        .map(|h| {
            let mut line = format!("{:<20} {}@{}:{}", h.name, h.username, h.host, h.port);
            if let Some(folder) = &h.folder {
                line.push_str(&format!("  [{}]", folder));
            }
            if !h.tags.is_empty() {
                line.push_str(&format!("  #{}", h.tags_to_string()));
            }
            line
        })
        .collect())
}

/// Apply a registry-mutating subcommand. Returns the message to print.
pub fn apply_edit(registry: &mut HostRegistry, command: Command) -> Result<String> {
    let message = match command {
        Command::Add(args) => {
            let host = args.host.clone().context("an address is required to add a host")?;
            let mut entry = HostEntry::new(args.name.clone(), host);
            apply_host_args(&mut entry, &args);
            registry.add_host(entry)?;
            format!("Added {}", args.name)
        }
        Command::Edit(args) => {
            registry.update_host(&args.name, |entry| {
                if let Some(host) = &args.host {
                    entry.host = host.clone();
                }
                apply_host_args(entry, &args);
            })?;
            format!("Updated {}", args.name)
        }
        Command::Rm { name } => {
            registry.remove_host(&name)?;
            format!("Removed {}", name)
        }
        Command::Rename { old, new } => {
            registry.rename_host(&old, &new)?;
            format!("Renamed {} to {}", old, new)
        }
        Command::Tag { action } => match action {
            TagAction::Add { name, tags } => {
                let added = registry.add_tags(&name, &split_list(&tags))?;
                format!("Added {} tags to {}", added, name)
            }
            TagAction::Del { name, tags } => {
                let removed = registry.remove_tags(&name, &split_list(&tags))?;
                format!("Removed {} tags from {}", removed, name)
            }
        },
        Command::Folder { action } => match action {
            FolderAction::Add { name } => {
                registry.add_folder(&name)?;
                format!("Created folder {}", name)
            }
            FolderAction::Rm { name } => {
                let moved = registry.remove_folder(&name)?;
                format!("Removed folder {} ({} hosts moved to the root)", name, moved)
            }
            FolderAction::Rename { old, new } => {
                registry.rename_folder(&old, &new)?;
                format!("Renamed folder {} to {}", old, new)
            }
            FolderAction::List => registry.folders().collect::<Vec<_>>().join("\n"),
        },
        other => bail!("{:?} does not edit the registry", other),
    };
    Ok(message)
}

fn apply_host_args(entry: &mut HostEntry, args: &HostArgs) {
    if let Some(port) = args.port {
        entry.port = port;
    }
    if let Some(user) = &args.user {
        entry.username = user.clone();
    }
    if let Some(identity) = &args.identity {
        entry.identity_file = Some(identity.clone()).filter(|p| !p.is_empty());
    }
    if let Some(jump) = &args.jump {
        entry.proxy_jump = split_list(jump);
    }
    if let Some(tags) = &args.tags {
        entry.tags = normalize_tags(split_list(tags));
    }
    if let Some(folder) = &args.folder {
        entry.folder = Some(folder.clone()).filter(|f| !f.is_empty());
    }
}

/// Local destination for a download: `./<name>` by default, inside `local`
/// when it is an existing directory.
pub fn download_target(remote: &str, local: Option<&str>) -> String {
    let name = file_name(remote);
    match local {
        None => name.to_string(),
        Some(dir) if Path::new(dir).is_dir() => tree::join(Side::Local, dir, name),
        Some(path) => path.to_string(),
    }
}

/// Remote destination for an upload: the file name in the login directory
/// by default, inside `remote` when it ends in `/` or is a directory.
pub async fn upload_target(session: &Session, local: &str, remote: Option<&str>) -> Result<String> {
    let name = Path::new(local)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Cannot tell the file name of {}", local))?;

    Ok(match remote {
        None => name,
        Some(dir) if dir.ends_with('/') => tree::join(Side::Remote, dir, &name),
        Some(path) => match session.stat(path).await {
            Ok(meta) if meta.kind == EntryKind::Directory => tree::join(Side::Remote, path, &name),
            _ => path.to_string(),
        },
    })
}

async fn transfer(
    manager: &ConfigManager,
    config: &AppConfig,
    name: &str,
    direction: Direction,
    source: String,
    dest: Option<String>,
    recursive: bool,
) -> Result<()> {
    let registry = manager.open_registry(config)?;
    let spec = resolve_in(&registry, name, &OverrideSet::default())?;

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    let connector = OpenSshConnector::new(manager.control_dir(), timeout);
    let sessions = SessionManager::new(Arc::new(connector), timeout);
    let session = sessions.open(spec).await?;

    let dest = match direction {
        Direction::Download => download_target(&source, dest.as_deref()),
        Direction::Upload => upload_target(&session, &source, dest.as_deref()).await?,
    };

    let engine = TransferEngine::new(config.transfer_settings());
    let result = watch_job(&engine, session, source, dest, direction, recursive).await;
    sessions.close_all().await;
    let snap = result?;

    if snap.status != JobStatus::Completed {
        return Err(JobIncomplete {
            job: snap.job,
            status: snap.status.label(),
        }
        .into());
    }
    Ok(())
}

/// Run one job, printing progress to stderr. Ctrl-C cancels it.
async fn watch_job(
    engine: &TransferEngine,
    session: Arc<Session>,
    source: String,
    dest: String,
    direction: Direction,
    recursive: bool,
) -> Result<ProgressSnapshot> {
    let handle = engine.start_job(session, source, dest, direction, recursive);
    let mut stream = handle.subscribe();
    let mut last_line = String::new();

    let snap = loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(snap) => {
                    let line = progress_line(&snap);
                    if line != last_line {
                        eprint!("\r{}\x1b[K", line);
                        let _ = std::io::stderr().flush();
                        last_line = line;
                    }
                    if snap.status.is_terminal() {
                        break snap;
                    }
                }
                None => break handle.snapshot(),
            },
            signal = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                signal.context("Failed to listen for Ctrl-C")?;
                eprintln!("\nCancelling...");
                engine.cancel(&handle);
            }
        }
    };
    eprintln!();

    for task in handle.tracker().tasks() {
        if let TaskStatus::Failed(error) = &task.status {
            eprintln!("failed: {} ({})", task.source_path, error);
        }
    }
    println!(
        "{}: {} of {} files, {} failed, {} cancelled",
        snap.status.label(),
        snap.files_done,
        snap.files_total,
        snap.files_failed,
        snap.files_cancelled
    );
    Ok(snap)
}

pub fn progress_line(snap: &ProgressSnapshot) -> String {
    let total = if snap.provisional {
        format!("{}+", snap.files_total)
    } else {
        snap.files_total.to_string()
    };
    format!(
        "[{:>3}%] {}/{} files, {}/{} bytes, {}",
        snap.percent(),
        snap.files_settled(),
        total,
        snap.bytes_done,
        snap.bytes_total,
        snap.status.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::session::memory::MemoryFs;
    use crate::transfer::{ProgressTracker, TaskEvent};
    use tempfile::TempDir;

    fn host_args(name: &str, host: Option<&str>) -> HostArgs {
        HostArgs {
            name: name.into(),
            host: host.map(String::from),
            port: None,
            user: None,
            identity: None,
            jump: None,
            tags: None,
            folder: None,
        }
    }

    #[test]
    fn parses_connect_overrides_after_name() {
        let cli = Cli::try_parse_from(["sshm", "connect", "dev-server", "-p", "2222", "-L", "8080:localhost:80"]).unwrap();
        match cli.command {
            Some(Command::Connect { name, overrides }) => {
                assert_eq!(name, "dev-server");
                assert_eq!(overrides, vec!["-p", "2222", "-L", "8080:localhost:80"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn no_subcommand_means_tui() {
        let cli = Cli::try_parse_from(["sshm", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn crud_commands_edit_registry() {
        let mut registry = HostRegistry::new();
        let mut add = host_args("dev-server", Some("10.0.0.5"));
        add.user = Some("ubuntu".into());
        add.tags = Some("dev,web".into());
        apply_edit(&mut registry, Command::Add(add)).unwrap();
        apply_edit(&mut registry, Command::Folder { action: FolderAction::Add { name: "lab".into() } }).unwrap();

        let mut edit = host_args("dev-server", None);
        edit.port = Some(2222);
        edit.folder = Some("lab".into());
        apply_edit(&mut registry, Command::Edit(edit)).unwrap();

        let entry = registry.get("dev-server").unwrap();
        assert_eq!((entry.username.as_str(), entry.port), ("ubuntu", 2222));
        assert_eq!(entry.folder.as_deref(), Some("lab"));

        let message = apply_edit(
            &mut registry,
            Command::Tag {
                action: TagAction::Del {
                    name: "dev-server".into(),
                    tags: "web".into(),
                },
            },
        )
        .unwrap();
        assert_eq!(message, "Removed 1 tags from dev-server");

        let message = apply_edit(&mut registry, Command::Folder { action: FolderAction::Rm { name: "lab".into() } }).unwrap();
        assert!(message.contains("1 hosts moved"));
        assert_eq!(registry.get("dev-server").unwrap().folder, None);
    }

    #[test]
    fn tags_option_drops_case_duplicates() {
        let mut registry = HostRegistry::new();
        let mut add = host_args("dev-server", Some("10.0.0.5"));
        add.tags = Some("Prod,prod,web".into());
        apply_edit(&mut registry, Command::Add(add)).unwrap();
        assert_eq!(registry.get("dev-server").unwrap().tags_to_string(), "Prod,web");
    }

    #[test]
    fn add_without_address_or_duplicate_fails() {
        let mut registry = HostRegistry::new();
        assert!(apply_edit(&mut registry, Command::Add(host_args("a", None))).is_err());
        apply_edit(&mut registry, Command::Add(host_args("a", Some("10.0.0.1")))).unwrap();
        let err = apply_edit(&mut registry, Command::Add(host_args("a", Some("10.0.0.2")))).unwrap_err();
        assert!(matches!(err.downcast_ref::<RegistryError>(), Some(RegistryError::DuplicateHost(_))));
    }

    #[test]
    fn list_filters_by_expression_and_folder() {
        let mut registry = HostRegistry::new();
        registry.add_folder("prod").unwrap();
        let mut web = HostEntry::new("web-1", "10.0.0.7");
        web.folder = Some("prod".into());
        web.tags.insert("web".into());
        registry.add_host(web).unwrap();
        registry.add_host(HostEntry::new("db-1", "10.0.0.8")).unwrap();

        let lines = list_hosts(&registry, Some("tag:web"), None).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("web-1"));
        assert!(lines[0].contains("root@10.0.0.7:22  [prod]  #web"));

        assert_eq!(list_hosts(&registry, None, Some("prod")).unwrap().len(), 1);
        assert!(list_hosts(&registry, None, Some("nope")).is_err());
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let no_match: anyhow::Error = ResolutionError::NoMatchingHost("x".into()).into();
        assert_eq!(exit_code(&no_match), 2);
        let invalid: anyhow::Error = ResolutionError::invalid("-p", "bad").into();
        assert_eq!(exit_code(&invalid), 3);
        let timeout: anyhow::Error = ConnectionError::Timeout {
            target: "a".into(),
            secs: 10,
        }
        .into();
        assert_eq!(exit_code(&timeout), 3);
        let job: anyhow::Error = JobIncomplete {
            job: 1,
            status: "partially failed",
        }
        .into();
        assert_eq!(exit_code(&job), 4);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn download_target_joins_existing_directories() {
        let dir = TempDir::new().unwrap();
        let dir_str = dir.path().to_string_lossy().into_owned();
        assert_eq!(download_target("/var/log/app.log", None), "app.log");
        assert_eq!(
            download_target("/var/log/", Some(&dir_str)),
            dir.path().join("log").to_string_lossy()
        );
        let file = dir.path().join("renamed.log").to_string_lossy().into_owned();
        assert_eq!(download_target("/var/log/app.log", Some(&file)), file);
    }

    #[tokio::test]
    async fn upload_target_checks_remote_directories() {
        let fs = MemoryFs::new();
        fs.add_dir("/srv");
        let spec = resolve_in(
            &{
                let mut r = HostRegistry::new();
                r.add_host(HostEntry::new("dev", "10.0.0.5")).unwrap();
                r
            },
            "dev",
            &OverrideSet::default(),
        )
        .unwrap();
        let session = Session::new(spec, Arc::new(fs));

        assert_eq!(upload_target(&session, "/tmp/site", None).await.unwrap(), "site");
        assert_eq!(upload_target(&session, "/tmp/site", Some("/srv")).await.unwrap(), "/srv/site");
        assert_eq!(upload_target(&session, "/tmp/site", Some("/opt/")).await.unwrap(), "/opt/site");
        assert_eq!(upload_target(&session, "/tmp/site", Some("/srv/www")).await.unwrap(), "/srv/www");
    }

    #[test]
    fn progress_line_marks_growing_totals() {
        let tracker = ProgressTracker::new(1, Direction::Download, "/data", "data", 4);
        tracker.apply(TaskEvent::Discovered {
            task: 0,
            source: "/data/a".into(),
            dest: "data/a".into(),
            size: Some(100),
        });
        assert_eq!(progress_line(&tracker.snapshot()), "[  0%] 0/1+ files, 0/100 bytes, discovering");
        tracker.apply(TaskEvent::DiscoveryFinished);
        tracker.apply(TaskEvent::Started { task: 0 });
        tracker.apply(TaskEvent::Completed { task: 0, bytes: 100 });
        assert_eq!(progress_line(&tracker.snapshot()), "[100%] 1/1 files, 100/100 bytes, running");
    }
}
