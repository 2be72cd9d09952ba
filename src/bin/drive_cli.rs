//! Drive CLI - command line client for the cloud drive
//!
//! Usage:
//!   drive-cli login <email>               Sign in and save the session
//!   drive-cli ls [path]                   List a folder by name path
//!   drive-cli trash                       List the trash
//!   drive-cli search <query>              Search files (`@name` searches users)
//!   drive-cli get <id> [local]            Download a file
//!   drive-cli put <local> [--folder id]   Upload a file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use drive_client::api::{format_size, ShareAccess, ShareMode, ShareRequest};
use drive_client::config::{self, ClientConfig};
use drive_client::{ApiError, BaseMode, DriveApi, DriveBrowser, DriveNode, NodeKind};

#[derive(Parser)]
#[command(
    name = "drive-cli",
    about = "Drive CLI - command line client for the cloud drive",
    version,
    long_about = "Talks to the drive storage API.\nSet DRIVE_API_URL or edit the config file to choose the server."
)]
struct Cli {
    /// Print listings as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session tokens
    Login {
        email: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account
    Register {
        name: String,
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    /// End the session on the server and forget the tokens
    Logout,
    /// Show the signed-in account and quota
    Whoami,
    /// Change the account password
    Passwd,
    /// List a folder (path of folder names from the root)
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// List the trash
    Trash,
    /// Search by keyword, or `@username` for a user's files
    Search { query: String },
    /// Create a folder
    Mkdir {
        name: String,
        /// Parent folder id (default: root)
        #[arg(long)]
        parent: Option<String>,
    },
    /// Move items to the trash
    Rm {
        ids: Vec<String>,
        /// Delete from the trash for good
        #[arg(long)]
        permanent: bool,
    },
    /// Restore items from the trash
    Restore { ids: Vec<String> },
    /// Rename an item
    Mv { id: String, new_name: String },
    /// Share a file or folder
    Share {
        id: String,
        /// The id refers to a folder
        #[arg(long)]
        folder: bool,
        #[arg(long, value_enum, default_value_t = CliShareMode::Shared)]
        mode: CliShareMode,
        #[arg(long, value_enum, default_value_t = CliShareAccess::View)]
        access: CliShareAccess,
        /// Recipient email (repeatable)
        #[arg(long = "email")]
        emails: Vec<String>,
    },
    /// Download a file
    Get {
        id: String,
        /// Local destination (default: the id)
        local: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        local: PathBuf,
        /// Target folder id (default: root)
        #[arg(long)]
        folder: Option<String>,
    },
    /// List everything shared with you
    Shared,
    /// Show the config file location and API URL
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliShareMode {
    Private,
    Shared,
    Public,
}

impl From<CliShareMode> for ShareMode {
    fn from(mode: CliShareMode) -> Self {
        match mode {
            CliShareMode::Private => ShareMode::Private,
            CliShareMode::Shared => ShareMode::Shared,
            CliShareMode::Public => ShareMode::Public,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliShareAccess {
    View,
    Edit,
}

impl From<CliShareAccess> for ShareAccess {
    fn from(access: CliShareAccess) -> Self {
        match access {
            CliShareAccess::View => ShareAccess::View,
            CliShareAccess::Edit => ShareAccess::Edit,
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn password_or_prompt(password: Option<String>, label: &str) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => prompt(label),
    }
}

fn print_listing(nodes: &[DriveNode], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(nodes)?);
        return Ok(());
    }
    if nodes.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for node in nodes {
        let kind = match node.kind {
            NodeKind::Folder => "dir ",
            NodeKind::File => "file",
        };
        let size = node.size.map(format_size).unwrap_or_else(|| "-".to_string());
        let modified = node
            .updated_at
            .or(node.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}  {:>10}  {:16}  {}  [{}]", kind, size, modified, node.name, node.id);
    }
    Ok(())
}

async fn select_all(browser: &DriveBrowser, ids: &[String]) {
    for id in ids {
        browser.toggle_select(id).await;
    }
}

async fn execute(cli: Cli, config: ClientConfig, api: DriveApi) -> Result<()> {
    match cli.command {
        Commands::Login { email, password } => {
            let password = password_or_prompt(password, "Password")?;
            api.login(&email, &password).await?;
            println!("Logged in as {}", email);
        }
        Commands::Register { name, email, password } => {
            let password = password_or_prompt(password, "Password")?;
            api.register(&name, &email, &password).await?;
            println!("Account created, run `drive-cli login {}`", email);
        }
        Commands::Logout => {
            api.logout().await?;
            println!("Logged out");
        }
        Commands::Whoami => {
            let user = api.user_info().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!("Name:    {}", user.name.as_deref().unwrap_or("-"));
                println!("Email:   {}", user.email.as_deref().unwrap_or("-"));
                println!("Plan:    {}", user.plan);
                println!(
                    "Storage: {} of {} ({:.1}%)",
                    format_size(user.storage_used),
                    format_size(user.storage_limit),
                    user.usage_ratio() * 100.0
                );
            }
        }
        Commands::Passwd => {
            let old = prompt("Current password")?;
            let new = prompt("New password")?;
            if new.is_empty() {
                bail!("New password cannot be empty");
            }
            api.change_password(&old, &new).await?;
            println!("Password changed");
        }
        Commands::Ls { path } => {
            let browser = DriveBrowser::new(api, BaseMode::Browsing);
            browser.reload().await?;
            browser.open_path(&path).await?;
            print_listing(&browser.listing().await, cli.json)?;
        }
        Commands::Trash => {
            let browser = DriveBrowser::new(api, BaseMode::Trash);
            browser.reload().await?;
            print_listing(&browser.listing().await, cli.json)?;
        }
        Commands::Search { query } => {
            let browser = DriveBrowser::new(api, BaseMode::Browsing);
            browser.set_search_query(&query).await?;
            print_listing(&browser.listing().await, cli.json)?;
        }
        Commands::Mkdir { name, parent } => {
            if name.trim().is_empty() {
                bail!("Folder name cannot be empty");
            }
            let folder = api.create_folder(&name, parent.as_deref()).await?;
            println!("Created {} [{}]", folder.name, folder.id);
        }
        Commands::Rm { ids, permanent } => {
            let mode = if permanent { BaseMode::Trash } else { BaseMode::Browsing };
            let browser = DriveBrowser::new(api, mode);
            select_all(&browser, &ids).await;
            let count = browser.delete_selected().await?;
            if permanent {
                println!("Permanently deleted {} item(s)", count);
            } else {
                println!("Moved {} item(s) to the trash", count);
            }
        }
        Commands::Restore { ids } => {
            let browser = DriveBrowser::new(api, BaseMode::Trash);
            select_all(&browser, &ids).await;
            let count = browser.restore_selected().await?;
            println!("Restored {} item(s)", count);
        }
        Commands::Mv { id, new_name } => {
            api.rename_item(&id, &new_name).await?;
            println!("Renamed {} to {}", id, new_name);
        }
        Commands::Share { id, folder, mode, access, emails } => {
            let mut node = DriveNode::folder(id.clone(), id);
            if !folder {
                node.kind = NodeKind::File;
            }
            let request = ShareRequest {
                mode: mode.into(),
                access: access.into(),
                emails,
            };
            match api.share(&node, &request).await? {
                Some(link) => println!("Shared: {}", link),
                None => println!("Sharing set to {}", request.mode),
            }
        }
        Commands::Get { id, local } => {
            let bytes = api.download_file(&id).await?;
            let target = local.unwrap_or_else(|| PathBuf::from(&id));
            tokio::fs::write(&target, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", target.display()))?;
            println!("Downloaded {} → {} ({})", id, target.display(), format_size(bytes.len() as u64));
        }
        Commands::Put { local, folder } => {
            let bytes = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let file_name = local
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .context("Local path has no file name")?;
            let node = api.upload_file(&file_name, bytes, folder.as_deref()).await?;
            println!("Uploaded {} [{}]", node.name, node.id);
        }
        Commands::Shared => {
            let nodes = api.shared_with_me().await?;
            print_listing(&nodes, cli.json)?;
        }
        Commands::Config => {
            println!("Config file: {}", config::get_config_path().display());
            println!("API URL:     {}", config.api_base_url);
            println!("Session:     {}", config.token_path().display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_client_config();

    let api = match drive_client::connect(&config) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let mut ended = api.coordinator().on_session_ended();

    if let Err(e) = execute(cli, config, api).await {
        if ended.try_recv().is_ok() {
            eprintln!("Session expired. Run `drive-cli login <email>` to sign in again.");
        } else {
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_recoverable) {
                eprintln!("The server may be temporarily unavailable, try again shortly.");
            }
        }
        std::process::exit(1);
    }
}
