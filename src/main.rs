//! SaaS Dashboard Client - Command Line Entry Point
//!
//! Drives the session store and usage tracker from a terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use dashboard_client::{
    api::{Role, UserPatch},
    auth::Registration,
    commands::{self, CommandResult},
    config::ClientConfig,
    guard::Route,
    logging, AppState,
};

#[derive(Parser)]
#[command(name = "dashboard", version, about = "SaaS dashboard client")]
struct Cli {
    /// API base URL (overrides DASHBOARD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory for the stored session and logs (overrides DASHBOARD_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show who is logged in
    Status {
        /// Fetch the profile from the server instead of the stored session
        #[arg(long)]
        remote: bool,
    },

    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },

    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        /// Defaults to the password
        #[arg(long)]
        confirm_password: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show or update the profile
    Profile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Check whether a dashboard page is reachable
    Open { path: String },

    /// Show the account's server-side usage summary
    Usage,

    /// Check that the API is up
    Health,

    /// Administrative actions (admin accounts only)
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },

    /// Issue simulated requests against the plan's limits
    Simulate {
        #[arg(short, long, default_value_t = 1)]
        count: u32,
        #[arg(short, long, default_value = "/users/profile")]
        endpoint: String,
        /// Keep publishing snapshots for this many seconds afterwards
        #[arg(long, default_value_t = 0)]
        watch_secs: u64,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// List accounts
    Users {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
    /// System-wide statistics
    Stats,
    /// Change an account's role
    Role { user_id: i64, role: String },
    /// Suspend or reactivate an account
    Suspend { user_id: i64 },
}

fn parse_role(role: &str) -> Result<Role> {
    match role.to_ascii_uppercase().as_str() {
        "USER" => Ok(Role::User),
        "ADMIN" => Ok(Role::Admin),
        other => bail!("unknown role: {}", other),
    }
}

fn print_result(result: &CommandResult) {
    println!("{}", result.toast);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.api_url {
        config.api_base_url = url;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    logging::init(&config.data_dir);
    info!("Dashboard client starting against {}", config.api_base_url);

    let state = AppState::new(config).context("failed to initialize API client")?;

    match cli.command {
        Command::Status { remote: false } => {
            match commands::restore_session(&state.session).await {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => println!("Not logged in"),
            }
        }
        Command::Status { remote: true } => {
            state.session.check_auth().await;
            let Some(token) = state.session.access_token() else {
                println!("Not logged in");
                return Ok(());
            };
            let user = state.api.profile(&token).await.context("failed to load profile")?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Login { username, password } => {
            print_result(&commands::login(&state.session, &username, &password).await);
        }
        Command::Register {
            username,
            email,
            password,
            confirm_password,
        } => {
            let registration = Registration {
                username,
                email,
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                password,
            };
            print_result(&commands::register(&state.session, &registration).await);
        }
        Command::Logout => print_result(&commands::logout(&state.session)),
        Command::Profile { username, email } => {
            let patch = UserPatch {
                username,
                email,
                ..UserPatch::default()
            };
            if patch.is_empty() {
                match commands::restore_session(&state.session).await {
                    Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                    None => println!("Not logged in"),
                }
            } else {
                print_result(&commands::save_profile(&state.session, &patch).await);
            }
        }
        Command::Open { path } => {
            state.session.check_auth().await;
            let navigation = commands::navigate(&state.session, &path);
            if navigation.redirected {
                println!("Redirected to {}", navigation.path);
            } else {
                println!("Opened {}", navigation.path);
            }
        }
        Command::Usage => {
            state.session.check_auth().await;
            let Some(token) = state.session.access_token() else {
                println!("Not logged in");
                return Ok(());
            };
            let summary = state.api.usage(&token).await.context("failed to load usage")?;
            println!("Total requests:      {}", summary.total_requests);
            println!("Requests this month: {}", summary.requests_this_month);
            println!("Most used endpoint:  {}", summary.most_used_endpoint);
            println!("Avg response time:   {:.1} ms", summary.average_response_time);
        }
        Command::Health => {
            let health = state.api.health().await.context("API unreachable")?;
            println!("API status: {}", health.status);
        }
        Command::Admin { action } => {
            state.session.check_auth().await;
            let navigation = commands::navigate(&state.session, Route::Admin.path());
            if navigation.redirected {
                println!("Admin access required (redirected to {})", navigation.path);
                return Ok(());
            }
            let token = state
                .session
                .access_token()
                .context("session has no access token")?;

            match action {
                AdminAction::Users { skip, limit } => {
                    let users = state.api.list_users(&token, skip, limit).await?;
                    for user in &users {
                        println!(
                            "{:>5}  {:<20} {:<30} {:<6} {:<10} {}",
                            user.id,
                            user.username,
                            user.email,
                            user.role,
                            user.subscription_plan,
                            if user.is_active { "active" } else { "suspended" }
                        );
                    }
                }
                AdminAction::Stats => {
                    let stats = state.api.system_stats(&token).await?;
                    println!(
                        "Users:              {} ({} active)",
                        stats.total_users, stats.active_users
                    );
                    println!("Requests today:     {}", stats.total_requests_today);
                    println!("Requests this month: {}", stats.total_requests_this_month);
                    println!(
                        "Plans:              {} free, {} pro",
                        stats.free_plan_users, stats.pro_plan_users
                    );
                }
                AdminAction::Role { user_id, role } => {
                    let response = state
                        .api
                        .update_user_role(&token, user_id, parse_role(&role)?)
                        .await?;
                    println!("{}", response.message);
                }
                AdminAction::Suspend { user_id } => {
                    let response = state.api.suspend_user(&token, user_id).await?;
                    println!("{}", response.message);
                }
            }
        }
        Command::Simulate {
            count,
            endpoint,
            watch_secs,
        } => {
            state.session.check_auth().await;
            let tracker = Arc::new(state.usage_tracker().await);
            let handle = tracker.start();

            let report = commands::simulate_requests(&tracker, &endpoint, count).await;
            if let Some(toast) = &report.toast {
                println!("{}", toast);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);

            if watch_secs > 0 {
                let mut snapshots = handle.subscribe();
                let deadline = tokio::time::sleep(Duration::from_secs(watch_secs));
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        _ = &mut deadline => break,
                        changed = snapshots.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let snapshot = snapshots.borrow_and_update().clone();
                            println!("{}", serde_json::to_string(&snapshot)?);
                        }
                    }
                }
            }

            handle.stop();
        }
    }

    Ok(())
}
