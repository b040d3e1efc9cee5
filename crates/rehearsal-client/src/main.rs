//! Rehearsal CLI
//!
//! Usage:
//!   rehearsal register --email <email> --password <password>
//!   rehearsal login --email <email> --password <password>
//!   rehearsal session --email <email> --password <password>

use clap::{Parser, Subcommand};
use rehearsal_client::{
    AuthStatus, ClientConfig, HttpAuthApi, RegisterForm, SessionManager, DEFAULT_API_URL,
};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rehearsal")]
#[command(about = "Rehearsal scheduler command-line client")]
#[command(version)]
struct Cli {
    /// API base URL
    #[arg(long, global = true, env = "REHEARSAL_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Credentials {
    #[arg(long)]
    email: String,

    #[arg(long, env = "REHEARSAL_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        phone_number: Option<String>,
    },
    /// Log in, print the profile, log out
    Login {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Log in and keep the session refreshed until Ctrl-C
    Session {
        #[command(flatten)]
        credentials: Credentials,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rehearsal_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let api = Arc::new(HttpAuthApi::new(&ClientConfig::new(cli.api_url))?);
    let session = SessionManager::new(api);

    match cli.command {
        Commands::Register {
            credentials,
            first_name,
            last_name,
            phone_number,
        } => {
            let form = RegisterForm {
                email: credentials.email,
                password: credentials.password,
                first_name,
                last_name,
                phone_number,
            };
            let user = session.register(&form).await?;
            println!("Registered {} ({})", user.email, user.id);
        }
        Commands::Login { credentials } => {
            let me = session
                .login_and_get(&credentials.email, &credentials.password, "/api/users/me")
                .await?;
            println!("{}", serde_json::to_string_pretty(&me)?);
        }
        Commands::Session { credentials } => {
            let user = session.login(&credentials.email, &credentials.password).await?;
            println!("Signed in as {}. Press Ctrl-C to sign out.", user.email);

            let mut status = session.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = status.changed() => {
                        if changed.is_err() || *status.borrow() == AuthStatus::Anonymous {
                            anyhow::bail!("session expired");
                        }
                    }
                }
            }

            session.logout().await?;
            println!("Signed out");
        }
    }

    Ok(())
}
