use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use futures::future::join_all;

use refresh_relay::config::{CliArgs, Command, Config, LogFormat};
use refresh_relay::{ReqwestTransport, Session, SqliteCredentialStore};

type CliSession = Session<ReqwestTransport, SqliteCredentialStore>;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    tracing::debug!("Credential database: {}", config.db_file.display());

    let store = SqliteCredentialStore::open(&config.db_file)?;
    let transport = ReqwestTransport::new(
        config.http_max_connections,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;
    let session = Session::new(transport, store, config.auth.clone());

    match args.command {
        Command::Login { email, password } => login(&session, email, password).await,
        Command::Request { count } => send_requests(&session, count).await,
        Command::Logout => logout(&session).await,
        Command::Status => status(&session, &config),
    }
}

/// Log in, prompting for anything not given on the command line
async fn login(
    session: &CliSession,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => Input::<String>::new()
            .with_prompt("Email")
            .interact_text()
            .context("Failed to read email")?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let pair = session
        .login(&email, &password)
        .await
        .context("Login failed")?;

    println!("✅ Logged in as {}", email);
    if let Some(ref token) = pair.access_token {
        println!("   access token: {}...", preview(token));
    }
    Ok(())
}

/// Fire `count` protected requests at once through one coordinator
async fn send_requests(session: &CliSession, count: usize) -> Result<()> {
    if !session.is_logged_in()? {
        tracing::warn!("No access token stored, sending unauthenticated requests");
    }

    let results = join_all((0..count.max(1)).map(|_| session.protected_request())).await;

    let mut failed = 0;
    for (i, result) in results.iter().enumerate() {
        match result {
            Ok(response) => println!("#{} {} {}", i + 1, response.status, response.text()),
            Err(e) => {
                failed += 1;
                println!("#{} failed: {}", i + 1, e);
            }
        }
    }

    println!(
        "{} succeeded, {} failed, {} token refresh(es)",
        results.len() - failed,
        failed,
        session.coordinator().refresh_cycles().await
    );

    if failed > 0 {
        anyhow::bail!("{} request(s) failed", failed);
    }
    Ok(())
}

async fn logout(session: &CliSession) -> Result<()> {
    match session.logout().await {
        Ok(_) => println!("👋 Logged out"),
        Err(e) => println!("⚠️  Logout request failed ({}), local tokens cleared", e),
    }
    Ok(())
}

fn status(session: &CliSession, config: &Config) -> Result<()> {
    let pair = session.coordinator().credentials()?;

    println!("  Database:      {}", config.db_file.display());
    println!("  Protected URL: {}", config.auth.protected_endpoint);
    match pair.access_token {
        Some(ref token) => println!("  Access token:  {}...", preview(token)),
        None => println!("  Access token:  (none)"),
    }
    println!(
        "  Refresh token: {}",
        if pair.refresh_token.is_some() {
            "stored"
        } else {
            "(none)"
        }
    );
    Ok(())
}

fn preview(token: &str) -> String {
    token.chars().take(12).collect()
}
