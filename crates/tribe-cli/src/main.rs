//! Tribe CLI - a terminal front end for Tribe sessions.
//!
//! Logs in, registers, inspects and renews the stored session. The
//! `watch` command keeps the session alive with proactive renewal until
//! interrupted.

use std::io::{self, Write};

use anyhow::{anyhow, bail, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tribe_core::api::ApiError;
use tribe_core::auth::{CredentialStore, SessionError, SessionEvent, SessionService};
use tribe_core::config::Config;
use tribe_core::models::{RegisterData, UserUpdate};

/// Passphrase for sealing the local credential file
const PASSPHRASE_ENV: &str = "TRIBE_STORE_PASSPHRASE";

const LOG_FILE_PREFIX: &str = "tribe.log";

const USAGE: &str = "\
Usage: tribe <command>

Commands:
  login [email]                              Log in (prompts for password)
  register <name> <email> <university-id> [--club]
                                             Create an account
  logout                                     End the session
  whoami                                     Show the logged-in user
  refresh                                    Renew the access token now
  update [--first-name N] [--last-name N] [--email E]
                                             Update your profile
  watch                                      Keep the session renewed until Ctrl-C
";

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr; a daily log file is written to the cache
/// directory when one is available. The returned guard must be held until
/// exit so buffered lines are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not read config ({}), using defaults", e);
        Config::default()
    });
    config.apply_env();

    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "Tribe CLI starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprint!("{}", USAGE);
        return Ok(());
    };

    let passphrase = std::env::var(PASSPHRASE_ENV).ok().filter(|p| !p.is_empty());
    let store = CredentialStore::from_config(&config, passphrase.as_deref())?;
    info!(backends = ?store.backend_names(), sealed = passphrase.is_some(), "Credential store ready");
    let session = SessionService::new(config.clone(), store)?;

    let result = match command.as_str() {
        "login" => login(&session, &mut config, args.get(1).cloned()).await,
        "register" => register(&session, &args[1..]).await,
        "logout" => {
            session.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "whoami" => whoami(&session),
        "refresh" => {
            session.refresh_token().await?;
            println!("Access token renewed.");
            Ok(())
        }
        "update" => update(&session, &args[1..]).await,
        "watch" => watch(&session).await,
        "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("{}", USAGE);
            bail!("unknown command: {}", other)
        }
    };

    if let Err(e) = &result {
        if let Some(hint) = login_hint(e) {
            eprintln!("{}", hint);
        }
    }
    result
}

/// Re-login hint for failures that only a new login can fix.
fn login_hint(err: &anyhow::Error) -> Option<&'static str> {
    let session_err = err.downcast_ref::<SessionError>().or_else(|| match err.downcast_ref::<ApiError>() {
        Some(ApiError::Session(e)) => Some(e),
        _ => None,
    })?;
    session_err
        .requires_login()
        .then_some("Run `tribe login` to sign in again.")
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_password(label: &str) -> Result<String> {
    let password = rpassword::prompt_password(label)?;
    Ok(password)
}

async fn login(session: &SessionService, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => match config.last_email.clone() {
            Some(last) => {
                let entered = prompt(&format!("Email [{}]: ", last))?;
                if entered.is_empty() {
                    last
                } else {
                    entered
                }
            }
            None => prompt("Email: ")?,
        },
    };
    let password = prompt_password("Password: ")?;

    let user = session.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {} <{}>", user.name, user.email);
    Ok(())
}

async fn register(session: &SessionService, args: &[String]) -> Result<()> {
    let club = args.iter().any(|a| a == "--club");
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    let &[name, email, university_id] = positional.as_slice() else {
        bail!("usage: tribe register <name> <email> <university-id> [--club]");
    };

    let password = prompt_password("Password: ")?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    let data = if club {
        RegisterData::club_representative(name, email, &password, university_id)
    } else {
        RegisterData::student(name, email, &password, university_id)
    };
    let user = session.register(&data).await?;

    println!("Registered {} <{}>", user.name, user.email);
    if club {
        println!("Club representative accounts are reviewed before verification.");
    }
    Ok(())
}

fn whoami(session: &SessionService) -> Result<()> {
    if !session.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }
    match session.current_user() {
        Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
        None => println!("Logged in (no cached profile)."),
    }
    Ok(())
}

async fn update(session: &SessionService, args: &[String]) -> Result<()> {
    let mut update = UserUpdate::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow!("missing value for {}", flag))?
            .clone();
        match flag.as_str() {
            "--first-name" => update.first_name = Some(value),
            "--last-name" => update.last_name = Some(value),
            "--email" => update.email = Some(value),
            other => bail!("unknown option: {}", other),
        }
    }
    if update.is_empty() {
        bail!("nothing to update");
    }

    let user = session.update_user(&update).await?;
    println!("Updated profile: {} <{}>", user.name, user.email);
    Ok(())
}

async fn watch(session: &SessionService) -> Result<()> {
    if !session.is_authenticated() {
        bail!("Not logged in. Run `tribe login` first.");
    }

    let mut events = session.subscribe();
    session.schedule_token_refresh();
    println!("Keeping session alive. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::LoginRequired) => {
                    println!("Session expired. Please log in again.");
                    break;
                }
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Missed session events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.scheduler().stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_hint_for_session_failures() {
        assert!(login_hint(&anyhow::Error::new(SessionError::SessionExpired)).is_some());
        assert!(login_hint(&anyhow::Error::new(SessionError::NoRefreshToken)).is_some());
        assert!(login_hint(&anyhow::Error::new(SessionError::NotAuthenticated)).is_some());
        assert!(login_hint(&anyhow::Error::new(ApiError::Session(SessionError::SessionExpired))).is_some());
    }

    #[test]
    fn test_no_login_hint_for_other_failures() {
        assert!(login_hint(&anyhow::Error::new(SessionError::Credential("Invalid credentials".into()))).is_none());
        assert!(login_hint(&anyhow::Error::new(ApiError::RateLimited)).is_none());
        assert!(login_hint(&anyhow!("nothing to update")).is_none());
    }
}
