//! One-shot session commands.

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use warga_core::SessionError;
use warga_core::identity::{Registration, Role};
use warga_core::provider::MemoryProvider;
use warga_core::session::{SessionManager, SessionState};

use super::shell;

pub enum SessionCommand {
    Login { email: String, password: String },
    Signup(Registration),
    Logout,
    Whoami,
    Shell,
}

/// Accounts available in `--offline` mode.
pub const DEMO_ACCOUNTS: [(&str, &str, &str, Role); 2] = [
    ("admin@desa.id", "admin123", "Kepala Desa", Role::Administrator),
    ("warga@desa.id", "warga123", "Warga Desa", Role::Resident),
];

pub fn demo_provider() -> MemoryProvider {
    let provider = MemoryProvider::new();
    for (email, password, full_name, role) in DEMO_ACCOUNTS {
        provider.add_account(email, password, full_name, role);
    }
    provider
}

pub async fn run(session: &SessionManager, command: SessionCommand) -> Result<()> {
    let mut errors = session.errors();
    let initial = session.settled().await;
    report_errors(&mut errors);

    match command {
        SessionCommand::Login { email, password } => {
            session
                .sign_in(&email, &password)
                .await
                .context("sign in")?;
            let state = session.settled().await;
            report_errors(&mut errors);
            println!("Signed in as {}", describe_identity(&state));
            Ok(())
        }
        SessionCommand::Signup(registration) => {
            let email = registration.email.clone();
            session.sign_up(registration).await.context("sign up")?;
            session.settled().await;
            println!("Registered {email} as {}", Role::Resident.display_name());
            Ok(())
        }
        SessionCommand::Logout => {
            if initial.identity.is_none() {
                println!("Not signed in");
                return Ok(());
            }
            session.sign_out().await;
            report_errors(&mut errors);
            println!("Signed out");
            Ok(())
        }
        SessionCommand::Whoami => {
            print!("{}", describe(&initial));
            Ok(())
        }
        SessionCommand::Shell => shell::run(session, errors).await,
    }
}

/// Prints non-fatal session errors to stderr.
pub fn report_errors(errors: &mut broadcast::Receiver<SessionError>) {
    loop {
        match errors.try_recv() {
            Ok(err) => eprintln!("warning: {err}"),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                eprintln!("warning: {n} session errors dropped");
            }
            Err(_) => break,
        }
    }
}

/// `email (Role)`, or just the email while the profile is unavailable.
pub fn describe_identity(state: &SessionState) -> String {
    let Some(identity) = &state.identity else {
        return "nobody".to_string();
    };
    match &state.profile {
        Some(profile) => format!("{} ({})", identity.email, profile.role.display_name()),
        None => format!("{} (profile unavailable)", identity.email),
    }
}

/// Multi-line summary of the session, newline terminated.
pub fn describe(state: &SessionState) -> String {
    let Some(identity) = &state.identity else {
        return "Not signed in\n".to_string();
    };

    let mut out = format!("email:   {}\nid:      {}\n", identity.email, identity.id);
    match &state.profile {
        Some(profile) => {
            out.push_str(&format!("name:    {}\n", profile.full_name));
            out.push_str(&format!("role:    {}\n", profile.role.display_name()));
            if !profile.nik.is_empty() {
                out.push_str(&format!("nik:     {}\n", profile.nik));
            }
            if let Some(phone) = &profile.phone {
                out.push_str(&format!("phone:   {phone}\n"));
            }
            out.push_str(&format!("avatar:  {}\n", profile.avatar_or_fallback()));
        }
        None => out.push_str("profile: unavailable\n"),
    }
    out
}
