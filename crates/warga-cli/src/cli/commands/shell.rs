//! Interactive shell.
//!
//! Reads commands from stdin while watching the session. Every session
//! change goes through `NavigationController::on_session_change`, so forced
//! redirects show up even when nothing was typed (e.g. a token refresh
//! failing in the background).

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use warga_core::SessionError;
use warga_core::assets::AvatarUpload;
use warga_core::identity::Registration;
use warga_core::navigation::{NavigationController, View};
use warga_core::session::{ProfileChanges, SessionManager, SessionState};

use super::session::{describe, report_errors};

const HELP: &str = "\
commands:
  login <email> <password>     sign in
  signup <email> <password>    register a resident (asks for the rest)
  logout                       sign out
  refresh                      reload the profile
  phone <number>               change phone number
  email <address>              change email address
  avatar <file>                upload a profile picture
  go <view> [complaint id]     navigate
  page                         show the page for the current view
  state                        show the session
  views                        list view names
  quit                         leave the shell";

enum Flow {
    Continue,
    Quit,
}

/// Sign-up fields still to be asked for.
#[derive(Debug, Clone, Copy)]
enum SignupStep {
    FullName,
    Nik,
    Address,
    Phone,
}

impl SignupStep {
    fn prompt(self) -> &'static str {
        match self {
            SignupStep::FullName => "full name:",
            SignupStep::Nik => "nik:",
            SignupStep::Address => "address:",
            SignupStep::Phone => "phone (empty to skip):",
        }
    }
}

struct SignupForm {
    registration: Registration,
    step: SignupStep,
}

struct Shell<'a> {
    session: &'a SessionManager,
    nav: NavigationController,
    signup: Option<SignupForm>,
}

pub async fn run(session: &SessionManager, mut errors: broadcast::Receiver<SessionError>) -> Result<()> {
    let mut shell = Shell {
        session,
        nav: NavigationController::new(),
        signup: None,
    };
    let mut state_rx = session.subscribe();
    let state = state_rx.borrow_and_update().clone();
    shell.on_state(&state);
    shell.print_page(&state);
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                shell.on_state(&state);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break;
                };
                if let Flow::Quit = shell.handle(line.trim()).await {
                    break;
                }
            }
        }
        report_errors(&mut errors);
    }

    Ok(())
}

impl Shell<'_> {
    /// Applies the redirect rule; prints the page when a redirect happened.
    fn on_state(&mut self, state: &SessionState) {
        if self.nav.on_session_change(state).is_some() {
            self.print_page(state);
        }
    }

    fn print_page(&self, state: &SessionState) {
        println!("[{}] {}", self.nav.current(), self.nav.resolve(state));
    }

    /// Waits for the session to settle, then redirects and prints the page.
    async fn show_settled(&mut self) {
        let state = self.session.settled().await;
        self.nav.on_session_change(&state);
        self.print_page(&state);
    }

    async fn handle(&mut self, line: &str) -> Flow {
        if let Some(form) = self.signup.take() {
            self.continue_signup(form, line).await;
            return Flow::Continue;
        }

        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Flow::Continue;
        };
        let args: Vec<&str> = words.collect();

        match (command, args.as_slice()) {
            ("quit" | "exit", _) => return Flow::Quit,
            ("help", _) => println!("{HELP}"),
            ("views", _) => println!("{}", View::IDENTIFIERS.join(" ")),

            ("login", [email, password]) => {
                match self.session.sign_in(email, password).await {
                    Ok(()) => self.show_settled().await,
                    Err(err) => eprintln!("error: {err}"),
                }
            }
            ("signup", [email, password]) => {
                let step = SignupStep::FullName;
                println!("{}", step.prompt());
                self.signup = Some(SignupForm {
                    registration: Registration {
                        email: (*email).to_string(),
                        password: (*password).to_string(),
                        ..Registration::default()
                    },
                    step,
                });
            }
            ("logout", []) => {
                self.session.sign_out().await;
                self.show_settled().await;
            }
            ("refresh", []) => {
                if let Err(err) = self.session.refresh_profile().await {
                    eprintln!("error: {err}");
                }
            }

            ("phone", [phone]) => {
                self.update_profile(ProfileChanges {
                    phone: Some((*phone).to_string()),
                    ..ProfileChanges::default()
                })
                .await;
            }
            ("email", [email]) => {
                self.update_profile(ProfileChanges {
                    email: Some((*email).to_string()),
                    ..ProfileChanges::default()
                })
                .await;
            }
            ("avatar", [file]) => match read_avatar(Path::new(file)) {
                Ok(avatar) => {
                    self.update_profile(ProfileChanges {
                        avatar: Some(avatar),
                        ..ProfileChanges::default()
                    })
                    .await;
                }
                Err(err) => eprintln!("error: {err:#}"),
            },

            ("go", [view]) => self.go(view).await,
            ("go", [view, complaint_id]) => self.go(&format!("{view}:{complaint_id}")).await,
            ("page", []) => {
                let state = self.session.settled().await;
                self.print_page(&state);
            }
            ("state", []) => {
                let state = self.session.state();
                print!("{}", describe(&state));
                println!("loading: {}", state.loading);
            }

            _ => eprintln!("error: unknown command `{line}` (try `help`)"),
        }

        Flow::Continue
    }

    async fn go(&mut self, target: &str) {
        match target.parse::<View>() {
            Ok(view) => {
                self.nav.navigate(view);
                let state = self.session.settled().await;
                self.print_page(&state);
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }

    async fn update_profile(&mut self, changes: ProfileChanges) {
        match self.session.update_profile(changes).await {
            Ok(()) => println!("Profile updated"),
            Err(err) => eprintln!("error: {err}"),
        }
    }

    async fn continue_signup(&mut self, mut form: SignupForm, line: &str) {
        let value = line.to_string();
        let next = match form.step {
            SignupStep::FullName => {
                form.registration.full_name = value;
                Some(SignupStep::Nik)
            }
            SignupStep::Nik => {
                form.registration.nik = value;
                Some(SignupStep::Address)
            }
            SignupStep::Address => {
                form.registration.address = value;
                Some(SignupStep::Phone)
            }
            SignupStep::Phone => {
                form.registration.phone = Some(value).filter(|p| !p.is_empty());
                None
            }
        };

        if let Some(step) = next {
            println!("{}", step.prompt());
            form.step = step;
            self.signup = Some(form);
            return;
        }

        let email = form.registration.email.clone();
        match self.session.sign_up(form.registration).await {
            Ok(()) => {
                println!("Registered {email}");
                self.show_settled().await;
            }
            Err(err) => eprintln!("error: {err}"),
        }
    }
}

fn read_avatar(path: &Path) -> Result<AvatarUpload> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(AvatarUpload::new(file_name, bytes))
}
