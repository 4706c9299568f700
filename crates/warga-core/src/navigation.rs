//! Role-gated navigation.
//!
//! `NavigationController` holds the single current view. It reacts to
//! session changes (`on_session_change`) and to explicit requests
//! (`navigate`), and `resolve` maps the view plus session to the page that
//! may actually be shown. A view the session is not entitled to is never
//! rendered, whatever the current view says.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::session::SessionState;

/// Who may see a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewClass {
    Public,
    Resident,
    Administrator,
    /// Any signed-in user; rendered per role.
    Shared,
}

/// Navigation target requested by the user or forced by a session change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    Landing,
    Login,
    Register,

    Dashboard,
    CreateComplaint,
    MyComplaints,
    ComplaintDetail {
        complaint_id: Option<String>,
    },
    Settings,

    AdminDashboard,
    AllComplaints,
    ReviewComplaint {
        complaint_id: Option<String>,
    },
    Statistics,
    Residents,
    AdminSettings,

    Profile,
}

impl View {
    pub fn class(&self) -> ViewClass {
        match self {
            View::Landing | View::Login | View::Register => ViewClass::Public,
            View::Dashboard
            | View::CreateComplaint
            | View::MyComplaints
            | View::ComplaintDetail { .. }
            | View::Settings => ViewClass::Resident,
            View::AdminDashboard
            | View::AllComplaints
            | View::ReviewComplaint { .. }
            | View::Statistics
            | View::Residents
            | View::AdminSettings => ViewClass::Administrator,
            View::Profile => ViewClass::Shared,
        }
    }

    pub fn is_public(&self) -> bool {
        self.class() == ViewClass::Public
    }

    /// Landing view for a signed-in user of the given authorization.
    pub fn home(is_admin: bool) -> Self {
        if is_admin {
            View::AdminDashboard
        } else {
            View::Dashboard
        }
    }

    /// Stable textual identifier, without the complaint id.
    pub fn identifier(&self) -> &'static str {
        match self {
            View::Landing => "landing",
            View::Login => "login",
            View::Register => "register",
            View::Dashboard => "dashboard",
            View::CreateComplaint => "create-complaint",
            View::MyComplaints => "my-complaints",
            View::ComplaintDetail { .. } => "complaint-detail",
            View::Settings => "settings",
            View::AdminDashboard => "admin-dashboard",
            View::AllComplaints => "all-complaints",
            View::ReviewComplaint { .. } => "review-complaint",
            View::Statistics => "statistics",
            View::Residents => "residents",
            View::AdminSettings => "admin-settings",
            View::Profile => "profile",
        }
    }

    /// Every view identifier, for help output.
    pub const IDENTIFIERS: [&'static str; 15] = [
        "landing",
        "login",
        "register",
        "dashboard",
        "create-complaint",
        "my-complaints",
        "complaint-detail",
        "settings",
        "admin-dashboard",
        "all-complaints",
        "review-complaint",
        "statistics",
        "residents",
        "admin-settings",
        "profile",
    ];

    fn complaint_id(&self) -> Option<&str> {
        match self {
            View::ComplaintDetail { complaint_id } | View::ReviewComplaint { complaint_id } => {
                complaint_id.as_deref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.complaint_id() {
            Some(id) => write!(f, "{}:{id}", self.identifier()),
            None => f.write_str(self.identifier()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseViewError {
    #[error("unknown view `{0}`")]
    Unknown(String),
    #[error("view `{0}` does not take a complaint id")]
    UnexpectedId(String),
}

impl FromStr for View {
    type Err = ParseViewError;

    /// Parses `name` or `name:<complaint id>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, id) = match s.trim().split_once(':') {
            Some((name, id)) if !id.trim().is_empty() => (name, Some(id.trim().to_string())),
            Some((name, _)) => (name, None),
            None => (s.trim(), None),
        };

        let view = match name {
            "landing" => View::Landing,
            "login" => View::Login,
            "register" => View::Register,
            "dashboard" => View::Dashboard,
            "create-complaint" => View::CreateComplaint,
            "my-complaints" => View::MyComplaints,
            "complaint-detail" => {
                return Ok(View::ComplaintDetail { complaint_id: id });
            }
            "settings" => View::Settings,
            "admin-dashboard" => View::AdminDashboard,
            "all-complaints" => View::AllComplaints,
            "review-complaint" => {
                return Ok(View::ReviewComplaint { complaint_id: id });
            }
            "statistics" => View::Statistics,
            "residents" | "users" => View::Residents,
            "admin-settings" => View::AdminSettings,
            "profile" => View::Profile,
            other => return Err(ParseViewError::Unknown(other.to_string())),
        };

        if id.is_some() {
            return Err(ParseViewError::UnexpectedId(name.to_string()));
        }
        Ok(view)
    }
}

/// What may be rendered for the current view and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// Session restore in flight; nothing else is shown.
    Loading,

    Landing,
    Login,
    Register,

    ResidentDashboard,
    CreateComplaint,
    MyComplaints,
    ComplaintDetail { complaint_id: String },
    ResidentSettings,
    ResidentProfile,

    AdminDashboard,
    AllComplaints,
    ReviewComplaint { complaint_id: String },
    Statistics,
    Residents,
    AdminSettings,
    AdminProfile,
}

impl Page {
    pub fn title(&self) -> &'static str {
        match self {
            Page::Loading => "Loading",
            Page::Landing => "Welcome",
            Page::Login => "Sign in",
            Page::Register => "Register",
            Page::ResidentDashboard => "Resident dashboard",
            Page::CreateComplaint => "New complaint",
            Page::MyComplaints => "My complaints",
            Page::ComplaintDetail { .. } => "Complaint detail",
            Page::ResidentSettings => "Settings",
            Page::ResidentProfile => "My profile",
            Page::AdminDashboard => "Administrator dashboard",
            Page::AllComplaints => "All complaints",
            Page::ReviewComplaint { .. } => "Review complaint",
            Page::Statistics => "Statistics",
            Page::Residents => "Residents",
            Page::AdminSettings => "Administrator settings",
            Page::AdminProfile => "Administrator profile",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::ComplaintDetail { complaint_id } | Page::ReviewComplaint { complaint_id } => {
                write!(f, "{} #{complaint_id}", self.title())
            }
            _ => f.write_str(self.title()),
        }
    }
}

/// Forced transition made by [`NavigationController::on_session_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub from: View,
    pub to: View,
}

#[derive(Debug, Clone, Default)]
pub struct NavigationController {
    current: View,
}

impl NavigationController {
    /// Starts on the landing view.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &View {
        &self.current
    }

    /// Sets the current view unconditionally and returns the previous one.
    /// Entitlement is enforced by [`Self::resolve`], not here.
    pub fn navigate(&mut self, view: View) -> View {
        debug!(from = %self.current, to = %view, "navigate");
        std::mem::replace(&mut self.current, view)
    }

    /// Applies the redirect rule for a new session state.
    ///
    /// - loading: stay put
    /// - signed in on a public view: go to the role's dashboard
    /// - signed out on any other view: go to the landing view
    pub fn on_session_change(&mut self, state: &SessionState) -> Option<Redirect> {
        if state.loading {
            return None;
        }

        let target = match (&state.identity, self.current.is_public()) {
            (Some(_), true) => View::home(state.is_admin()),
            (None, false) => View::Landing,
            _ => return None,
        };

        let from = std::mem::replace(&mut self.current, target.clone());
        debug!(%from, to = %target, "session redirect");
        Some(Redirect { from, to: target })
    }

    /// Page to render for the current view under `state`.
    pub fn resolve(&self, state: &SessionState) -> Page {
        if state.loading {
            return Page::Loading;
        }

        if state.identity.is_none() {
            return match self.current {
                View::Login => Page::Login,
                View::Register => Page::Register,
                _ => Page::Landing,
            };
        }

        let is_admin = state.is_admin();
        if self.current == View::Profile {
            return if is_admin {
                Page::AdminProfile
            } else {
                Page::ResidentProfile
            };
        }

        if is_admin {
            match &self.current {
                View::AllComplaints => Page::AllComplaints,
                View::ReviewComplaint {
                    complaint_id: Some(id),
                } => Page::ReviewComplaint {
                    complaint_id: id.clone(),
                },
                View::Statistics => Page::Statistics,
                View::Residents => Page::Residents,
                View::AdminSettings => Page::AdminSettings,
                _ => Page::AdminDashboard,
            }
        } else {
            match &self.current {
                View::CreateComplaint => Page::CreateComplaint,
                View::MyComplaints => Page::MyComplaints,
                View::ComplaintDetail {
                    complaint_id: Some(id),
                } => Page::ComplaintDetail {
                    complaint_id: id.clone(),
                },
                View::Settings => Page::ResidentSettings,
                _ => Page::ResidentDashboard,
            }
        }
    }
}
