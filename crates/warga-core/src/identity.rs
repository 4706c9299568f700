//! Identity and profile records.
//!
//! `Identity` is what the provider hands out after authentication.
//! `Profile` is the portal's own row about that principal, keyed by the
//! identity id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const FALLBACK_AVATAR_BASE: &str = "https://ui-avatars.com/api/";

/// Authenticated principal issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}

/// Portal role. Fixed at profile creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    #[serde(rename = "user")]
    Resident,
    #[serde(rename = "admin")]
    Administrator,
}

impl Role {
    /// Background colour for generated initials avatars.
    fn avatar_background(self) -> &'static str {
        match self {
            Role::Resident => "10b981",
            Role::Administrator => "3b82f6",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Administrator => "administrator",
        }
    }
}

/// Application profile row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    /// National identity number.
    pub nik: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Administrator
    }

    /// Returns the stored avatar, or a generated initials avatar.
    pub fn avatar_or_fallback(&self) -> String {
        if let Some(url) = self.avatar_url.as_deref()
            && !url.is_empty()
        {
            return url.to_string();
        }

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("name", &self.full_name)
            .append_pair("background", self.role.avatar_background())
            .append_pair("color", "fff")
            .append_pair("size", "200")
            .finish();
        format!("{FALLBACK_AVATAR_BASE}?{query}")
    }
}

/// Sign-up form input.
///
/// No role field: every self-registered account is a resident.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub nik: String,
    pub address: String,
    pub phone: Option<String>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .field("full_name", &self.full_name)
            .field("nik", &self.nik)
            .field("address", &self.address)
            .field("phone", &self.phone)
            .finish()
    }
}

/// Row inserted into the profile table during sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub nik: String,
    pub address: String,
    pub phone: String,
    pub role: Role,
}

impl NewProfile {
    /// Builds the profile row for a freshly registered identity.
    pub fn resident(identity: &Identity, registration: &Registration) -> Self {
        Self {
            id: identity.id.clone(),
            email: registration.email.clone(),
            full_name: registration.full_name.clone(),
            nik: registration.nik.clone(),
            address: registration.address.clone(),
            phone: registration.phone.clone().unwrap_or_default(),
            role: Role::Resident,
        }
    }
}

/// Column updates applied to an existing profile row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.avatar_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(role: Role) -> Profile {
        Profile {
            id: "u1".to_string(),
            email: "siti@desa.id".to_string(),
            full_name: "Siti Rahma".to_string(),
            nik: "3201010101010001".to_string(),
            address: "RT 01 / RW 02".to_string(),
            phone: None,
            avatar_url: None,
            role,
            created_at: DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[test]
    fn role_uses_backend_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Resident).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Administrator).unwrap(),
            "\"admin\""
        );
    }

    #[test]
    fn profile_parses_row_without_optional_columns() {
        let row = r#"{
            "id": "u1",
            "email": "siti@desa.id",
            "full_name": "Siti Rahma",
            "nik": "3201010101010001",
            "address": "RT 01 / RW 02",
            "role": "admin",
            "created_at": "2024-05-01T08:00:00+00:00"
        }"#;
        let parsed: Profile = serde_json::from_str(row).unwrap();
        assert!(parsed.is_admin());
        assert_eq!(parsed.phone, None);
    }

    #[test]
    fn fallback_avatar_encodes_name_and_role_colour() {
        let url = profile(Role::Resident).avatar_or_fallback();
        assert!(url.starts_with("https://ui-avatars.com/api/?name=Siti+Rahma"));
        assert!(url.contains("background=10b981"));

        let admin = profile(Role::Administrator).avatar_or_fallback();
        assert!(admin.contains("background=3b82f6"));
    }

    #[test]
    fn stored_avatar_wins_over_fallback() {
        let mut p = profile(Role::Resident);
        p.avatar_url = Some("https://cdn.example/a.png".to_string());
        assert_eq!(p.avatar_or_fallback(), "https://cdn.example/a.png");
    }

    #[test]
    fn new_profile_is_always_resident() {
        let identity = Identity::new("u9", "budi@desa.id");
        let registration = Registration {
            email: "budi@desa.id".to_string(),
            full_name: "Budi".to_string(),
            ..Registration::default()
        };
        let row = NewProfile::resident(&identity, &registration);
        assert_eq!(row.role, Role::Resident);
        assert_eq!(row.phone, "");
        assert_eq!(row.id, "u9");
    }

    #[test]
    fn registration_debug_hides_password() {
        let registration = Registration {
            email: "budi@desa.id".to_string(),
            password: "rahasia123".to_string(),
            ..Registration::default()
        };
        let debug = format!("{registration:?}");
        assert!(debug.contains("budi@desa.id"));
        assert!(!debug.contains("rahasia123"));
    }
}
