use serde::{Deserialize, Serialize};

use super::user::RemoteUser;
use crate::auth::SessionError;

/// Role id of a student account
pub const ROLE_STUDENT: u8 = 0;

/// Role id of a club representative account
pub const ROLE_CLUB_REPRESENTATIVE: u8 = 2;

/// Minimum accepted password length at registration
const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of `/auth/refresh` and `/auth/logout`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenBody<'a> {
    pub refresh_token: &'a str,
}

/// Registration form data.
#[derive(Clone)]
pub struct RegisterData {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role_id: u8,
    pub is_verified: bool,
    pub university_id: String,
}

impl std::fmt::Debug for RegisterData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterData")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role_id", &self.role_id)
            .field("is_verified", &self.is_verified)
            .field("university_id", &self.university_id)
            .finish()
    }
}

/// Wire shape of `/auth/register`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
    role: u8,
    is_verified: bool,
    university_id: &'a str,
}

impl RegisterData {
    /// Students are verified on sign-up.
    pub fn student(name: &str, email: &str, password: &str, university_id: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role_id: ROLE_STUDENT,
            is_verified: true,
            university_id: university_id.to_string(),
        }
    }

    /// Club representatives start unverified.
    pub fn club_representative(name: &str, email: &str, password: &str, university_id: &str) -> Self {
        Self {
            role_id: ROLE_CLUB_REPRESENTATIVE,
            is_verified: false,
            ..Self::student(name, email, password, university_id)
        }
    }

    pub(crate) fn to_request(&self) -> RegisterRequest<'_> {
        RegisterRequest {
            name: &self.name,
            email: &self.email,
            password: &self.password,
            role: self.role_id,
            is_verified: self.is_verified,
            university_id: &self.university_id,
        }
    }

    /// Check the form locally before anything is sent.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.name.trim().is_empty() {
            return Err(SessionError::Credential("Name is required".to_string()));
        }
        if self.email.trim().is_empty() {
            return Err(SessionError::Credential("Email is required".to_string()));
        }
        if !looks_like_email(self.email.trim()) {
            return Err(SessionError::Credential(
                "Please enter a valid email address".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(SessionError::Credential("Password is required".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(SessionError::Credential(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }
        if self.university_id.trim().is_empty() {
            return Err(SessionError::Credential(
                "Please select a university".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loose `local@domain.tld` shape check.
pub fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some(at) = email.find('@') else {
        return false;
    };
    if at == 0 {
        return false;
    }
    let domain = &email[at + 1..];
    match domain.rfind('.') {
        Some(dot) => dot > 0 && dot + 1 < domain.len(),
        None => false,
    }
}

/// Response of `/auth/login` and `/auth/register`. Every field is optional
/// so failure bodies (`{"success": false, "message": ...}`) parse too.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user: Option<RemoteUser>,
}

impl AuthResponse {
    /// Access token, if the server reported success and issued one.
    pub fn granted_access_token(&self) -> Option<&str> {
        if self.success != Some(true) {
            return None;
        }
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RefreshResponse {
    /// The rotated `(access, refresh)` pair, or `None` if the response
    /// cannot be used.
    pub fn rotated_pair(&self) -> Option<(&str, &str)> {
        if self.success == Some(false) {
            return None;
        }
        let access = self.access_token.as_deref().filter(|t| !t.is_empty())?;
        let refresh = self.refresh_token.as_deref().filter(|t| !t.is_empty())?;
        Some((access, refresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_wire_shape() {
        let data = RegisterData::student("Ana Ruiz", "ana@uni.edu", "longpassword", "u-1");
        let json = serde_json::to_value(data.to_request()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "Ana Ruiz",
                "email": "ana@uni.edu",
                "password": "longpassword",
                "role": 0,
                "isVerified": true,
                "universityId": "u-1"
            })
        );
    }

    #[test]
    fn test_club_representative_defaults() {
        let data = RegisterData::club_representative("Chess Club", "chess@uni.edu", "longpassword", "u-1");
        assert_eq!(data.role_id, ROLE_CLUB_REPRESENTATIVE);
        assert!(!data.is_verified);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let ok = RegisterData::student("Ana", "ana@uni.edu", "longpassword", "u-1");
        assert!(ok.validate().is_ok());

        let cases = [
            RegisterData { name: " ".to_string(), ..ok.clone() },
            RegisterData { email: "ana-at-uni".to_string(), ..ok.clone() },
            RegisterData { password: "short".to_string(), ..ok.clone() },
            RegisterData { university_id: String::new(), ..ok.clone() },
        ];
        for data in cases {
            assert!(matches!(data.validate(), Err(SessionError::Credential(_))), "{:?}", data);
        }
    }

    #[test]
    fn test_looks_like_email() {
        assert!(looks_like_email("a@b.com"));
        assert!(looks_like_email("first.last@dept.uni.edu"));
        assert!(!looks_like_email("@b.com"));
        assert!(!looks_like_email("a@com"));
        assert!(!looks_like_email("a@b."));
        assert!(!looks_like_email("a b@c.com"));
    }

    #[test]
    fn test_auth_response_requires_success_and_token() {
        let ok: AuthResponse =
            serde_json::from_str(r#"{"success":true,"accessToken":"AT1","refreshToken":"RT1"}"#).unwrap();
        assert_eq!(ok.granted_access_token(), Some("AT1"));

        let rejected: AuthResponse =
            serde_json::from_str(r#"{"success":false,"accessToken":"AT1","message":"Invalid credentials"}"#).unwrap();
        assert_eq!(rejected.granted_access_token(), None);

        let empty: AuthResponse = serde_json::from_str(r#"{"success":true,"accessToken":""}"#).unwrap();
        assert_eq!(empty.granted_access_token(), None);
    }

    #[test]
    fn test_refresh_response_rotation() {
        let ok: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"AT2","refreshToken":"RT2"}"#).unwrap();
        assert_eq!(ok.rotated_pair(), Some(("AT2", "RT2")));

        let missing: RefreshResponse = serde_json::from_str(r#"{"success":true,"accessToken":"AT2"}"#).unwrap();
        assert_eq!(missing.rotated_pair(), None);

        let failed: RefreshResponse =
            serde_json::from_str(r#"{"success":false,"accessToken":"AT2","refreshToken":"RT2"}"#).unwrap();
        assert_eq!(failed.rotated_pair(), None);
    }
}
