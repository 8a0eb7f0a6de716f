use serde::{Deserialize, Serialize};
use serde_json::Value;

const UNKNOWN_ID: &str = "unknown";
const UNKNOWN_NAME: &str = "Unknown User";
const UNKNOWN_EMAIL: &str = "unknown@email.com";
const DEFAULT_ROLE: &str = "1";

/// Identity projection stored next to the tokens so "who is logged in"
/// never needs a network round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

/// User object as returned by the server.
///
/// Server versions disagree on field names (`first_name` vs `firstName`,
/// `role_id` vs `roleId` vs `role`) and on whether ids are numbers or
/// strings, so every variant is accepted here and collapsed by
/// [`RemoteUser::to_session_user`]. Keep this shim confined to this type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteUser {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default, rename = "firstName")]
    pub first_name_camel: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, rename = "lastName")]
    pub last_name_camel: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role_id: Option<Value>,
    #[serde(default, rename = "roleId")]
    pub role_id_camel: Option<Value>,
    #[serde(default)]
    pub role: Option<Value>,
}

/// Render a JSON scalar as an identifier string. Null, empty strings and
/// structured values yield `None`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl RemoteUser {
    pub fn to_session_user(&self) -> SessionUser {
        let id = [&self.id, &self.user_id]
            .into_iter()
            .flatten()
            .find_map(scalar_to_string)
            .unwrap_or_else(|| UNKNOWN_ID.to_string());

        let first = non_empty(&self.first_name).or(non_empty(&self.first_name_camel));
        let last = non_empty(&self.last_name).or(non_empty(&self.last_name_camel));
        let full_name = format!("{} {}", first.unwrap_or(""), last.unwrap_or(""))
            .trim()
            .to_string();
        let name = if full_name.is_empty() {
            non_empty(&self.name).unwrap_or(UNKNOWN_NAME).to_string()
        } else {
            full_name
        };

        let email = non_empty(&self.email).unwrap_or(UNKNOWN_EMAIL).to_string();

        let role = [&self.role_id, &self.role_id_camel, &self.role]
            .into_iter()
            .flatten()
            .find_map(scalar_to_string)
            .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        SessionUser { id, name, email, role }
    }
}

/// Partial profile update sent to `PUT /users/{id}`. Only fields that are
/// set are serialized.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.university_id.is_none()
            && self.profile_picture.is_none()
    }
}
