use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity payload carried inside every credential.
///
/// The canonical fields are `userId`, `role` and the optional `email`. Any
/// other claim found in a verified token is kept in [`Principal::extra`] so
/// that the access path exposes it unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "userId")]
    pub user_id: String,

    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Implementation-defined claims beyond the canonical three.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            email: None,
            extra: Map::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Copy of this principal reduced to `userId`, `role` and `email`.
    ///
    /// Rotation re-derives the new credential pair from this form only, so
    /// extension claims of the refresh credential do not survive it.
    pub fn canonical(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            role: self.role.clone(),
            email: self.email.clone(),
            extra: Map::new(),
        }
    }
}

// Email is personal data; keep it out of logs.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_drops_extension_claims() {
        let principal = Principal::new("u-1", "member")
            .with_email("a@example.com")
            .with_claim("isActive", Value::from("true"));

        let canonical = principal.canonical();
        assert_eq!(canonical.user_id, "u-1");
        assert_eq!(canonical.role, "member");
        assert_eq!(canonical.email.as_deref(), Some("a@example.com"));
        assert!(canonical.extra.is_empty());
    }

    #[test]
    fn test_serializes_with_camel_case_user_id() {
        let json = serde_json::to_value(Principal::new("7", "admin")).unwrap();
        assert_eq!(json["userId"], "7");
        assert_eq!(json["role"], "admin");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_unknown_fields_land_in_extra() {
        let principal: Principal = serde_json::from_value(serde_json::json!({
            "userId": "9",
            "role": "member",
            "isActive": "true",
        }))
        .unwrap();

        assert_eq!(principal.extra["isActive"], "true");
    }

    #[test]
    fn test_debug_redacts_email() {
        let rendered = format!("{:?}", Principal::new("1", "r").with_email("secret@x.io"));
        assert!(!rendered.contains("secret@x.io"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
