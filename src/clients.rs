//! The `clients` resource the back-office server exposes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FieldError;
use crate::model::{Entity, RecordId};
use crate::view::Searchable;

pub const MAX_NAME_LENGTH: usize = 120;
pub const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Suspended,
}

impl ClientStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    #[must_use]
    pub const fn toggle(self) -> Self {
        match self {
            Self::Active => Self::Suspended,
            Self::Suspended => Self::Active,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: RecordId<u64>,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub status: ClientStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl NewClient {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            company: None,
        }
    }

    #[must_use]
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl ClientPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }
}

fn email_looks_valid(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

impl Entity for Client {
    type Key = u64;
    type Draft = NewClient;
    type Patch = ClientPatch;
    type Status = ClientStatus;

    fn id(&self) -> &RecordId<u64> {
        &self.id
    }

    fn from_draft(id: RecordId<u64>, draft: &NewClient) -> Self {
        Self {
            id,
            name: draft.name.clone(),
            email: draft.email.clone(),
            phone: draft.phone.clone(),
            company: draft.company.clone(),
            status: ClientStatus::Active,
        }
    }

    fn apply_patch(&mut self, patch: &ClientPatch) {
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if let Some(email) = &patch.email {
            self.email.clone_from(email);
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(company) = &patch.company {
            self.company = Some(company.clone());
        }
    }

    fn apply_status(&mut self, status: &ClientStatus) {
        self.status = *status;
    }

    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        let name = self.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "Name is required"));
        } else if name.len() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "name",
                format!("Name must be at most {MAX_NAME_LENGTH} characters"),
            ));
        }
        if self.email.len() > MAX_EMAIL_LENGTH || !email_looks_valid(self.email.trim()) {
            errors.push(FieldError::new("email", "Email address is invalid"));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Searchable for Client {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str(), self.email.as_str()];
        fields.extend(self.phone.as_deref());
        fields.extend(self.company.as_deref());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: u64, name: &str) -> Client {
        Client::from_draft(
            RecordId::Assigned(id),
            &NewClient::new(name, format!("{}@example.com", name.to_lowercase())),
        )
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut c = client(1, "Ada");
        c.apply_patch(&ClientPatch::name("Ada Lovelace"));
        assert_eq!(c.name, "Ada Lovelace");
        assert_eq!(c.email, "ada@example.com");
    }

    #[test]
    fn test_status_toggle() {
        let mut c = client(1, "Ada");
        assert_eq!(c.status, ClientStatus::Active);
        c.apply_status(&c.status.toggle());
        assert_eq!(c.status, ClientStatus::Suspended);
    }

    #[test]
    fn test_validation_reports_each_field() {
        let mut c = client(1, "Ada");
        assert!(c.validate().is_ok());

        c.name = "   ".into();
        c.email = "not-an-email".into();
        let errors = c.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["name", "email"]);
    }

    #[test]
    fn test_json_shape_matches_server() {
        let c: Client = serde_json::from_str(
            r#"{"id": 3, "name": "C", "email": "c@example.com", "status": "suspended"}"#,
        )
        .unwrap();
        assert_eq!(c.id, RecordId::Assigned(3));
        assert_eq!(c.status, ClientStatus::Suspended);
        assert!(c.phone.is_none());

        let patch = serde_json::to_value(ClientPatch::email("x@y.io")).unwrap();
        assert_eq!(patch, serde_json::json!({ "email": "x@y.io" }));
    }

    #[test]
    fn test_search_fields_skip_missing_optionals() {
        let c = client(1, "Ada");
        assert_eq!(c.search_fields().len(), 2);
        let c = Client {
            company: Some("Analytical".into()),
            ..c
        };
        assert!(c.search_fields().contains(&"Analytical"));
    }
}
