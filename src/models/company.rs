use serde::{Deserialize, Serialize};

use super::LicenseStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Preferred recipient for license notices
    pub contact_email: Option<String>,
    /// Mirror of the current license's status (None until a license exists)
    pub license_status: Option<LicenseStatus>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Company {
    /// Address license notices go to: the contact email, else the company email.
    pub fn notice_recipient(&self) -> Option<&str> {
        notice_recipient(&self.contact_email, &self.email)
    }
}

/// First non-blank of `contact_email` and `email`.
pub fn notice_recipient<'a>(
    contact_email: &'a Option<String>,
    email: &'a Option<String>,
) -> Option<&'a str> {
    let usable = |e: &&str| !e.trim().is_empty();
    contact_email
        .as_deref()
        .filter(usable)
        .or_else(|| email.as_deref().filter(usable))
}

#[derive(Debug, Deserialize)]
pub struct CreateCompany {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
}
