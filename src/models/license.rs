use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Trial,
    Active,
    Expired,
    Suspended,
}

impl LicenseStatus {
    /// Statuses the scheduler scans.
    pub fn is_running(self) -> bool {
        matches!(self, LicenseStatus::Trial | LicenseStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: String,
    pub company_id: String,
    pub status: LicenseStatus,
    pub start_date: i64,
    /// None = never auto-expires
    pub end_date: Option<i64>,
    pub grace_period_days: u32,
    pub suspended_at: Option<i64>,
    pub suspended_by: Option<String>,
    pub suspended_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLicense {
    pub company_id: String,
    #[serde(default = "default_status")]
    pub status: LicenseStatus,
    pub start_date: i64,
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub grace_period_days: u32,
}

fn default_status() -> LicenseStatus {
    LicenseStatus::Active
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseAction {
    Created,
    /// Also used for expiry warnings, with `warning_days` in the metadata
    Extended,
    Suspended,
    Resumed,
    Expired,
}

/// Append-only audit trail entry scoped to one license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseActivity {
    pub id: String,
    pub license_id: String,
    pub action: LicenseAction,
    pub actor: String,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

#[derive(Debug, Serialize)]
pub struct LicenseWithActivity {
    #[serde(flatten)]
    pub license: License,
    pub activity: Vec<LicenseActivity>,
}
