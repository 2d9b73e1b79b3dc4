use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Resident,
    Visitor,
}

impl Role {
    pub fn as_db(&self) -> &'static str {
        match self {
            Role::Resident => "resident",
            Role::Visitor => "visitor",
        }
    }

    pub fn from_db(s: &str) -> Option<Role> {
        match s {
            "resident" => Some(Role::Resident),
            "visitor" => Some(Role::Visitor),
            _ => None,
        }
    }
}

/// A ticket holder who has registered an identity commitment.
///
/// Role and creation order are immutable for the lifetime of the record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Participant {
    pub uuid: Uuid,
    /// Identity commitment as compressed hex.
    pub commitment: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub residence: String,
    pub order_id: String,
}

/// A ticket-holder row as synced from the ticketing system, before (or
/// regardless of) commitment registration.
#[derive(Clone, Debug)]
pub struct TicketHolder {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub residence: String,
    pub order_id: String,
    pub email_token: Option<String>,
    /// Present once the holder registered a commitment.
    pub commitment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendLoginEmailRequest {
    pub email: String,
    /// Identity commitment as compressed hex.
    pub commitment: String,
    /// Allow replacing an already registered commitment.
    pub force: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendLoginEmailResponse {
    /// Populated only in dev bypass mode; normally the token goes by email.
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmLoginRequest {
    pub email: String,
    pub token: String,
    pub commitment: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DbCounts {
    pub n_ticket_holders: u64,
    pub n_commitments: u64,
    pub n_e2ee: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupCount {
    pub group_id: String,
    pub members: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub time: DateTime<Utc>,
    pub db: DbCounts,
    pub groups: Vec<GroupCount>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadBlobRequest {
    pub blob_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadBlobResponse {
    pub encrypted_blob: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveBlobRequest {
    pub blob_key: String,
    pub encrypted_blob: serde_json::Value,
}
