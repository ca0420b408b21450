use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::err::Error;

/// Stored account document. Field names follow the persisted layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "Login")]
    pub login: String,
    #[serde(rename = "Password")]
    pub password: String,
}

/// A stored project submission. `data` holds the uploaded file inlined as a
/// byte sequence; it and `fileName` are either both set or both null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(rename = "sourceLink")]
    pub source_link: Option<String>,
    #[serde(rename = "projectType")]
    pub project_type: String,
    pub semester: i32,
    pub year: i32,
    #[serde(rename = "authorName")]
    pub author_name: String,
    #[serde(
        rename = "dateUploaded",
        with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime"
    )]
    pub date_uploaded: DateTime<Utc>,
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    // absent when a query projects the payload away
    #[serde(default)]
    pub data: Option<Vec<u8>>,
}

/// Identity slot of an inbound submission: clients send `0` (or nothing) for
/// a new record and the hex object id for an existing one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordIdentity {
    Stored(String),
    Fresh(i64),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkSubmission {
    #[serde(rename = "_id", default)]
    pub id: Option<RecordIdentity>,
    pub name: String,
    #[serde(rename = "sourceLink", default)]
    pub source_link: Option<String>,
    #[serde(rename = "projectType")]
    pub project_type: String,
    pub semester: i32,
    pub year: i32,
    #[serde(rename = "authorName")]
    pub author_name: String,
}

impl WorkSubmission {
    /// Resolves the identity slot: `None` means insert a new record.
    pub fn identity(&self) -> Result<Option<ObjectId>, Error> {
        match &self.id {
            None | Some(RecordIdentity::Fresh(0)) => Ok(None),
            Some(RecordIdentity::Fresh(other)) => Err(Error::InvalidPayload {
                message: format!("unexpected numeric record id {}", other),
            }),
            Some(RecordIdentity::Stored(hex)) => Ok(Some(ObjectId::parse_str(hex)?)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "authorName", default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub semester: Option<i32>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_take")]
    pub take: i64,
}

fn default_take() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct PagedWorks {
    pub works: Vec<ProjectRecord>,
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginReport {
    #[serde(rename = "loggedIn")]
    pub logged_in: bool,
    pub message: String,
}
