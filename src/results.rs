use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Company placeholder used when the listing names none
pub const COMPANY_NOT_SPECIFIED: &str = "Not specified";

/// Location placeholder used when the listing names none
pub const LOCATION_WORLDWIDE: &str = "Worldwide";

/// Source tag stamped on every record
pub const SOURCE_TAG: &str = "upwork";

/// Canonical job posting emitted by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Option<String>,

    /// Records are only emitted when this resolved
    pub title: Option<String>,

    pub company: String,

    pub description_text: Option<String>,

    pub description_html: Option<String>,

    /// At most ten, in listing order
    pub skills: Vec<String>,

    pub location: String,

    pub job_type: Option<String>,

    pub experience_level: Option<String>,

    pub budget: Option<String>,

    pub hourly_rate: Option<String>,

    pub duration: Option<String>,

    pub date_posted: Option<String>,

    pub proposals: u64,

    pub client: ClientInfo,

    pub url: Option<String>,

    #[serde(rename = "_source")]
    pub source: String,

    pub captured_at: DateTime<Utc>,
}

/// What the listing reveals about the hiring client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub rating: f64,
    pub reviews: u64,
    pub jobs_posted: u64,
    pub hire_rate: u64,
    pub location: Option<String>,
    pub payment_verified: bool,
    pub total_spent: Option<String>,
}

impl JobRecord {
    /// A record holding only the sentinel defaults
    pub fn empty() -> Self {
        Self {
            job_id: None,
            title: None,
            company: COMPANY_NOT_SPECIFIED.to_string(),
            description_text: None,
            description_html: None,
            skills: Vec::new(),
            location: LOCATION_WORLDWIDE.to_string(),
            job_type: None,
            experience_level: None,
            budget: None,
            hourly_rate: None,
            duration: None,
            date_posted: None,
            proposals: 0,
            client: ClientInfo::default(),
            url: None,
            source: SOURCE_TAG.to_string(),
            captured_at: Utc::now(),
        }
    }

    /// Whether the record may be emitted
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}
