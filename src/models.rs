use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of an application. Display updates are governed by
/// `priority()`, not declaration order: a rejection outranks a view, an
/// interview request outranks a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Pending,
    Viewed,
    Rejected,
    InterviewRequested,
    Offer,
}

impl AppStatus {
    pub fn priority(self) -> u8 {
        match self {
            AppStatus::Pending => 0,
            AppStatus::Viewed => 1,
            AppStatus::Rejected => 2,
            AppStatus::InterviewRequested => 3,
            AppStatus::Offer => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Pending => "pending",
            AppStatus::Viewed => "viewed",
            AppStatus::Rejected => "rejected",
            AppStatus::InterviewRequested => "interview_requested",
            AppStatus::Offer => "offer",
        }
    }

    pub fn parse(s: &str) -> Option<AppStatus> {
        match s {
            "pending" => Some(AppStatus::Pending),
            "viewed" => Some(AppStatus::Viewed),
            "rejected" => Some(AppStatus::Rejected),
            "interview_requested" | "interview" => Some(AppStatus::InterviewRequested),
            "offer" => Some(AppStatus::Offer),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A new classification only replaces the displayed status when it is strictly
/// higher priority. Ties and regressions keep the current status.
pub fn should_update_status(current: AppStatus, candidate: AppStatus) -> bool {
    candidate.priority() > current.priority()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Temporary,
    Internship,
}

impl EmploymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmploymentType::FullTime => "full_time",
            EmploymentType::PartTime => "part_time",
            EmploymentType::Contract => "contract",
            EmploymentType::Temporary => "temporary",
            EmploymentType::Internship => "internship",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkLocation {
    Remote,
    Hybrid,
    Onsite,
}

impl WorkLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkLocation::Remote => "remote",
            WorkLocation::Hybrid => "hybrid",
            WorkLocation::Onsite => "onsite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    Email,
    Manual,
    Linkedin,
}

/// One entry in an application's append-only status log. Email-sourced events
/// carry the producing message id so a re-sync can recognize messages it has
/// already folded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: AppStatus,
    pub timestamp: DateTime<Utc>,
    pub source: StatusSource,
    #[serde(rename = "emailId", skip_serializing_if = "Option::is_none", default)]
    pub email_id: Option<String>,
}

/// Message-id buckets linking a record back to the emails that built it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailRefs {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub viewed: Option<String>,
    #[serde(default)]
    pub response: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchScore {
    pub overall: u8,
    pub skills: u8,
    pub experience: u8,
    pub location: u8,
    pub salary: u8,
    pub reasons: Vec<String>,
    pub suggestions: Vec<String>,
    pub calculated_at: DateTime<Utc>,
}

/// Canonical per-application record. `id` is the dedup key and never changes;
/// `status`, `view_date`, and `response_date` are caches derived from
/// `status_history` after every merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRec {
    pub id: String,
    pub company: String,
    pub position: String,
    pub location: String,
    pub application_date: DateTime<Utc>,
    pub status: AppStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub view_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub salary_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub employment_type: Option<EmploymentType>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub work_location: Option<WorkLocation>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub company_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub company_logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recruiter_name: Option<String>,
    pub days_since_application: i64,
    pub response_rate: f64,
    pub email_ids: EmailRefs,
    pub status_history: Vec<StatusEvent>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact_info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_steps: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub match_score: Option<MatchScore>,
}

/// Aggregate view over a record set, for the stats command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total: usize,
    pub viewed: usize,
    pub interviews: usize,
    pub offers: usize,
    pub rejected: usize,
    pub response_rate: f64,
    pub avg_response_time: f64,
}

/// Candidate side of the match-scoring contract.
#[derive(Debug, Clone)]
pub struct CandidateProfile {
    pub resume: String,
}
