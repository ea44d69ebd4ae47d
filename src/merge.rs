use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::extract::ExtractedJob;
use crate::models::{
    AppStatus, ApplicationRec, EmailRefs, StatusEvent, StatusSource, should_update_status,
};

/// Stable identity for an application: the normalized job-posting URL when one
/// was extracted, otherwise lowercased company::position. Exact-match only -
/// "Google" and "Google LLC" intentionally produce distinct records.
pub fn dedup_key(extracted: &ExtractedJob) -> String {
    if let Some(url) = &extracted.linkedin_url {
        if !url.trim().is_empty() {
            return url.trim().to_lowercase();
        }
    }
    format!("{}::{}", extracted.company, extracted.position).to_lowercase()
}

/// In-memory key -> record accumulator for one sync run. Seeded from the
/// persisted records so merging is resumable across runs.
#[derive(Debug, Default)]
pub struct WorkingSet {
    records: BTreeMap<String, ApplicationRec>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<ApplicationRec>) -> Self {
        let mut map = BTreeMap::new();
        for rec in records {
            map.insert(rec.id.clone(), rec);
        }
        Self { records: map }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &str) -> Option<&ApplicationRec> {
        self.records.get(key)
    }

    /// Fold one classified email into the record for `key`. Safe to call in
    /// any message order and safe to re-call for an already-merged message id.
    pub fn merge(
        &mut self,
        key: &str,
        extracted: &ExtractedJob,
        status: AppStatus,
        timestamp: DateTime<Utc>,
        message_id: &str,
        subject: &str,
    ) {
        let rec = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| new_record(key, extracted, timestamp, subject));

        if rec.id != key {
            // A seeded record under the wrong key would corrupt every merge
            // that follows; drop the message instead.
            log::error!(
                "dedup key mismatch: record id {:?} stored under key {:?}, skipping message {}",
                rec.id,
                key,
                message_id
            );
            return;
        }

        if rec
            .status_history
            .iter()
            .any(|e| e.email_id.as_deref() == Some(message_id))
        {
            log::debug!("message {} already merged into {}, skipping", message_id, key);
            return;
        }

        rec.status_history.push(StatusEvent {
            status,
            timestamp,
            source: StatusSource::Email,
            email_id: Some(message_id.to_string()),
        });
        rec.status_history.sort_by_key(|e| e.timestamp);

        refresh_derived(rec);
        update_email_refs(rec, status, timestamp, message_id);
        fill_missing_fields(rec, extracted);
        rec.days_since_application = (Utc::now() - rec.application_date).num_days();
    }

    pub fn into_records(self) -> Vec<ApplicationRec> {
        self.records.into_values().collect()
    }
}

fn new_record(
    key: &str,
    extracted: &ExtractedJob,
    timestamp: DateTime<Utc>,
    subject: &str,
) -> ApplicationRec {
    ApplicationRec {
        id: key.to_string(),
        company: extracted.company.clone(),
        position: extracted.position.clone(),
        location: extracted
            .location
            .clone()
            .unwrap_or_else(|| "Remote".to_string()),
        application_date: timestamp,
        status: AppStatus::Pending,
        view_date: None,
        response_date: None,
        description: if subject.is_empty() {
            None
        } else {
            Some(subject.to_string())
        },
        linkedin_url: extracted.linkedin_url.clone(),
        salary_range: extracted.salary.clone(),
        employment_type: extracted.employment_type,
        work_location: extracted.work_mode,
        company_size: extracted.company_size.clone(),
        industry: extracted.industry.clone(),
        company_logo: None,
        recruiter_name: None,
        days_since_application: 0,
        response_rate: 0.0,
        email_ids: EmailRefs::default(),
        status_history: Vec::new(),
        notes: None,
        contact_info: None,
        next_steps: None,
        match_score: None,
    }
}

/// Recompute the cached scalars from the history log. The log is ground
/// truth: `status` is max(priority), `view_date` the earliest viewed event,
/// `response_date` the earliest real response.
fn refresh_derived(rec: &mut ApplicationRec) {
    let mut status = AppStatus::Pending;
    for event in &rec.status_history {
        if should_update_status(status, event.status) {
            status = event.status;
        }
    }
    rec.status = status;

    rec.view_date = rec
        .status_history
        .iter()
        .filter(|e| e.status == AppStatus::Viewed)
        .map(|e| e.timestamp)
        .min();

    rec.response_date = rec
        .status_history
        .iter()
        .filter(|e| e.status.priority() >= AppStatus::Rejected.priority())
        .map(|e| e.timestamp)
        .min();
}

/// Bucket rules: `application` keeps the earliest-dated pending message,
/// `viewed` the latest-dated viewed message, everything else accumulates in
/// `response`. Ties break on message id so any processing order agrees.
fn update_email_refs(
    rec: &mut ApplicationRec,
    status: AppStatus,
    timestamp: DateTime<Utc>,
    message_id: &str,
) {
    match status {
        AppStatus::Pending => {
            let replace = match &rec.email_ids.application {
                None => true,
                Some(current) => match event_timestamp(rec, current) {
                    Some(current_ts) => {
                        timestamp < current_ts
                            || (timestamp == current_ts && message_id < current.as_str())
                    }
                    None => true,
                },
            };
            if replace {
                rec.email_ids.application = Some(message_id.to_string());
            }
        }
        AppStatus::Viewed => {
            let replace = match &rec.email_ids.viewed {
                None => true,
                Some(current) => match event_timestamp(rec, current) {
                    Some(current_ts) => {
                        timestamp > current_ts
                            || (timestamp == current_ts && message_id > current.as_str())
                    }
                    None => true,
                },
            };
            if replace {
                rec.email_ids.viewed = Some(message_id.to_string());
            }
        }
        _ => {
            if let Err(pos) = rec.email_ids.response.binary_search(&message_id.to_string()) {
                rec.email_ids.response.insert(pos, message_id.to_string());
            }
        }
    }
}

fn event_timestamp(rec: &ApplicationRec, message_id: &str) -> Option<DateTime<Utc>> {
    rec.status_history
        .iter()
        .find(|e| e.email_id.as_deref() == Some(message_id))
        .map(|e| e.timestamp)
}

/// Later emails only fill descriptive fields that are still unset; they never
/// overwrite what the first extraction produced.
fn fill_missing_fields(rec: &mut ApplicationRec, extracted: &ExtractedJob) {
    if rec.salary_range.is_none() {
        rec.salary_range = extracted.salary.clone();
    }
    if rec.linkedin_url.is_none() {
        rec.linkedin_url = extracted.linkedin_url.clone();
    }
    if rec.employment_type.is_none() {
        rec.employment_type = extracted.employment_type;
    }
    if rec.work_location.is_none() {
        rec.work_location = extracted.work_mode;
    }
    if rec.company_size.is_none() {
        rec.company_size = extracted.company_size.clone();
    }
    if rec.industry.is_none() {
        rec.industry = extracted.industry.clone();
    }
}

/// Append a user-entered status change through the same state-machine gate.
pub fn apply_manual_event(rec: &mut ApplicationRec, status: AppStatus, timestamp: DateTime<Utc>) {
    rec.status_history.push(StatusEvent {
        status,
        timestamp,
        source: StatusSource::Manual,
        email_id: None,
    });
    rec.status_history.sort_by_key(|e| e.timestamp);
    refresh_derived(rec);
    rec.days_since_application = (Utc::now() - rec.application_date).num_days();
}

/// Fraction of records that got any response, stamped onto every record.
pub fn stamp_response_rate(records: &mut [ApplicationRec]) {
    let total = records.len();
    if total == 0 {
        return;
    }
    let responded = records
        .iter()
        .filter(|r| r.status != AppStatus::Pending)
        .count();
    let rate = responded as f64 / total as f64;
    for rec in records.iter_mut() {
        rec.response_rate = rate;
    }
}
