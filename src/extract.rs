use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ai::{self, AiProvider};
use crate::models::{EmploymentType, WorkLocation};

pub const UNKNOWN_COMPANY: &str = "Unknown Company";
pub const UNKNOWN_POSITION: &str = "Unknown Position";

/// Best-effort job fields pulled out of one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedJob {
    pub company: String,
    pub position: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub work_mode: Option<WorkLocation>,
    pub employment_type: Option<EmploymentType>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub linkedin_url: Option<String>,
}

impl Default for ExtractedJob {
    fn default() -> Self {
        Self {
            company: UNKNOWN_COMPANY.to_string(),
            position: UNKNOWN_POSITION.to_string(),
            location: None,
            salary: None,
            work_mode: None,
            employment_type: None,
            industry: None,
            company_size: None,
            linkedin_url: None,
        }
    }
}

/// Memoizes extraction results by (subject, snippet prefix) so reprocessing
/// the same message within a session does not re-invoke the oracle.
#[derive(Debug, Default)]
pub struct ExtractionCache {
    entries: HashMap<String, ExtractedJob>,
}

impl ExtractionCache {
    pub fn key(subject: &str, snippet: &str) -> String {
        let prefix: String = snippet.chars().take(100).collect();
        format!("{}::{}", subject, prefix)
    }

    pub fn get(&self, key: &str) -> Option<&ExtractedJob> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, value: ExtractedJob) {
        self.entries.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Extraction front door: oracle-primary with deterministic regex fallback.
/// Never fails - worst case is the "Unknown ..." sentinels.
pub struct Extractor {
    provider: Option<Box<dyn AiProvider>>,
    cache: ExtractionCache,
}

impl Extractor {
    pub fn new(provider: Option<Box<dyn AiProvider>>) -> Self {
        Self {
            provider,
            cache: ExtractionCache::default(),
        }
    }

    pub fn extract(&mut self, subject: &str, snippet: &str, body: &str) -> ExtractedJob {
        self.extract_with(subject, snippet, body, false)
    }

    pub fn extract_with(
        &mut self,
        subject: &str,
        snippet: &str,
        body: &str,
        force_refresh: bool,
    ) -> ExtractedJob {
        let key = ExtractionCache::key(subject, snippet);
        if !force_refresh {
            if let Some(cached) = self.cache.get(&key) {
                return cached.clone();
            }
        }

        let mut result = match &self.provider {
            Some(provider) => match ai::extract_job_info(provider.as_ref(), subject, snippet, body)
            {
                Ok(extracted) => extracted,
                Err(e) => {
                    log::warn!("oracle extraction failed, falling back to heuristics: {e}");
                    heuristic_extract(subject, snippet, body)
                }
            },
            None => heuristic_extract(subject, snippet, body),
        };

        // The oracle sometimes returns its own "unknown" markers; backfill
        // those from the heuristics before they become part of a dedup key.
        if result.company.trim().is_empty() || result.company == UNKNOWN_COMPANY {
            result.company = heuristic_company(subject, snippet).unwrap_or_else(|| UNKNOWN_COMPANY.to_string());
        }
        if result.position.trim().is_empty() || result.position == UNKNOWN_POSITION {
            result.position =
                heuristic_position(subject, snippet, body).unwrap_or_else(|| UNKNOWN_POSITION.to_string());
        }

        self.cache.insert(key, result.clone());
        result
    }

    #[allow(dead_code)]
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Deterministic fallback path: phrase-anchored regexes over the concatenated
/// text. Degrades to the "Unknown ..." sentinels rather than erroring.
pub fn heuristic_extract(subject: &str, snippet: &str, body: &str) -> ExtractedJob {
    let full: String = format!("{} {} {}", subject, snippet, body)
        .chars()
        .take(2000)
        .collect();

    let mut out = ExtractedJob::default();

    // Two-part anchors first: they pin company and position together.
    if let Some((company, position)) = capture_pair(
        &full,
        r"(?i)(?:application was sent to|applied to|submitted your application to)\s+([A-Za-z][\w\s&.,'-]{0,50}?)\s+(?:for|–|-)\s+([A-Za-z][\w\s,/()&.-]{2,80})",
    ) {
        out.company = trim_company(&company);
        out.position = position.trim().to_string();
    } else if let Some((company, position)) = capture_pair(
        &full,
        r"(?i)([A-Za-z][\w\s&.,'-]{0,50}?)\s+(?:viewed|received|reviewed)\s.*?application.*?(?:for|–|-)\s+([A-Za-z][\w\s,/()&.-]{2,80})",
    ) {
        out.company = trim_company(&company);
        out.position = position.trim().to_string();
    } else {
        if let Some(company) = heuristic_company(subject, snippet) {
            out.company = company;
        }
        if let Some(position) = heuristic_position(subject, snippet, body) {
            out.position = position;
        }
    }

    if let Some(location) = capture_one(&full, r"(?i)(?:location:|based in|office:)\s*([^,.\n]{2,60})") {
        out.location = Some(location.trim().to_string());
    }
    out.salary = extract_salary(&full);
    out.linkedin_url = extract_linkedin_url(&full);
    out.work_mode = sniff_work_mode(&full);
    out.employment_type = sniff_employment_type(&full);

    out
}

fn heuristic_company(subject: &str, snippet: &str) -> Option<String> {
    let text = format!("{} {}", subject, snippet);
    if let Some(company) = capture_one(
        &text,
        r"(?i)(?:application was sent to|applied to|at company:?)\s+([^,.\n]{1,60})",
    ) {
        return Some(trim_company(&company));
    }
    // "Acme viewed your application" - company sits before the verb
    if let Some(company) = capture_one(&text, r"(?i)^([^:\n]{2,50}?)\s+viewed") {
        return Some(trim_company(&company));
    }
    if let Some(company) = capture_one(&text, r"(?i)\b(?:at|with|from)\s+([A-Z][\w\s&.'-]{2,50}?)(?:[,.\n]|$)") {
        return Some(trim_company(&company));
    }
    None
}

fn heuristic_position(subject: &str, snippet: &str, body: &str) -> Option<String> {
    let text: String = format!("{} {} {}", subject, snippet, body)
        .chars()
        .take(1000)
        .collect();
    if let Some(position) = capture_one(
        &text,
        r"(?i)(?:position:|role:|job title:|for the position of|for position)\s*([^,.\n]{2,60})",
    ) {
        return Some(position.trim().to_string());
    }
    if let Some(position) = capture_one(
        &text,
        r"(?i)\b((?:Senior|Junior|Lead|Principal|Staff|Director|Manager|Engineer|Developer|Analyst|Designer|Architect|Specialist|Coordinator|Administrator|Executive|Consultant|Associate)[\w\s,/()&.-]{0,60})",
    ) {
        return Some(position.trim().to_string());
    }
    None
}

pub fn extract_salary(text: &str) -> Option<String> {
    capture_whole(
        text,
        r"(?i)\$[\d,]+(?:\s*-\s*\$[\d,]+)?(?:\s*(?:per|/)\s*(?:year|hour|hr|annually))?",
    )
}

pub fn extract_linkedin_url(text: &str) -> Option<String> {
    capture_whole(text, r"(?i)https?://(?:www\.)?linkedin\.com/jobs/view/\d+")
}

fn sniff_work_mode(text: &str) -> Option<WorkLocation> {
    let lower = text.to_lowercase();
    if lower.contains("hybrid") {
        Some(WorkLocation::Hybrid)
    } else if lower.contains("on-site") || lower.contains("onsite") {
        Some(WorkLocation::Onsite)
    } else if lower.contains("remote") {
        Some(WorkLocation::Remote)
    } else {
        None
    }
}

fn sniff_employment_type(text: &str) -> Option<EmploymentType> {
    let lower = text.to_lowercase();
    if lower.contains("full-time") || lower.contains("full time") {
        Some(EmploymentType::FullTime)
    } else if lower.contains("part-time") || lower.contains("part time") {
        Some(EmploymentType::PartTime)
    } else if lower.contains("internship") || lower.contains("intern ") {
        Some(EmploymentType::Internship)
    } else if lower.contains("temporary") {
        Some(EmploymentType::Temporary)
    } else if lower.contains("contract") {
        Some(EmploymentType::Contract)
    } else {
        None
    }
}

fn trim_company(raw: &str) -> String {
    raw.trim().trim_end_matches([',', '.']).trim().to_string()
}

fn capture_pair(text: &str, pattern: &str) -> Option<(String, String)> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(text)?;
    let first = caps.get(1)?.as_str().to_string();
    let second = caps.get(2)?.as_str().to_string();
    Some((first, second))
}

fn capture_one(text: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let caps = re.captures(text)?;
    Some(caps.get(1)?.as_str().to_string())
}

fn capture_whole(text: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    Some(re.find(text)?.as_str().to_string())
}
