use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::extract::{ExtractedJob, UNKNOWN_COMPANY, UNKNOWN_POSITION};
use crate::models::{
    ApplicationRec, CandidateProfile, EmploymentType, MatchScore, WorkLocation,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// --- Provider trait ---

pub trait AiProvider: Send + Sync {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
    #[allow(dead_code)]
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    match name {
        // OpenAI (requires OPENAI_API_KEY)
        "gpt-4o-mini" | "mini" => Ok(ModelSpec {
            provider: ProviderKind::OpenAi,
            model_id: "gpt-4o-mini".to_string(),
            short_name: "gpt-4o-mini".to_string(),
        }),
        "gpt-4o" => Ok(ModelSpec {
            provider: ProviderKind::OpenAi,
            model_id: "gpt-4o".to_string(),
            short_name: "gpt-4o".to_string(),
        }),
        // Anthropic (requires ANTHROPIC_API_KEY)
        "claude-sonnet" | "sonnet" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-5-20250929".to_string(),
            short_name: "claude-sonnet".to_string(),
        }),
        "claude-haiku" | "haiku" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-haiku-4-5-20251001".to_string(),
            short_name: "claude-haiku".to_string(),
        }),
        _ => Err(anyhow!(
            "Unknown model '{}'. Available: gpt-4o-mini (default), gpt-4o, claude-sonnet, claude-haiku",
            name
        )),
    }
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn AiProvider>> {
    match spec.provider {
        ProviderKind::Anthropic => {
            let provider = AnthropicProvider::new(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
        ProviderKind::OpenAi => {
            let provider = OpenAiProvider::new(spec.model_id.clone())?;
            Ok(Box::new(provider))
        }
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        Self::with_key(model_id, api_key)
    }

    pub fn with_key(model_id: String, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            api_key,
            model_id,
            client,
        })
    }
}

impl AiProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicResponse = response
            .json()
            .context("Failed to parse Anthropic API response")?;

        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| anyhow!("No content in Anthropic API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAiProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key =
            env::var("OPENAI_API_KEY").context("OPENAI_API_KEY environment variable not set")?;
        Self::with_key(model_id, api_key)
    }

    pub fn with_key(model_id: String, api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            api_key,
            model_id,
            client,
        })
    }
}

impl AiProvider for OpenAiProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = OpenAiRequest {
            model: self.model_id.clone(),
            max_tokens,
            // Low temperature keeps extraction stable across retries
            temperature: 0.1,
            messages: vec![OpenAiMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiResponse = response
            .json()
            .context("Failed to parse OpenAI API response")?;

        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("No choices in OpenAI API response"))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Extraction oracle contract ---

/// Lenient wire shape for the extraction response. Unknown enum strings are
/// dropped rather than failing the whole parse.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExtraction {
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    salary: Option<String>,
    #[serde(default)]
    work_mode: Option<String>,
    #[serde(default)]
    employment_type: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    company_size: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
}

pub fn extract_job_info(
    provider: &dyn AiProvider,
    subject: &str,
    snippet: &str,
    body: &str,
) -> Result<ExtractedJob> {
    let body_excerpt: String = body.chars().take(3000).collect();
    let prompt = format!(
        "Extract job application information from this email. Return ONLY a JSON object.\n\n\
        EMAIL CONTENT:\n\
        Subject: {subject}\n\
        Preview: {snippet}\n\
        Body: {body_excerpt}\n\n\
        EXTRACTION RULES:\n\
        1. This might be a follow-up email about a job (viewed, interview, rejection)\n\
        2. Extract the ACTUAL company name, not generic terms like \"employer\" or \"recruiter\"\n\
        3. Extract the SPECIFIC job title\n\
        4. For \"viewed\" emails, company and position should match the original application\n\
        5. Company names follow phrases like \"at\", \"with\", \"from\", or precede \"viewed\"\n\
        6. Job titles follow \"for\", \"position\", \"role\", or appear in quotes\n\n\
        REQUIRED JSON FORMAT:\n\
        {{\n\
          \"company\": \"Actual company name (required)\",\n\
          \"position\": \"Specific job title (required)\",\n\
          \"location\": \"City, State or 'Remote' or country\",\n\
          \"salary\": \"Salary range if mentioned\",\n\
          \"workMode\": \"remote\" | \"hybrid\" | \"onsite\",\n\
          \"employmentType\": \"full_time\" | \"part_time\" | \"contract\" | \"temporary\" | \"internship\",\n\
          \"industry\": \"Industry sector if identifiable\",\n\
          \"companySize\": \"Company size if mentioned\",\n\
          \"linkedinUrl\": \"LinkedIn job posting URL if present\"\n\
        }}\n\n\
        Return ONLY the JSON object, no explanation."
    );

    let response = provider.complete(&prompt, 500)?;
    let cleaned = strip_code_fences(&response);
    let raw: RawExtraction =
        serde_json::from_str(cleaned).context("Extraction oracle returned malformed JSON")?;

    Ok(ExtractedJob {
        company: non_empty(raw.company).unwrap_or_else(|| UNKNOWN_COMPANY.to_string()),
        position: non_empty(raw.position).unwrap_or_else(|| UNKNOWN_POSITION.to_string()),
        location: non_empty(raw.location),
        salary: non_empty(raw.salary),
        work_mode: raw.work_mode.as_deref().and_then(parse_work_mode),
        employment_type: raw.employment_type.as_deref().and_then(parse_employment_type),
        industry: non_empty(raw.industry),
        company_size: non_empty(raw.company_size),
        linkedin_url: non_empty(raw.linkedin_url),
    })
}

fn parse_work_mode(s: &str) -> Option<WorkLocation> {
    match s.trim().to_lowercase().as_str() {
        "remote" => Some(WorkLocation::Remote),
        "hybrid" => Some(WorkLocation::Hybrid),
        "onsite" | "on-site" | "on_site" => Some(WorkLocation::Onsite),
        _ => None,
    }
}

fn parse_employment_type(s: &str) -> Option<EmploymentType> {
    match s.trim().to_lowercase().as_str() {
        "full_time" | "full-time" | "full time" => Some(EmploymentType::FullTime),
        "part_time" | "part-time" | "part time" => Some(EmploymentType::PartTime),
        "contract" => Some(EmploymentType::Contract),
        "temporary" => Some(EmploymentType::Temporary),
        "internship" => Some(EmploymentType::Internship),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

// --- Scoring oracle contract ---

#[derive(Debug, Default, Deserialize)]
struct RawScore {
    #[serde(default)]
    overall: f64,
    #[serde(default)]
    skills: f64,
    #[serde(default)]
    experience: f64,
    #[serde(default)]
    location: f64,
    #[serde(default)]
    salary: f64,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

pub fn score_match(
    provider: &dyn AiProvider,
    record: &ApplicationRec,
    profile: &CandidateProfile,
) -> Result<MatchScore> {
    let work_mode = record
        .work_location
        .map(|w| w.as_str().to_string())
        .unwrap_or_else(|| "Not specified".to_string());
    let prompt = format!(
        "Analyze how well this job application matches the candidate.\n\n\
        JOB DETAILS:\n\
        Company: {}\n\
        Position: {}\n\
        Location: {}\n\
        Salary: {}\n\
        Work Mode: {}\n\n\
        CANDIDATE PROFILE:\n{}\n\n\
        Provide a realistic match analysis in this JSON format:\n\
        {{\n\
          \"overall\": <0-100 overall match score>,\n\
          \"skills\": <0-100 skills match score>,\n\
          \"experience\": <0-100 experience match score>,\n\
          \"location\": <0-100 location match score>,\n\
          \"salary\": <0-100 salary match score>,\n\
          \"reasons\": [<2-3 key reasons for the score>],\n\
          \"suggestions\": [<2-3 suggestions to improve candidacy>]\n\
        }}\n\n\
        Be realistic and critical. Respond ONLY with the JSON object, no additional text.",
        record.company,
        record.position,
        record.location,
        record.salary_range.as_deref().unwrap_or("Not specified"),
        work_mode,
        profile.resume
    );

    let response = provider.complete(&prompt, 500)?;
    let cleaned = strip_code_fences(&response);
    let raw: RawScore =
        serde_json::from_str(cleaned).context("Scoring oracle returned malformed JSON")?;

    Ok(MatchScore {
        overall: clamp_score(raw.overall),
        skills: clamp_score(raw.skills),
        experience: clamp_score(raw.experience),
        location: clamp_score(raw.location),
        salary: clamp_score(raw.salary),
        reasons: raw.reasons,
        suggestions: raw.suggestions,
        calculated_at: Utc::now(),
    })
}

/// Defined fallback when the scoring oracle is unreachable or returns garbage.
pub fn neutral_score() -> MatchScore {
    MatchScore {
        overall: 50,
        skills: 50,
        experience: 50,
        location: 50,
        salary: 50,
        reasons: vec!["Unable to calculate match score".to_string()],
        suggestions: vec!["Check the scoring model configuration and try again".to_string()],
        calculated_at: Utc::now(),
    }
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Oracles often wrap JSON in markdown fences despite instructions.
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        response: String,
    }

    impl AiProvider for FixedProvider {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Ok(self.response.clone())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn sample_record() -> ApplicationRec {
        serde_json::from_value(serde_json::json!({
            "id": "acme::engineer",
            "company": "Acme",
            "position": "Engineer",
            "location": "Remote",
            "applicationDate": "2026-01-15T12:00:00Z",
            "status": "pending",
            "daysSinceApplication": 0,
            "responseRate": 0.0,
            "emailIds": {"response": []},
            "statusHistory": []
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_model_openai() {
        let spec = resolve_model("gpt-4o-mini").unwrap();
        assert!(matches!(spec.provider, ProviderKind::OpenAi));
        assert_eq!(spec.model_id, "gpt-4o-mini");

        let spec = resolve_model("mini").unwrap();
        assert_eq!(spec.short_name, "gpt-4o-mini");
    }

    #[test]
    fn test_resolve_model_anthropic() {
        let spec = resolve_model("sonnet").unwrap();
        assert!(matches!(spec.provider, ProviderKind::Anthropic));

        let spec = resolve_model("claude-haiku").unwrap();
        assert_eq!(spec.short_name, "claude-haiku");
    }

    #[test]
    fn test_resolve_model_unknown() {
        assert!(resolve_model("gpt-3").is_err());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_job_info_parses_fenced_json() {
        let provider = FixedProvider {
            response: "```json\n{\"company\": \"Globex\", \"position\": \"Staff Engineer\", \"workMode\": \"Remote\"}\n```".to_string(),
        };
        let out = extract_job_info(&provider, "s", "n", "b").unwrap();
        assert_eq!(out.company, "Globex");
        assert_eq!(out.position, "Staff Engineer");
        assert_eq!(out.work_mode, Some(WorkLocation::Remote));
    }

    #[test]
    fn test_extract_job_info_defaults_missing_required_fields() {
        let provider = FixedProvider {
            response: r#"{"location": "Austin, TX"}"#.to_string(),
        };
        let out = extract_job_info(&provider, "s", "n", "b").unwrap();
        assert_eq!(out.company, UNKNOWN_COMPANY);
        assert_eq!(out.position, UNKNOWN_POSITION);
        assert_eq!(out.location, Some("Austin, TX".to_string()));
    }

    #[test]
    fn test_extract_job_info_drops_unknown_enum_values() {
        let provider = FixedProvider {
            response: r#"{"company": "A", "position": "B", "employmentType": "freelance", "workMode": "moon"}"#
                .to_string(),
        };
        let out = extract_job_info(&provider, "s", "n", "b").unwrap();
        assert_eq!(out.employment_type, None);
        assert_eq!(out.work_mode, None);
    }

    #[test]
    fn test_extract_job_info_malformed_is_error() {
        let provider = FixedProvider {
            response: "I could not find a job in this email.".to_string(),
        };
        assert!(extract_job_info(&provider, "s", "n", "b").is_err());
    }

    #[test]
    fn test_score_match_parses_and_clamps() {
        let provider = FixedProvider {
            response: r#"{"overall": 87.4, "skills": 120, "experience": -5, "location": 70, "salary": 60, "reasons": ["strong overlap"], "suggestions": ["highlight cloud work"]}"#
                .to_string(),
        };
        let profile = CandidateProfile {
            resume: "resume text".to_string(),
        };
        let score = score_match(&provider, &sample_record(), &profile).unwrap();
        assert_eq!(score.overall, 87);
        assert_eq!(score.skills, 100);
        assert_eq!(score.experience, 0);
        assert_eq!(score.reasons, vec!["strong overlap"]);
    }

    #[test]
    fn test_score_match_malformed_is_error() {
        let provider = FixedProvider {
            response: "no json here".to_string(),
        };
        let profile = CandidateProfile {
            resume: String::new(),
        };
        assert!(score_match(&provider, &sample_record(), &profile).is_err());
    }

    #[test]
    fn test_neutral_score_shape() {
        let score = neutral_score();
        assert_eq!(score.overall, 50);
        assert!(!score.reasons.is_empty());
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe {
            env::remove_var("OPENAI_API_KEY");
        }

        let result = OpenAiProvider::new("gpt-4o-mini".to_string());

        if let Some(val) = original {
            unsafe {
                env::set_var("OPENAI_API_KEY", val);
            }
        }

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("OPENAI_API_KEY"));
    }
}
