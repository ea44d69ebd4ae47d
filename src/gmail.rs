use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const PAGE_SIZE: u32 = 100;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One fetched email, flattened to the fields the pipeline consumes.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub date: DateTime<Utc>,
    pub snippet: String,
    pub body: String,
}

/// Search/fetch boundary of the mail provider. The sync engine only sees this
/// trait, so tests drive it with an in-memory fake.
pub trait MailStore {
    fn search(&self, query: &str) -> Result<Vec<String>>;
    fn fetch(&self, id: &str) -> Result<EmailMessage>;
}

// --- Category search queries ---

const APPLICATION_SENT_QUERIES: &[&str] = &[
    r#"from:jobs-noreply@linkedin.com "application was sent""#,
    r#"from:jobs-noreply@linkedin.com "applied to""#,
    r#"from:linkedin.com subject:"application sent""#,
    r#"from:linkedin.com "submitted your application""#,
];

const APPLICATION_VIEWED_QUERIES: &[&str] = &[
    r#"from:jobs-noreply@linkedin.com "viewed your application""#,
    r#"from:linkedin.com "employer viewed""#,
    r#"from:linkedin.com subject:"application viewed""#,
];

const INTERVIEW_QUERIES: &[&str] = &[
    r#"from:linkedin.com "interview" OR "phone screen" OR "video call""#,
    r#"subject:"interview" from:linkedin.com"#,
];

const REJECTION_QUERIES: &[&str] = &[
    r#"from:linkedin.com "unfortunately" OR "not moving forward" OR "position filled""#,
    r#"from:linkedin.com "regret to inform""#,
];

const OFFER_QUERIES: &[&str] = &[
    r#"from:linkedin.com "offer" OR "congratulations""#,
    r#"from:linkedin.com "next steps" subject:"offer""#,
];

/// All category queries, each constrained to the lookback window.
pub fn build_queries(after_epoch: i64) -> Vec<String> {
    [
        APPLICATION_SENT_QUERIES,
        APPLICATION_VIEWED_QUERIES,
        INTERVIEW_QUERIES,
        REJECTION_QUERIES,
        OFFER_QUERIES,
    ]
    .iter()
    .flat_map(|group| group.iter())
    .map(|q| format!("{} after:{}", q, after_epoch))
    .collect()
}

// --- Gmail REST wire types ---

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: Option<String>,
    payload: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

// --- Client ---

pub struct GmailClient {
    client: reqwest::blocking::Client,
    token: String,
}

impl GmailClient {
    pub fn new(token: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { client, token })
    }

    /// Address of the authenticated account, for the sync banner.
    pub fn profile(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/profile", GMAIL_API_BASE))
            .bearer_auth(&self.token)
            .send()
            .context("Failed to fetch Gmail profile")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Gmail profile request failed with status {}",
                response.status()
            ));
        }

        let profile: Profile = response.json().context("Failed to parse Gmail profile")?;
        Ok(profile.email_address)
    }
}

impl MailStore for GmailClient {
    fn search(&self, query: &str) -> Result<Vec<String>> {
        let max_results = PAGE_SIZE.to_string();
        let response = self
            .client
            .get(format!("{}/messages", GMAIL_API_BASE))
            .bearer_auth(&self.token)
            .query(&[("q", query), ("maxResults", max_results.as_str())])
            .send()
            .context("Failed to list Gmail messages")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Gmail search failed with status {} for query {:?}",
                response.status(),
                query
            ));
        }

        let list: MessageList = response
            .json()
            .context("Failed to parse Gmail message list")?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    fn fetch(&self, id: &str) -> Result<EmailMessage> {
        let response = self
            .client
            .get(format!("{}/messages/{}", GMAIL_API_BASE, id))
            .bearer_auth(&self.token)
            .query(&[("format", "full")])
            .send()
            .with_context(|| format!("Failed to fetch Gmail message {}", id))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Gmail fetch failed with status {} for message {}",
                response.status(),
                id
            ));
        }

        let detail: MessageDetail = response
            .json()
            .context("Failed to parse Gmail message detail")?;
        Ok(into_email_message(detail))
    }
}

fn into_email_message(detail: MessageDetail) -> EmailMessage {
    let payload = detail.payload.unwrap_or_default();
    let subject = header_val(&payload, "Subject");
    let from = header_val(&payload, "From");
    let date = parse_message_date(&header_val(&payload, "Date"), detail.internal_date.as_deref());
    let body = decode_body(&payload).unwrap_or_default();

    EmailMessage {
        id: detail.id,
        subject,
        from,
        date,
        snippet: detail.snippet,
        body,
    }
}

fn header_val(payload: &Payload, name: &str) -> String {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Date header first, then Gmail's millisecond `internalDate`, then now.
fn parse_message_date(header: &str, internal: Option<&str>) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(header.trim()) {
        return parsed.with_timezone(&Utc);
    }
    if let Some(millis) = internal.and_then(|s| s.parse::<i64>().ok()) {
        if let Some(ts) = DateTime::from_timestamp_millis(millis) {
            return ts;
        }
    }
    Utc::now()
}

/// Walk MIME parts for a text body: text/plain preferred, text/html flattened
/// to plain text as a fallback.
fn decode_body(payload: &Payload) -> Option<String> {
    if let Some(text) = find_part_text(payload, "text/plain") {
        return Some(text);
    }
    find_part_text(payload, "text/html").map(|html| html_to_text(&html))
}

fn find_part_text(payload: &Payload, target_mime: &str) -> Option<String> {
    if payload.mime_type == target_mime {
        if let Some(body) = &payload.body {
            if let Some(data) = &body.data {
                return decode_url_safe_base64(data);
            }
        }
    }
    for part in &payload.parts {
        if let Some(text) = find_part_text(part, target_mime) {
            return Some(text);
        }
    }
    None
}

fn decode_url_safe_base64(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}
