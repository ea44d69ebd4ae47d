use regex::Regex;

use crate::models::AppStatus;

// Phrase groups checked in fixed priority order. An email mentioning both
// "viewed" and "interview" classifies as interview_requested regardless of
// where the phrases sit in the text.
const OFFER_PHRASES: &str = r"offer|congratulations|pleased to offer|we'd like to offer";
const INTERVIEW_PHRASES: &str =
    r"interview|phone screen|video call|meet with|speak with you|schedule a call";
const REJECTION_PHRASES: &str =
    r"unfortunately|not moving forward|position.*filled|regret|decided not to|other candidate";
const VIEWED_PHRASES: &str = r"viewed|reviewed|looked at|seen your application";

/// Map an email to a lifecycle stage. Pure and total: always returns a value,
/// defaulting to `pending` when no phrase group matches.
pub fn classify(subject: &str, snippet: &str, body: &str) -> AppStatus {
    let text = format!("{} {} {}", subject, snippet, body).to_lowercase();

    if matches_group(&text, OFFER_PHRASES) {
        return AppStatus::Offer;
    }
    if matches_group(&text, INTERVIEW_PHRASES) {
        return AppStatus::InterviewRequested;
    }
    if matches_group(&text, REJECTION_PHRASES) {
        return AppStatus::Rejected;
    }
    if matches_group(&text, VIEWED_PHRASES) {
        return AppStatus::Viewed;
    }

    AppStatus::Pending
}

fn matches_group(text: &str, pattern: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
