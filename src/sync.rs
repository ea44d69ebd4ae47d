use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};

use crate::ai::{self, AiProvider};
use crate::classify::classify;
use crate::extract::Extractor;
use crate::gmail::{self, MailStore};
use crate::merge::{WorkingSet, dedup_key, stamp_response_rate};
use crate::models::{ApplicationRec, CandidateProfile, MatchScore};

/// Concurrent scoring calls in flight at once. Bounds the oracle request rate.
const SCORE_FAN_OUT: usize = 4;

pub struct SyncOptions {
    pub lookback_days: u32,
    pub force_score: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            force_score: false,
        }
    }
}

/// Aggregate outcome signal: callers see "processed N of M", not individual
/// message failures.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub messages_found: usize,
    pub processed: usize,
    pub failed: usize,
    pub queries_failed: usize,
    pub aborted: bool,
}

pub struct SyncOutcome {
    pub records: Vec<ApplicationRec>,
    pub report: SyncReport,
}

/// Drives one batch: search queries, fetch + classify + extract + merge per
/// message, response-rate stamping, then the scoring pass. One run at a time;
/// overlapping callers are refused via the busy flag.
pub struct SyncEngine {
    mail: Box<dyn MailStore>,
    extractor: Extractor,
    scorer: Option<Box<dyn AiProvider>>,
    profile: Option<CandidateProfile>,
    busy: AtomicBool,
    cancel: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(mail: Box<dyn MailStore>, extractor: Extractor) -> Self {
        Self {
            mail,
            extractor,
            scorer: None,
            profile: None,
            busy: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn AiProvider>, profile: CandidateProfile) -> Self {
        self.scorer = Some(scorer);
        self.profile = Some(profile);
        self
    }

    #[allow(dead_code)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Shared flag a driver can set to stop the run at the next checkpoint.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(
        &mut self,
        existing: Vec<ApplicationRec>,
        opts: &SyncOptions,
        progress: &mut dyn FnMut(&str, f64),
    ) -> Result<SyncOutcome> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("sync already in progress"));
        }
        let outcome = self.run_inner(existing, opts, progress);
        self.busy.store(false, Ordering::SeqCst);
        outcome
    }

    fn run_inner(
        &mut self,
        existing: Vec<ApplicationRec>,
        opts: &SyncOptions,
        progress: &mut dyn FnMut(&str, f64),
    ) -> Result<SyncOutcome> {
        let mut report = SyncReport::default();

        // Search phase: union message ids across all category queries. A
        // message matching several queries is fetched once.
        let after_epoch = (Utc::now() - Duration::days(opts.lookback_days as i64)).timestamp();
        let queries = gmail::build_queries(after_epoch);
        let mut ids = BTreeSet::new();
        for (i, query) in queries.iter().enumerate() {
            progress(
                &format!("Searching emails... ({}/{})", i + 1, queries.len()),
                i as f64 / queries.len() as f64 * 0.3,
            );
            match self.mail.search(query) {
                Ok(found) => ids.extend(found),
                Err(e) => {
                    log::warn!("search query {:?} failed: {e}", query);
                    report.queries_failed += 1;
                }
            }
        }

        let ids: Vec<String> = ids.into_iter().collect();
        report.messages_found = ids.len();

        // Fetch/merge phase. Per-message failures are logged and counted,
        // never propagated.
        let mut set = WorkingSet::from_records(existing);
        for (i, id) in ids.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                report.aborted = true;
                break;
            }
            progress(
                &format!("Processing emails... ({}/{})", i + 1, ids.len()),
                0.3 + i as f64 / ids.len() as f64 * 0.6,
            );
            match self.process_message(&mut set, id) {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    log::warn!("failed to process message {id}: {e}");
                    report.failed += 1;
                }
            }
        }

        progress("Computing response rates...", 0.9);
        let mut records = set.into_records();
        let now = Utc::now();
        for rec in records.iter_mut() {
            rec.days_since_application = (now - rec.application_date).num_days();
        }
        stamp_response_rate(&mut records);

        if self.cancel.load(Ordering::SeqCst) {
            report.aborted = true;
        } else if let (Some(scorer), Some(profile)) = (&self.scorer, &self.profile) {
            score_records(
                scorer.as_ref(),
                profile,
                &mut records,
                opts.force_score,
                progress,
            );
        }

        progress("Done", 1.0);
        Ok(SyncOutcome { records, report })
    }

    fn process_message(&mut self, set: &mut WorkingSet, id: &str) -> Result<()> {
        let msg = self.mail.fetch(id)?;
        log::debug!("message {} from {:?}: {:?}", msg.id, msg.from, msg.subject);
        let status = classify(&msg.subject, &msg.snippet, &msg.body);
        let extracted = self.extractor.extract(&msg.subject, &msg.snippet, &msg.body);
        let key = dedup_key(&extracted);
        set.merge(&key, &extracted, status, msg.date, &msg.id, &msg.subject);
        Ok(())
    }
}

/// Score every record lacking a match score (all of them when forced).
/// Bounded fan-out: each call reads its own record and writes its own slot.
fn score_records(
    provider: &dyn AiProvider,
    profile: &CandidateProfile,
    records: &mut [ApplicationRec],
    force: bool,
    progress: &mut dyn FnMut(&str, f64),
) {
    let targets: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| force || r.match_score.is_none())
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        return;
    }

    let total = targets.len();
    let mut done = 0usize;
    for chunk in targets.chunks(SCORE_FAN_OUT) {
        let mut results: Vec<(usize, MatchScore)> = Vec::with_capacity(chunk.len());
        {
            let shared: &[ApplicationRec] = records;
            std::thread::scope(|s| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&idx| {
                        let rec = &shared[idx];
                        s.spawn(move || {
                            let score =
                                ai::score_match(provider, rec, profile).unwrap_or_else(|e| {
                                    log::warn!("match scoring failed for {}: {e}", rec.id);
                                    ai::neutral_score()
                                });
                            (idx, score)
                        })
                    })
                    .collect();
                for handle in handles {
                    if let Ok(result) = handle.join() {
                        results.push(result);
                    }
                }
            });
        }
        for (idx, score) in results {
            records[idx].match_score = Some(score);
        }
        done += chunk.len();
        progress(
            &format!("Scoring matches... ({}/{})", done, total),
            0.9 + 0.1 * done as f64 / total as f64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::EmailMessage;
    use crate::models::AppStatus;
    use chrono::{DateTime, TimeZone};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, hour, 0, 0).unwrap()
    }

    fn msg(id: &str, subject: &str, at: DateTime<Utc>) -> EmailMessage {
        EmailMessage {
            id: id.to_string(),
            subject: subject.to_string(),
            from: "jobs-noreply@linkedin.com".to_string(),
            date: at,
            snippet: String::new(),
            body: String::new(),
        }
    }

    struct FakeMail {
        messages: HashMap<String, EmailMessage>,
        fail_fetch: HashSet<String>,
        fail_queries_containing: Option<&'static str>,
    }

    impl FakeMail {
        fn with_messages(messages: Vec<EmailMessage>) -> Self {
            Self {
                messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
                fail_fetch: HashSet::new(),
                fail_queries_containing: None,
            }
        }
    }

    impl MailStore for FakeMail {
        fn search(&self, query: &str) -> Result<Vec<String>> {
            if let Some(fragment) = self.fail_queries_containing {
                if query.contains(fragment) {
                    return Err(anyhow!("search exploded"));
                }
            }
            Ok(self.messages.keys().cloned().collect())
        }

        fn fetch(&self, id: &str) -> Result<EmailMessage> {
            if self.fail_fetch.contains(id) {
                return Err(anyhow!("fetch exploded"));
            }
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow!("no such message"))
        }
    }

    struct CountingScorer {
        calls: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl AiProvider for CountingScorer {
        fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(anyhow!("oracle down"));
            }
            Ok(r#"{"overall": 80, "skills": 75, "experience": 85, "location": 90, "salary": 60, "reasons": ["fit"], "suggestions": []}"#.to_string())
        }

        fn model_name(&self) -> &str {
            "counting-scorer"
        }
    }

    fn engine(mail: FakeMail) -> SyncEngine {
        SyncEngine::new(Box::new(mail), Extractor::new(None))
    }

    #[test]
    fn test_sync_merges_messages_into_records() {
        let mail = FakeMail::with_messages(vec![
            msg("m1", "Your application was sent to Acme Corp", ts(1)),
            msg("m2", "Acme Corp viewed your application", ts(2)),
        ]);
        let mut engine = engine(mail);

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();

        assert_eq!(outcome.report.messages_found, 2);
        assert_eq!(outcome.report.processed, 2);
        assert_eq!(outcome.report.failed, 0);
        assert_eq!(outcome.records.len(), 1);

        let rec = &outcome.records[0];
        assert_eq!(rec.company, "Acme Corp");
        assert_eq!(rec.status, AppStatus::Viewed);
        assert_eq!(rec.status_history.len(), 2);
        assert!((rec.response_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_message_failure_does_not_abort_batch() {
        let mut mail = FakeMail::with_messages(vec![
            msg("m1", "Your application was sent to Acme Corp", ts(1)),
            msg("m2", "Your application was sent to Globex", ts(2)),
        ]);
        mail.fail_fetch.insert("m1".to_string());
        let mut engine = engine(mail);

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();

        assert_eq!(outcome.report.processed, 1);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_failed_query_does_not_abort_remaining_queries() {
        let mut mail =
            FakeMail::with_messages(vec![msg("m1", "Your application was sent to Acme Corp", ts(1))]);
        mail.fail_queries_containing = Some("interview");
        let mut engine = engine(mail);

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();

        assert!(outcome.report.queries_failed > 0);
        assert_eq!(outcome.report.processed, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_untouched_records_get_days_refreshed() {
        let mail = FakeMail::with_messages(vec![]);
        let mut engine = engine(mail);

        let extracted = crate::extract::ExtractedJob {
            company: "Acme".to_string(),
            position: "Engineer".to_string(),
            ..Default::default()
        };
        let key = dedup_key(&extracted);
        let mut set = WorkingSet::new();
        set.merge(&key, &extracted, AppStatus::Pending, ts(1), "m1", "");
        let mut records = set.into_records();
        records[0].days_since_application = -1;

        let outcome = engine
            .run(records, &SyncOptions::default(), &mut |_, _| {})
            .unwrap();
        assert!(outcome.records[0].days_since_application > 0);
    }

    #[test]
    fn test_busy_guard_refuses_overlapping_run() {
        let mail = FakeMail::with_messages(vec![]);
        let mut engine = engine(mail);
        engine.busy.store(true, Ordering::SeqCst);

        let result = engine.run(Vec::new(), &SyncOptions::default(), &mut |_, _| {});
        assert!(result.is_err());

        engine.busy.store(false, Ordering::SeqCst);
        assert!(!engine.is_busy());
        assert!(
            engine
                .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
                .is_ok()
        );
    }

    #[test]
    fn test_cancel_flag_aborts_between_phases() {
        let mail = FakeMail::with_messages(vec![
            msg("m1", "Your application was sent to Acme Corp", ts(1)),
        ]);
        let mut engine = engine(mail);
        engine.cancel_flag().store(true, Ordering::SeqCst);

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();

        assert!(outcome.report.aborted);
        assert_eq!(outcome.report.processed, 0);
    }

    #[test]
    fn test_progress_is_monotonic_and_reaches_one() {
        let mail = FakeMail::with_messages(vec![
            msg("m1", "Your application was sent to Acme Corp", ts(1)),
            msg("m2", "Your application was sent to Globex", ts(2)),
        ]);
        let mut engine = engine(mail);

        let mut fractions = Vec::new();
        engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, frac| {
                fractions.push(frac)
            })
            .unwrap();

        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*fractions.last().unwrap(), 1.0);
    }

    #[test]
    fn test_scoring_skips_already_scored_records() {
        let calls = Arc::new(Mutex::new(0));
        let scorer = CountingScorer {
            calls: Arc::clone(&calls),
            fail: false,
        };

        // Build a record with a score already attached
        let mail = FakeMail::with_messages(vec![msg(
            "m1",
            "Your application was sent to Acme Corp",
            ts(1),
        )]);
        let mut engine = engine(mail).with_scorer(
            Box::new(scorer),
            CandidateProfile {
                resume: "resume".to_string(),
            },
        );

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        let scored_at = outcome.records[0].match_score.as_ref().unwrap().calculated_at;

        // Second run re-syncs the same mail; the record already has a score
        let outcome = engine
            .run(outcome.records, &SyncOptions::default(), &mut |_, _| {})
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(
            outcome.records[0].match_score.as_ref().unwrap().calculated_at,
            scored_at
        );
    }

    #[test]
    fn test_force_score_recomputes() {
        let calls = Arc::new(Mutex::new(0));
        let scorer = CountingScorer {
            calls: Arc::clone(&calls),
            fail: false,
        };
        let mail = FakeMail::with_messages(vec![msg(
            "m1",
            "Your application was sent to Acme Corp",
            ts(1),
        )]);
        let mut engine = engine(mail).with_scorer(
            Box::new(scorer),
            CandidateProfile {
                resume: "resume".to_string(),
            },
        );

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();
        let opts = SyncOptions {
            force_score: true,
            ..SyncOptions::default()
        };
        engine.run(outcome.records, &opts, &mut |_, _| {}).unwrap();
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_scorer_failure_yields_neutral_default() {
        let scorer = CountingScorer {
            calls: Arc::new(Mutex::new(0)),
            fail: true,
        };
        let mail = FakeMail::with_messages(vec![msg(
            "m1",
            "Your application was sent to Acme Corp",
            ts(1),
        )]);
        let mut engine = engine(mail).with_scorer(
            Box::new(scorer),
            CandidateProfile {
                resume: "resume".to_string(),
            },
        );

        let outcome = engine
            .run(Vec::new(), &SyncOptions::default(), &mut |_, _| {})
            .unwrap();
        let score = outcome.records[0].match_score.as_ref().unwrap();
        assert_eq!(score.overall, 50);
        assert!(!score.reasons.is_empty());
    }
}
