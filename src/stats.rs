use crate::models::{AppStatus, ApplicationRec, Stats};

/// Pure derived view over a record set. Empty input yields all zeros.
pub fn compute_stats(records: &[ApplicationRec]) -> Stats {
    let total = records.len();
    let viewed = count(records, AppStatus::Viewed);
    let interviews = count(records, AppStatus::InterviewRequested);
    let offers = count(records, AppStatus::Offer);
    let rejected = count(records, AppStatus::Rejected);

    let responded = viewed + interviews + offers + rejected;
    let response_rate = if total > 0 {
        responded as f64 / total as f64
    } else {
        0.0
    };

    let response_times: Vec<f64> = records
        .iter()
        .filter_map(|r| {
            r.response_date
                .map(|rd| (rd - r.application_date).num_days().abs() as f64)
        })
        .collect();
    let avg_response_time = if response_times.is_empty() {
        0.0
    } else {
        response_times.iter().sum::<f64>() / response_times.len() as f64
    };

    Stats {
        total,
        viewed,
        interviews,
        offers,
        rejected,
        response_rate,
        avg_response_time,
    }
}

fn count(records: &[ApplicationRec], status: AppStatus) -> usize {
    records.iter().filter(|r| r.status == status).count()
}

/// CSV serialization of a record set, one row per application.
pub fn export_csv(records: &[ApplicationRec]) -> String {
    let headers = [
        "Company",
        "Position",
        "Location",
        "Status",
        "Applied Date",
        "Days Since",
        "View Date",
        "Response Date",
        "Salary Range",
        "Employment Type",
        "Work Location",
        "LinkedIn URL",
        "Notes",
    ];

    let mut out = String::new();
    out.push_str(&headers.join(","));
    out.push('\n');

    for rec in records {
        let row = [
            escape_csv(&rec.company),
            escape_csv(&rec.position),
            escape_csv(&rec.location),
            rec.status.to_string(),
            rec.application_date.format("%Y-%m-%d").to_string(),
            rec.days_since_application.to_string(),
            rec.view_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            rec.response_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            escape_csv(rec.salary_range.as_deref().unwrap_or("")),
            rec.employment_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_default(),
            rec.work_location
                .map(|w| w.as_str().to_string())
                .unwrap_or_default(),
            escape_csv(rec.linkedin_url.as_deref().unwrap_or("")),
            escape_csv(rec.notes.as_deref().unwrap_or("")),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

fn escape_csv(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
