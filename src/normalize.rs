use crate::extract::RawJobNode;
use crate::results::{COMPANY_NOT_SPECIFIED, ClientInfo, JobRecord, LOCATION_WORLDWIDE, SOURCE_TAG};
use crate::text::{collapse_whitespace, escape_html, strip_markup};
use chrono::Utc;
use serde_json::Value;
use url::Url;

const MAX_SKILLS: usize = 10;

// Source paths per field, in priority order. Structured-data (schema.org),
// embedded state and DOM-heuristic nodes all use different names.
const JOB_ID: &[&str] = &["/ciphertext", "/id", "/uid", "/jobId", "/identifier/value", "/identifier"];
const TITLE: &[&str] = &["/title", "/jobTitle", "/name"];
const COMPANY: &[&str] = &[
    "/client/companyName",
    "/enterpriseName",
    "/hiringOrganization/name",
    "/companyName",
    "/company",
];
const DESCRIPTION: &[&str] = &["/description", "/snippet", "/descriptionText"];
const SKILLS: &[&str] = &["/skills", "/attrs", "/ontologySkills", "/skillNames"];
const LOCATION: &[&str] = &[
    "/client/location/country",
    "/prefFreelancerLocation",
    "/jobLocation/address/addressCountry",
    "/applicantLocationRequirements/name",
];
const JOB_TYPE: &[&str] = &["/type", "/jobType", "/employmentType", "/contractorTier"];
const EXPERIENCE: &[&str] = &["/tierText", "/tier", "/experienceLevel", "/contractorTier", "/experienceRequirements"];
const DURATION: &[&str] = &["/duration", "/durationIdV3", "/durationLabel", "/engagementDuration/label"];
const DATE_POSTED: &[&str] = &["/createdOn", "/publishedOn", "/createdDateTime", "/datePosted", "/postedOn"];
const PROPOSALS: &[&str] = &["/totalApplicants", "/proposalsTier", "/applicants"];
const URL: &[&str] = &["/url", "/jobUrl", "/link"];
const CLIENT_RATING: &[&str] = &["/client/totalFeedback", "/totalFeedback", "/client/rating"];
const CLIENT_REVIEWS: &[&str] = &["/client/totalReviews"];
const CLIENT_JOBS: &[&str] = &["/client/totalPostedJobs"];
const CLIENT_HIRES: &[&str] = &["/client/totalHires", "/client/hireRate"];
const CLIENT_SPENT: &[&str] = &["/client/totalSpent/amount", "/client/totalSpent"];
const CLIENT_VERIFIED: &[&str] = &[
    "/client/paymentVerificationStatus",
    "/client/verificationStatus",
    "/client/paymentVerified",
];

/// Maps raw nodes of any supported shape onto [`JobRecord`]
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    /// Page the nodes came from; resolves relative links and derives job urls
    base: Option<Url>,
}

impl RecordNormalizer {
    pub fn new(page_url: &str) -> Self {
        Self {
            base: Url::parse(page_url).ok(),
        }
    }

    /// Maps one node. Only a node that is not an object fails (`None`); an
    /// empty object gives a record of sentinel defaults without a title.
    pub fn normalize(&self, node: &RawJobNode) -> Option<JobRecord> {
        let value = node.value();
        if !value.is_object() {
            ::log::warn!("Skipping malformed job node: expected an object, got {}", kind(value));
            return None;
        }

        let mut record = JobRecord::empty();
        record.job_id = first_string(value, JOB_ID);
        record.title = first_string(value, TITLE)
            .map(|t| strip_markup(&t))
            .filter(|t| !t.is_empty());
        record.company = first_string(value, COMPANY)
            .map(|c| collapse_whitespace(&c))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| COMPANY_NOT_SPECIFIED.to_string());

        if let Some(description) = first_string(value, DESCRIPTION) {
            let text = strip_markup(&description);
            if !text.is_empty() {
                record.description_html = Some(if description.contains('<') {
                    description.trim().to_string()
                } else {
                    format!("<p>{}</p>", escape_html(&text))
                });
                record.description_text = Some(text);
            }
        }

        record.skills = skills(value);
        record.location = location(value).unwrap_or_else(|| LOCATION_WORLDWIDE.to_string());
        record.job_type = first_string(value, JOB_TYPE);
        record.experience_level = first_string(value, EXPERIENCE);
        record.budget = budget(value);
        record.hourly_rate = hourly_rate(value);
        record.duration = first_string(value, DURATION);
        record.date_posted = first_string(value, DATE_POSTED);
        record.proposals = first_present(value, PROPOSALS).and_then(leading_count).unwrap_or(0);
        record.client = client(value);
        record.url = self.job_url(value, record.job_id.as_deref());
        record.source = SOURCE_TAG.to_string();
        record.captured_at = Utc::now();

        Some(record)
    }

    fn job_url(&self, value: &Value, job_id: Option<&str>) -> Option<String> {
        if let Some(url) = first_string(value, URL) {
            return Some(match self.base.as_ref().and_then(|b| b.join(&url).ok()) {
                Some(resolved) => resolved.to_string(),
                None => url,
            });
        }
        let id = job_id?;
        let base = self.base.as_ref()?;
        Some(format!("{}/jobs/{}", base.origin().ascii_serialization(), id))
    }
}

/// First path holding something other than null or an empty string
fn first_present<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|p| {
        value.pointer(p).filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    })
}

/// First path whose value renders as a nonempty scalar string
fn first_string(value: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| value.pointer(p).and_then(scalar_string))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn skills(value: &Value) -> Vec<String> {
    let Some(raw) = first_present(value, SKILLS) else {
        return Vec::new();
    };
    let names = match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => first_string(item, &["/prettyName", "/name", "/prefLabel"]),
                other => scalar_string(other),
            })
            .collect::<Vec<_>>(),
        Value::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    names
        .into_iter()
        .filter(|s| !s.is_empty())
        .take(MAX_SKILLS)
        .collect()
}

fn location(value: &Value) -> Option<String> {
    match first_present(value, LOCATION)? {
        Value::Array(items) => {
            let names = items.iter().filter_map(scalar_string).collect::<Vec<_>>();
            (!names.is_empty()).then(|| names.join(", "))
        }
        other => scalar_string(other),
    }
}

/// Fixed budget. Numbers become currency strings; hourly salaries are left to
/// [`hourly_rate`].
fn budget(value: &Value) -> Option<String> {
    if let Some(amount) = value.pointer("/amount/amount").and_then(currency) {
        return Some(amount);
    }
    match value.get("budget") {
        Some(Value::Object(_)) => {
            if let Some(amount) = value.pointer("/budget/amount").and_then(currency) {
                return Some(amount);
            }
        }
        Some(other) => {
            if let Some(amount) = currency(other) {
                return Some(amount);
            }
        }
        None => {}
    }
    if let Some(salary) = value.get("baseSalary") {
        if !is_hourly_salary(salary) {
            return ["/value/value", "/value"]
                .iter()
                .find_map(|p| salary.pointer(p).and_then(currency));
        }
    }
    None
}

fn hourly_rate(value: &Value) -> Option<String> {
    let min = value.get("hourlyBudgetMin").or_else(|| value.pointer("/hourlyBudget/min"));
    let max = value.get("hourlyBudgetMax").or_else(|| value.pointer("/hourlyBudget/max"));
    if let Some(range) = rate_range(min, max) {
        return Some(range);
    }
    if let Some(text) = value.get("hourlyBudgetText").and_then(scalar_string) {
        return Some(text);
    }
    let salary = value.get("baseSalary").filter(|s| is_hourly_salary(s))?;
    rate_range(
        salary.pointer("/value/minValue"),
        salary.pointer("/value/maxValue"),
    )
    .or_else(|| {
        salary
            .pointer("/value/value")
            .and_then(currency)
            .map(|v| format!("{}/hr", v))
    })
}

fn is_hourly_salary(salary: &Value) -> bool {
    salary
        .pointer("/value/unitText")
        .and_then(Value::as_str)
        .is_some_and(|u| u.eq_ignore_ascii_case("hour"))
}

/// `$min-$max/hr`, or a single bound when only one is known
fn rate_range(min: Option<&Value>, max: Option<&Value>) -> Option<String> {
    let min = min.and_then(currency);
    let max = max.and_then(currency);
    match (min, max) {
        (Some(min), Some(max)) => Some(format!("{}-{}/hr", min, max)),
        (Some(one), None) | (None, Some(one)) => Some(format!("{}/hr", one)),
        (None, None) => None,
    }
}

/// Renders a numeric (or numeric-string) amount as a dollar string. Other
/// strings pass through untouched.
fn currency(value: &Value) -> Option<String> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.replace(',', "").parse::<f64>() {
                Ok(n) => n,
                Err(_) => return Some(trimmed.to_string()),
            }
        }
        _ => return None,
    };
    if amount <= 0.0 {
        return None;
    }
    Some(if amount.fract() == 0.0 {
        format!("${:.0}", amount)
    } else {
        format!("${:.2}", amount)
    })
}

/// Leading integer of a number or a string such as "10 to 15"
fn leading_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => {
            let digits = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn client(value: &Value) -> ClientInfo {
    let number = |paths: &[&str]| first_present(value, paths).and_then(Value::as_f64);
    let count = |paths: &[&str]| first_present(value, paths).and_then(leading_count).unwrap_or(0);

    ClientInfo {
        rating: number(CLIENT_RATING).unwrap_or(0.0),
        reviews: count(CLIENT_REVIEWS),
        jobs_posted: count(CLIENT_JOBS),
        hire_rate: count(CLIENT_HIRES),
        location: value
            .pointer("/client/location/country")
            .and_then(scalar_string),
        payment_verified: CLIENT_VERIFIED.iter().any(|p| match value.pointer(p) {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("verified"),
            _ => false,
        }),
        total_spent: CLIENT_SPENT.iter().find_map(|p| match value.pointer(p) {
            Some(v @ Value::Number(_)) => currency(v),
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
