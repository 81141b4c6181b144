use thiserror::Error;
use url::Url;

use crate::models::{JobCandidate, JobFields, JobKey, RawJob};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("job has no title")]
    MissingTitle,

    #[error("job '{0}' has no company name")]
    MissingCompany(String),
}

/// Cleans a raw card into a candidate keyed by (title, company name).
pub fn normalize(raw: RawJob, base: &Url) -> Result<JobCandidate, Rejection> {
    let title = clean(&raw.title);
    if title.is_empty() {
        return Err(Rejection::MissingTitle);
    }
    let company = clean(&raw.company);
    if company.is_empty() {
        return Err(Rejection::MissingCompany(title));
    }

    Ok(JobCandidate {
        key: JobKey { title, company },
        fields: JobFields {
            link: raw.href.as_deref().map(|h| absolute_link(h, base)).unwrap_or_default(),
            location: clean_opt(raw.location.as_deref()),
            experience: clean_opt(raw.experience.as_deref()),
            education: clean_opt(raw.education.as_deref()),
            employment_type: clean_opt(raw.employment_type.as_deref()),
            deadline: clean_opt(raw.deadline.as_deref()),
            sector: clean_opt(raw.sector.as_deref()),
            salary: clean_opt(raw.salary.as_deref()),
        },
    })
}

/// Trims and collapses runs of whitespace into single spaces.
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_opt(text: Option<&str>) -> String {
    text.map(clean).unwrap_or_default()
}

/// Resolves a possibly relative href against the site origin. Anything that
/// cannot be resolved becomes an empty link.
pub fn absolute_link(href: &str, base: &Url) -> String {
    let href = href.trim();
    if href.is_empty() || href.starts_with("javascript:") || href == "#" {
        return String::new();
    }
    base.join(href).map(|u| u.to_string()).unwrap_or_default()
}
