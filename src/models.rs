use serde::{Deserialize, Serialize};

pub type CompanyId = i64;
pub type JobId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Mutable company attributes, refreshed last-write-wins on every sighting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyFields {
    pub location: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub company_id: CompanyId,
    pub company_name: String, // denormalized for display
    pub title: String,
    pub link: String,
    pub location: String,
    pub experience: String,
    pub education: String,
    pub employment_type: String,
    pub deadline: String,
    pub sector: String,
    pub salary: String,
    pub sightings: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Text pulled out of one job card, before any cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawJob {
    pub title: String,
    pub company: String,
    pub href: Option<String>,
    pub location: Option<String>,
    pub experience: Option<String>,
    pub education: Option<String>,
    pub employment_type: Option<String>,
    pub deadline: Option<String>,
    pub sector: Option<String>,
    pub salary: Option<String>,
}

/// Natural key of a posting before its company has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub title: String,
    pub company: String,
}

/// Scraped job fields overwritten on every sighting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFields {
    pub link: String,
    pub location: String,
    pub experience: String,
    pub education: String,
    pub employment_type: String,
    pub deadline: String,
    pub sector: String,
    pub salary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCandidate {
    pub key: JobKey,
    pub fields: JobFields,
}

impl JobCandidate {
    pub fn title(&self) -> &str {
        &self.key.title
    }

    pub fn company(&self) -> &str {
        &self.key.company
    }

    pub fn company_fields(&self) -> CompanyFields {
        let description = if self.fields.sector.is_empty() {
            "No description provided".to_string()
        } else {
            self.fields.sector.clone()
        };
        CompanyFields {
            location: self.fields.location.clone(),
            description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted(JobId),
    Updated(JobId),
}

impl WriteOutcome {
    pub fn id(&self) -> JobId {
        match self {
            WriteOutcome::Inserted(id) | WriteOutcome::Updated(id) => *id,
        }
    }
}
