//! Concrete content types. Field names match the JSON the backend stores.

use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityKind, RecordMeta};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mentor {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub bio: String,
    pub company: String,
    pub expertise: String,
    pub location: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alumnus {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub bio: String,
    pub company: String,
    pub school: String,
    pub cohort: String,
    pub location: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ambassador {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub bio: String,
    pub school: String,
    pub region: String,
    pub location: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselSlide {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub caption: String,
    pub page: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamMember {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub role: String,
    pub bio: String,
    pub department: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuccessStory {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub title: String,
    pub name: String,
    pub body: String,
    pub program: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicantStatus {
    #[default]
    Pending,
    Reviewing,
    Accepted,
    Rejected,
}

impl ApplicantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicantStatus::Pending => "pending",
            ApplicantStatus::Reviewing => "reviewing",
            ApplicantStatus::Accepted => "accepted",
            ApplicantStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ApplicantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApplicantStatus::Pending),
            "reviewing" => Ok(ApplicantStatus::Reviewing),
            "accepted" => Ok(ApplicantStatus::Accepted),
            "rejected" => Ok(ApplicantStatus::Rejected),
            other => Err(format!("unknown applicant status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Applicant {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    pub email: String,
    pub school: String,
    pub program: String,
    pub location: String,
    pub motivation: String,
    pub status: ApplicantStatus,
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

impl Entity for Mentor {
    const KIND: EntityKind = EntityKind::Mentor;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.bio.as_str(), self.company.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.expertise)
    }

    fn location(&self) -> Option<&str> {
        non_empty(&self.location)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for Alumnus {
    const KIND: EntityKind = EntityKind::Alumnus;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            self.name.as_str(),
            self.bio.as_str(),
            self.company.as_str(),
            self.school.as_str(),
        ]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.cohort)
    }

    fn location(&self) -> Option<&str> {
        non_empty(&self.location)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for Ambassador {
    const KIND: EntityKind = EntityKind::Ambassador;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.bio.as_str(), self.school.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.region)
    }

    fn location(&self) -> Option<&str> {
        non_empty(&self.location)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for CarouselSlide {
    const KIND: EntityKind = EntityKind::CarouselSlide;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.title
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.caption.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.page)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for TeamMember {
    const KIND: EntityKind = EntityKind::TeamMember;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.bio.as_str(), self.role.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.department)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for SuccessStory {
    const KIND: EntityKind = EntityKind::SuccessStory;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.title
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.name.as_str(), self.body.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.program)
    }

    fn image_url_mut(&mut self) -> Option<&mut String> {
        Some(&mut self.image_url)
    }
}

impl Entity for Applicant {
    const KIND: EntityKind = EntityKind::Applicant;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.email.as_str(), self.school.as_str()]
    }

    fn category(&self) -> Option<&str> {
        non_empty(&self.program)
    }

    fn location(&self) -> Option<&str> {
        non_empty(&self.location)
    }
}
