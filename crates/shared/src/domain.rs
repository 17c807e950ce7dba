use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(RecordId);

/// Every content collection the site administers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mentor,
    Alumnus,
    Ambassador,
    CarouselSlide,
    TeamMember,
    SuccessStory,
    Applicant,
}

/// How a collection is persisted after local edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveShape {
    /// One POST/PUT per edited record.
    PerRecord,
    /// The whole ordered collection in a single PUT.
    WholeCollection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Mentor,
        EntityKind::Alumnus,
        EntityKind::Ambassador,
        EntityKind::CarouselSlide,
        EntityKind::TeamMember,
        EntityKind::SuccessStory,
        EntityKind::Applicant,
    ];

    /// URL path segment used by the backend routes.
    pub fn path_segment(self) -> &'static str {
        match self {
            EntityKind::Mentor => "mentors",
            EntityKind::Alumnus => "alumni",
            EntityKind::Ambassador => "ambassadors",
            EntityKind::CarouselSlide => "carousels",
            EntityKind::TeamMember => "team-members",
            EntityKind::SuccessStory => "success-stories",
            EntityKind::Applicant => "applicants",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == segment)
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Mentor => "mentor",
            EntityKind::Alumnus => "alumnus",
            EntityKind::Ambassador => "ambassador",
            EntityKind::CarouselSlide => "carousel slide",
            EntityKind::TeamMember => "team member",
            EntityKind::SuccessStory => "success story",
            EntityKind::Applicant => "applicant",
        }
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            EntityKind::Mentor | EntityKind::Alumnus | EntityKind::Ambassador => &["slug", "name"],
            EntityKind::CarouselSlide => &["slug", "title", "image_url"],
            EntityKind::TeamMember => &["slug", "name", "role"],
            EntityKind::SuccessStory => &["slug", "title", "name"],
            EntityKind::Applicant => &["slug", "name", "email"],
        }
    }

    /// Field backing the server-side `category` query parameter.
    pub fn category_field(self) -> &'static str {
        match self {
            EntityKind::Mentor => "expertise",
            EntityKind::Alumnus => "cohort",
            EntityKind::Ambassador => "region",
            EntityKind::CarouselSlide => "page",
            EntityKind::TeamMember => "department",
            EntityKind::SuccessStory | EntityKind::Applicant => "program",
        }
    }

    /// Field backing the server-side `status` query parameter.
    pub fn status_field(self) -> Option<&'static str> {
        match self {
            EntityKind::Applicant => Some("status"),
            _ => None,
        }
    }

    pub fn has_public_listing(self) -> bool {
        self != EntityKind::Applicant
    }

    /// Whether `order` is meaningful for display. Applicants are listed in
    /// submission order.
    pub fn is_ordered(self) -> bool {
        self != EntityKind::Applicant
    }

    pub fn save_shape(self) -> SaveShape {
        match self {
            EntityKind::CarouselSlide | EntityKind::TeamMember => SaveShape::WholeCollection,
            _ => SaveShape::PerRecord,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEntityKind(pub String);

impl fmt::Display for UnknownEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown collection '{}'", self.0)
    }
}

impl std::error::Error for UnknownEntityKind {}

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::from_path_segment(s.trim()).ok_or_else(|| UnknownEntityKind(s.to_string()))
    }
}

fn default_active() -> bool {
    true
}

/// Fields every record carries regardless of its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self {
            id: None,
            slug: String::new(),
            order: 0,
            active: true,
        }
    }
}

/// A typed record of one content collection.
///
/// The collection controller only ever touches the [`RecordMeta`] part and
/// the read-only accessors below; everything else is form data.
pub trait Entity:
    Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    fn meta(&self) -> &RecordMeta;
    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Identifying text shown in confirmation prompts.
    fn display_name(&self) -> &str;

    /// Free-text fields matched by the admin search box.
    fn search_fields(&self) -> Vec<&str>;

    fn category(&self) -> Option<&str> {
        None
    }

    fn location(&self) -> Option<&str> {
        None
    }

    /// Mutable handle on the image URL, for kinds that display one.
    fn image_url_mut(&mut self) -> Option<&mut String> {
        None
    }

    fn id(&self) -> Option<RecordId> {
        self.meta().id
    }

    fn slug(&self) -> &str {
        &self.meta().slug
    }

    fn order(&self) -> i64 {
        self.meta().order
    }

    fn active(&self) -> bool {
        self.meta().active
    }

    fn set_order(&mut self, order: i64) {
        self.meta_mut().order = order;
    }

    fn set_active(&mut self, active: bool) {
        self.meta_mut().active = active;
    }

    /// Required fields of this kind that are missing or blank.
    fn missing_fields(&self) -> Vec<&'static str> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => missing_required_fields(Self::KIND, &map),
            _ => Self::KIND.required_fields().to_vec(),
        }
    }
}

/// Checks a JSON object against the required fields of `kind`.
pub fn missing_required_fields(kind: EntityKind, fields: &Map<String, Value>) -> Vec<&'static str> {
    kind.required_fields()
        .iter()
        .copied()
        .filter(|field| match fields.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .collect()
}

/// The subset of `records` a public page may show: active only, in display order.
pub fn public_view<R: Entity>(records: &[R]) -> Vec<&R> {
    let mut visible: Vec<&R> = records.iter().filter(|record| record.active()).collect();
    if R::KIND.is_ordered() {
        visible.sort_by_key(|record| record.order());
    }
    visible
}
