use bolero::generator::TypeGenerator;
use std::{fmt, str::FromStr};

use crate::Error;

/// The kinds of pages that carry a comment thread
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    bolero::generator::TypeGenerator,
    serde::Deserialize,
    serde::Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    PropFirm,
    News,
    Blog,
}

impl SubjectType {
    pub const ALL: [SubjectType; 3] = [SubjectType::PropFirm, SubjectType::News, SubjectType::Blog];

    /// Identifier of the store collection holding this subject's threads
    pub fn collection(self) -> &'static str {
        match self {
            SubjectType::PropFirm => "propfirm",
            SubjectType::News => "news",
            SubjectType::Blog => "blog",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

impl FromStr for SubjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<SubjectType, Error> {
        SubjectType::ALL
            .into_iter()
            .find(|t| t.collection() == s)
            .ok_or_else(|| Error::UnknownSubjectType(String::from(s)))
    }
}

/// The entity a thread is attached to. Its existence is never checked here.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Subject {
    pub kind: SubjectType,
    pub id: String,
}

impl Subject {
    pub fn new(kind: SubjectType, id: impl Into<String>) -> Subject {
        Subject {
            kind,
            id: id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.id)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}
