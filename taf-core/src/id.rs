//! Structured identifiers.
//!
//! Entity identifiers such as `V_ego`, `C_19_27` or `vehicle_5` are parsed
//! into a kind plus segments so that wildcard patterns (`V_*`, `C_*_*`) match
//! segment by segment instead of by string globbing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

const DELIMITER: char = '_';
const WILDCARD: &str = "*";

fn invalid(value: &str, reason: &str) -> CoreError {
    CoreError::InvalidIdentifier { value: value.to_owned(), reason: reason.to_owned() }
}

/// A concrete node in a trust graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    kind: String,
    segments: Vec<String>,
}

impl EntityId {
    /// Builds an identifier from already separated parts.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidIdentifier`] if any part is empty or
    /// contains the delimiter or the wildcard.
    pub fn new<I, S>(kind: &str, segments: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for part in std::iter::once(kind).chain(segments.iter().map(String::as_str)) {
            if part.is_empty() || part.contains(DELIMITER) || part.contains('*') {
                return Err(invalid(part, "identifier parts must be non-empty and free of '_' and '*'"));
            }
        }
        Ok(Self { kind: kind.to_owned(), segments })
    }

    fn from_trusted(kind: &str, segments: Vec<String>) -> Self {
        Self { kind: kind.to_owned(), segments }
    }

    /// `V_<id>`
    #[must_use]
    pub fn vehicle(id: impl fmt::Display) -> Self {
        Self::from_trusted("V", vec![id.to_string()])
    }

    /// `V_ego`
    #[must_use]
    pub fn ego() -> Self {
        Self::vehicle("ego")
    }

    /// `C_<source>_<object>`: object `object` as observed by vehicle `source`.
    #[must_use]
    pub fn observation(source: impl fmt::Display, object: impl fmt::Display) -> Self {
        Self::from_trusted("C", vec![source.to_string(), object.to_string()])
    }

    /// A single-segment identifier like `MEC` or `VC1`.
    ///
    /// # Errors
    /// See [`EntityId::new`].
    pub fn named(name: &str) -> Result<Self, CoreError> {
        Self::new(name, std::iter::empty::<String>())
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, e.g. `27` for `C_19_27`.
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(DELIMITER);
        let kind = parts.next().unwrap_or_default();
        let segments: Vec<&str> = parts.collect();
        if segments.contains(&WILDCARD) || kind == WILDCARD {
            return Err(invalid(s, "wildcards are only valid in patterns"));
        }
        Self::new(kind, segments).map_err(|_| invalid(s, "empty or malformed segment"))
    }
}

impl TryFrom<String> for EntityId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        for segment in &self.segments {
            write!(f, "{DELIMITER}{segment}")?;
        }
        Ok(())
    }
}

/// One segment of an [`EntityPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    Any,
    Exact(String),
}

impl PatternSegment {
    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == segment,
        }
    }
}

/// A trustor or trustee selector with per-segment wildcards.
///
/// A pattern matches an [`EntityId`] when the kinds are equal, the segment
/// counts are equal and every segment matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityPattern {
    kind: String,
    segments: Vec<PatternSegment>,
}

impl EntityPattern {
    #[must_use]
    pub fn matches(&self, id: &EntityId) -> bool {
        self.kind == id.kind
            && self.segments.len() == id.segments.len()
            && self.segments.iter().zip(&id.segments).all(|(p, s)| p.matches(s))
    }

    /// The identifier this pattern denotes when it has no wildcard.
    #[must_use]
    pub fn as_concrete(&self) -> Option<EntityId> {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                PatternSegment::Exact(s) => Some(s.clone()),
                PatternSegment::Any => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(EntityId::from_trusted(&self.kind, segments))
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl From<&EntityId> for EntityPattern {
    fn from(id: &EntityId) -> Self {
        Self {
            kind: id.kind.clone(),
            segments: id.segments.iter().cloned().map(PatternSegment::Exact).collect(),
        }
    }
}

impl FromStr for EntityPattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(DELIMITER);
        let kind = parts.next().unwrap_or_default();
        if kind.is_empty() || kind.contains('*') {
            return Err(invalid(s, "pattern kind must be a literal"));
        }
        let mut segments = Vec::new();
        for part in parts {
            let segment = match part {
                WILDCARD => PatternSegment::Any,
                "" => return Err(invalid(s, "empty segment")),
                p if p.contains('*') => {
                    return Err(invalid(s, "'*' is only valid as a whole segment"));
                }
                p => PatternSegment::Exact(p.to_owned()),
            };
            segments.push(segment);
        }
        Ok(Self { kind: kind.to_owned(), segments })
    }
}

impl TryFrom<String> for EntityPattern {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityPattern> for String {
    fn from(p: EntityPattern) -> Self {
        p.to_string()
    }
}

impl fmt::Display for EntityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)?;
        for segment in &self.segments {
            match segment {
                PatternSegment::Any => write!(f, "{DELIMITER}{WILDCARD}")?,
                PatternSegment::Exact(s) => write!(f, "{DELIMITER}{s}")?,
            }
        }
        Ok(())
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id! {
    /// Identifies a client session.
    SessionId
}

string_id! {
    /// Identifies a subscription, either toward an evidence source or from a client.
    SubscriptionId
}

string_id! {
    /// Identifies a trust model instance within its session.
    TmiId
}

string_id! {
    /// Identifies a connected client.
    ClientId
}

string_id! {
    /// Correlates a request with its response.
    RequestId
}

impl SessionId {
    /// Creates a random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }
}

impl SubscriptionId {
    /// Creates a random subscription id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("subscription-{}", Uuid::new_v4()))
    }
}

impl RequestId {
    /// Creates a random request id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Globally unique TMI address: `//client/session/template/tmi`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FullTmiId {
    pub client: ClientId,
    pub session: SessionId,
    pub template: String,
    pub tmi: TmiId,
}

impl FullTmiId {
    #[must_use]
    pub fn new(client: ClientId, session: SessionId, template: impl Into<String>, tmi: TmiId) -> Self {
        Self { client, session, template: template.into(), tmi }
    }
}

impl fmt::Display for FullTmiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}/{}/{}/{}", self.client, self.session, self.template, self.tmi)
    }
}

impl FromStr for FullTmiId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("//").ok_or_else(|| invalid(s, "must start with '//'"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        match parts.as_slice() {
            [client, session, template, tmi]
                if parts.iter().all(|p| !p.is_empty()) =>
            {
                Ok(Self::new((*client).into(), (*session).into(), *template, (*tmi).into()))
            }
            _ => Err(invalid(s, "expected four non-empty components")),
        }
    }
}

impl TryFrom<String> for FullTmiId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FullTmiId> for String {
    fn from(id: FullTmiId) -> Self {
        id.to_string()
    }
}
