//! Small validated value types shared across the ISACC crates.

use std::fmt;
use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input was not a `ResourceType/id` reference
    #[error("invalid resource reference: {0}")]
    InvalidReference(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for NonEmptyText {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A literal FHIR reference of the form `ResourceType/id`.
///
/// Canonical references used by plan definitions (`Questionnaire/abc`) and care plan
/// templates (`CarePlan/xyz`) share this shape, so both parse into this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    resource_type: String,
    id: String,
}

impl ResourceRef {
    /// Builds a reference from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if either part is blank, or
    /// [`TextError::InvalidReference`] if either part contains a `/`.
    pub fn new(resource_type: impl AsRef<str>, id: impl AsRef<str>) -> Result<Self, TextError> {
        let resource_type = NonEmptyText::new(resource_type)?.into_inner();
        let id = NonEmptyText::new(id)?.into_inner();
        if resource_type.contains('/') || id.contains('/') {
            return Err(TextError::InvalidReference(format!("{resource_type}/{id}")));
        }
        Ok(Self { resource_type, id })
    }

    /// Parses `ResourceType/id`.
    pub fn parse(input: &str) -> Result<Self, TextError> {
        let (resource_type, id) = input
            .trim()
            .split_once('/')
            .ok_or_else(|| TextError::InvalidReference(input.to_owned()))?;
        Self::new(resource_type, id)
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

impl FromStr for ResourceRef {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
