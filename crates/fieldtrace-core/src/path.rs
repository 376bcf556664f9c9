//! Addressing scheme for nodes in a response tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a field-resolution path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// A named field in the response (the alias if one was used).
    Field(String),
    /// A position inside a list value.
    Index(u32),
}

impl Segment {
    /// Parses one element of an engine-reported path.
    ///
    /// Elements made only of ASCII digits are list positions; everything
    /// else is a field name.
    pub fn parse(element: &str) -> Self {
        let numeric = !element.is_empty() && element.bytes().all(|b| b.is_ascii_digit());
        match numeric.then(|| element.parse::<u32>()) {
            Some(Ok(index)) => Segment::Index(index),
            _ => Segment::Field(element.to_string()),
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            Segment::Field(name) => Some(name),
            Segment::Index(_) => None,
        }
    }

    pub fn index(&self) -> Option<u32> {
        match self {
            Segment::Field(_) => None,
            Segment::Index(i) => Some(*i),
        }
    }
}

impl From<&str> for Segment {
    fn from(name: &str) -> Self {
        Segment::Field(name.to_string())
    }
}

impl From<String> for Segment {
    fn from(name: String) -> Self {
        Segment::Field(name)
    }
}

impl From<u32> for Segment {
    fn from(index: u32) -> Self {
        Segment::Index(index)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => f.write_str(name),
            Segment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Ordered sequence of segments from the tree root to a field.
///
/// The empty path denotes the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Builds a path from engine path elements such as `["users", "0", "id"]`.
    pub fn parse<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        elements.into_iter().map(|e| Segment::parse(e.as_ref())).collect()
    }

    /// Appends a field segment.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Field(name.into()));
        self
    }

    /// Appends a list index segment.
    pub fn index(mut self, index: u32) -> Self {
        self.0.push(Segment::Index(index));
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}
