//! Classification label

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Name of one classification class
///
/// The set of labels comes from the loaded predictor's vocabulary and does
/// not change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Label {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets `HashMap<Label, _>` be queried with a plain `&str`
impl Borrow<str> for Label {
    fn borrow(&self) -> &str {
        &self.0
    }
}
