//! Pattern extraction over a fetched document

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How each pattern is applied to the document
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractMode {
    /// First match only, optionally reduced to selected capture groups
    #[default]
    FirstMatch,
    /// Every non-overlapping match
    FindAll,
}

/// One extracted value
///
/// Serializes as plain JSON: a string, an array of nullable strings, or an
/// array of fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Field {
    /// A whole match or a single capture group
    Text(String),
    /// Several capture groups of one match, in selector (or group) order
    Groups(Vec<Option<String>>),
    /// Every match of a pattern (find-all mode)
    All(Vec<Field>),
}

impl Field {
    /// Text of a [`Field::Text`]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Why extraction gave up on a document
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum ExtractError {
    #[error("pattern {pattern} did not match")]
    NoMatch { pattern: String },
    #[error("pattern {pattern} has no group {group}")]
    NoSuchGroup { pattern: String, group: usize },
}

/// Applies every pattern to `doc`.
///
/// Returns one entry per pattern. An `Err` means the whole call degrades to
/// nulls; a `None` entry is a selected group that did not take part in an
/// otherwise successful match.
pub(crate) fn extract(
    doc: &str,
    patterns: &[Regex],
    mode: ExtractMode,
    groups: Option<&[usize]>,
) -> Result<Vec<Option<Field>>, ExtractError> {
    match mode {
        ExtractMode::FindAll => Ok(patterns
            .iter()
            .map(|re| Some(find_all(doc, re)))
            .collect()),
        ExtractMode::FirstMatch => patterns
            .iter()
            .map(|re| first_match(doc, re, groups))
            .collect(),
    }
}

fn find_all(doc: &str, re: &Regex) -> Field {
    let group_count = re.captures_len() - 1;
    let matches = re
        .captures_iter(doc)
        .map(|caps| match group_count {
            0 => Field::Text(group_text(&caps, 0).unwrap_or_default()),
            1 => Field::Text(group_text(&caps, 1).unwrap_or_default()),
            n => Field::Groups(
                (1..=n)
                    .map(|i| Some(group_text(&caps, i).unwrap_or_default()))
                    .collect(),
            ),
        })
        .collect();
    Field::All(matches)
}

fn first_match(
    doc: &str,
    re: &Regex,
    groups: Option<&[usize]>,
) -> Result<Option<Field>, ExtractError> {
    let caps = re.captures(doc).ok_or_else(|| ExtractError::NoMatch {
        pattern: re.as_str().to_string(),
    })?;

    let selector = match groups {
        None | Some([]) => return Ok(group_text(&caps, 0).map(Field::Text)),
        Some(selector) => selector,
    };

    if let Some(&group) = selector.iter().find(|&&g| g >= re.captures_len()) {
        return Err(ExtractError::NoSuchGroup {
            pattern: re.as_str().to_string(),
            group,
        });
    }

    match selector {
        [single] => Ok(group_text(&caps, *single).map(Field::Text)),
        many => Ok(Some(Field::Groups(
            many.iter().map(|&g| group_text(&caps, g)).collect(),
        ))),
    }
}

fn group_text(caps: &Captures<'_>, index: usize) -> Option<String> {
    caps.get(index).map(|m| m.as_str().to_string())
}
