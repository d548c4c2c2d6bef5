//! Plain-data arguments handed to a work function

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;

/// Positional and keyword arguments for one unit of work
///
/// Arguments are JSON values so that every task input can cross a worker
/// boundary without sharing memory with the submitter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    /// Positional arguments, in call order
    #[serde(default)]
    pub positional: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub named: Map<String, Value>,
}

impl TaskArgs {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Sets a keyword argument, replacing any previous value.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    /// Reads positional argument `index` as `T`.
    ///
    /// # Errors
    /// [`TaskError::BadArgument`] if the argument is missing or has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, TaskError> {
        let value = self
            .positional
            .get(index)
            .ok_or_else(|| TaskError::BadArgument {
                name: index.to_string(),
                reason: format!("missing (got {} positional)", self.positional.len()),
            })?;
        decode(index.to_string(), value)
    }

    /// Reads keyword argument `name` as `T`.
    pub fn named<T: DeserializeOwned>(&self, name: &str) -> Result<T, TaskError> {
        let value = self.named.get(name).ok_or_else(|| TaskError::BadArgument {
            name: name.to_string(),
            reason: "missing".to_string(),
        })?;
        decode(name.to_string(), value)
    }

    /// Reads keyword argument `name`, treating absence and `null` as `None`.
    pub fn named_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, TaskError> {
        match self.named.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(name.to_string(), value).map(Some),
        }
    }

    /// Total number of arguments
    pub fn len(&self) -> usize {
        self.positional.len() + self.named.len()
    }

    /// True when no argument was given
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode<T: DeserializeOwned>(name: String, value: &Value) -> Result<T, TaskError> {
    T::deserialize(value).map_err(|e| TaskError::BadArgument {
        name,
        reason: e.to_string(),
    })
}
