//! Commands sent to media objects and their typed results

use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::any::Any;
use std::fmt;

/// Command addressed to one media object
///
/// The type tag selects both the server-side handler and the local decoder
/// used to turn the raw reply into a typed [`CommandResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    command_type: String,
    payload: Bytes,
}

impl Command {
    /// Create a command from a type tag and an opaque payload
    pub fn new(command_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            command_type: command_type.into(),
            payload: payload.into(),
        }
    }

    /// Create a command whose payload is the JSON encoding of `params`
    pub fn json<T: Serialize>(command_type: impl Into<String>, params: &T) -> Result<Self> {
        let payload = serde_json::to_vec(params)?;
        Ok(Self::new(command_type, payload))
    }

    /// Type tag
    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    /// Opaque payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// Decoded result of a [`Command`]
///
/// Holds whatever the decoder registered for the command's type tag
/// produced. Use [`CommandResult::downcast`] to recover the concrete type.
pub struct CommandResult {
    command_type: String,
    value: Box<dyn Any + Send + Sync>,
}

impl CommandResult {
    pub(crate) fn new(command_type: impl Into<String>, value: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            command_type: command_type.into(),
            value,
        }
    }

    /// Type tag of the command that produced this result
    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    /// Whether the decoded value is an `R`
    pub fn is<R: Any>(&self) -> bool {
        self.value.is::<R>()
    }

    /// Borrow the decoded value as an `R`
    pub fn downcast_ref<R: Any>(&self) -> Option<&R> {
        self.value.downcast_ref::<R>()
    }

    /// Take the decoded value as an `R`
    ///
    /// # Errors
    ///
    /// * `Error::UnknownCommandType` - The decoder for this type tag produced a different type
    pub fn downcast<R: Any>(self) -> Result<R> {
        let command_type = self.command_type;
        self.value
            .downcast::<R>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                Error::UnknownCommandType(format!(
                    "result of '{}' is not a {}",
                    command_type,
                    std::any::type_name::<R>()
                ))
            })
    }
}

impl fmt::Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResult")
            .field("command_type", &self.command_type)
            .finish_non_exhaustive()
    }
}
