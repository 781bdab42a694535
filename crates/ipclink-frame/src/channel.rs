//! Channel identifiers.
//!
//! A channel is a named, independently ordered conduit. Names travel in every
//! frame header, so they are kept short and validated once at the edges.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::{FrameError, Result};

/// Longest channel name accepted, in bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 255;

/// Name of a channel. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    /// Validate and wrap a channel name.
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        validate_name(name)?;
        Ok(Self(Arc::from(name)))
    }

    /// The channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check that `name` can be used as a channel identifier.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FrameError::InvalidChannelName(
            "name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(FrameError::InvalidChannelName(format!(
            "name is {} bytes (max {MAX_CHANNEL_NAME_LEN})",
            name.len()
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(FrameError::InvalidChannelName(format!(
            "name {name:?} contains control characters"
        )));
    }
    Ok(())
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({:?})", &*self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ChannelId {
    type Error = FrameError;

    fn try_from(name: &str) -> Result<Self> {
        Self::new(name)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = FrameError;

    fn try_from(name: String) -> Result<Self> {
        validate_name(&name)?;
        Ok(Self(Arc::from(name)))
    }
}
