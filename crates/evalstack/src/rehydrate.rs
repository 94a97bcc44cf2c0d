use evalstack_types::RemoteException;
use std::error::Error;
use std::fmt;

use crate::compose::{
    AnnotatedFrame, ComposedStack, FRAME_INDENT, header_line, host_name_and_message,
};

/// Host-side counterpart of an exception thrown in a remote context.
///
/// `name` and `message` mirror the remote error exactly. The frame labels are
/// kept as composed and `stack` is rendered from them once, so a message that
/// itself spans lines never adds frames. Two errors are equal when name,
/// message and frames are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostError {
    name: String,
    message: String,
    frames: Vec<String>,
    stack: String,
}

impl HostError {
    pub fn new<I>(name: impl Into<String>, message: impl Into<String>, frames: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let name = name.into();
        let message = message.into();
        let frames: Vec<String> = frames.into_iter().map(Into::into).collect();
        let mut stack = header_line(&name, &message);
        for label in &frames {
            stack.push('\n');
            stack.push_str(FRAME_INDENT);
            stack.push_str(label);
        }
        Self {
            name,
            message,
            frames,
            stack,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Frame labels, innermost first, without indentation.
    pub fn frames(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().map(String::as_str)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&header_line(&self.name, &self.message))
    }
}

impl Error for HostError {}

/// Builds the host error for `remote` from an already composed stack.
pub fn rehydrate(remote: &RemoteException, composed: &ComposedStack) -> HostError {
    let (name, message) = host_name_and_message(remote);
    HostError::new(
        name,
        message,
        composed.frames().iter().map(AnnotatedFrame::label),
    )
}
