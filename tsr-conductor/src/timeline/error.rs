/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors raised by a [`TimelineResolver`](super::TimelineResolver).

use thiserror::Error;

/// A resolution failure.  Caught per tick by the Conductor, reported as an
/// `error` notification, and retried on the next wake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A relative trigger expression could not be parsed.
    #[error("object '{object}' has a malformed relative trigger '{expression}'")]
    InvalidExpression { object: String, expression: String },

    /// The same id appears twice in one timeline.
    #[error("duplicate timeline object id '{0}'")]
    DuplicateId(String),

    /// Catch-all for external resolver implementations.
    #[error("resolver failure: {0}")]
    Other(String),
}
