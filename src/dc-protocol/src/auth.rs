// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bearer token checks for the listener.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    Missing,
    #[error("invalid authorization token")]
    Invalid,
}

/// Strip a case-insensitive `Bearer ` prefix and surrounding whitespace.
pub fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
        _ => trimmed,
    }
}

pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: Option<&str>) -> Result<(), AuthError>;
}

/// Accepts any token from a fixed set. With no tokens configured, every
/// request is accepted.
#[derive(Debug, Clone, Default)]
pub struct SimpleTokenValidator {
    tokens: HashSet<String>,
}

impl SimpleTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for SimpleTokenValidator {
    fn validate(&self, token: Option<&str>) -> Result<(), AuthError> {
        if self.tokens.is_empty() {
            return Ok(());
        }
        let token = token.ok_or(AuthError::Missing)?;
        if self.tokens.contains(strip_bearer(token)) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}
