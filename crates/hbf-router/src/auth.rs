//! Authorization guard
//!
//! Connections on the internal listener are privileged and never need a
//! token. Connections on the external listener must present a valid token
//! with every mutating request, and are turned away entirely while the
//! lockout flag is set.

use hbf_core::ErrorCode;

use crate::tokens::TokenStore;

/// Which listener a connection arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Internal listener, trusted network
    Privileged,
    /// External listener, token required
    Unprivileged,
}

impl Privilege {
    pub fn is_privileged(self) -> bool {
        matches!(self, Privilege::Privileged)
    }
}

/// Who a request was authorized as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    Privileged,
    User { username: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(AuthContext),
    Denied(ErrorCode),
}

/// Decide whether a state mutation may proceed
pub fn authorize(
    privilege: Privilege,
    token: Option<&str>,
    tokens: &TokenStore,
    locked_out: bool,
) -> Authorization {
    if privilege.is_privileged() {
        return Authorization::Authorized(AuthContext::Privileged);
    }

    if locked_out {
        return Authorization::Denied(ErrorCode::ServiceUnavailable);
    }

    match token.and_then(|token| tokens.validate(token)) {
        Some(username) => Authorization::Authorized(AuthContext::User { username }),
        None => Authorization::Denied(ErrorCode::Unauthorized),
    }
}

/// Only privileged connections may change gateway settings
pub fn authorize_privileged(privilege: Privilege) -> Authorization {
    if privilege.is_privileged() {
        Authorization::Authorized(AuthContext::Privileged)
    } else {
        Authorization::Denied(ErrorCode::Unauthorized)
    }
}
