//! Session tokens for the unprivileged listener
//!
//! Tokens are 32 random bytes, hex encoded, valid for a fixed duration from
//! the moment they are minted. Expiry is checked lazily on every lookup and
//! swept in bulk whenever a connection closes.

use dashmap::DashMap;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct TokenEntry {
    username: String,
    expires_at: SystemTime,
}

/// A freshly minted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
}

pub struct TokenStore {
    validity: Duration,
    tokens: DashMap<String, TokenEntry>,
}

impl TokenStore {
    pub fn new(validity: Duration) -> Self {
        Self {
            validity,
            tokens: DashMap::new(),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Mint a new token for `username`
    pub fn mint(&self, username: &str) -> IssuedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let expires_at = SystemTime::now() + self.validity;
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                expires_at,
            },
        );

        debug!("Minted token for {}, valid for {:?}", username, self.validity);

        IssuedToken {
            token,
            expires_at: unix_seconds(expires_at),
        }
    }

    /// Owner of `token`, if it exists and has not expired
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = SystemTime::now();
        let username = {
            let entry = self.tokens.get(token)?;
            if entry.expires_at > now {
                return Some(entry.username.clone());
            }
            entry.username.clone()
        };

        self.tokens.remove(token);
        debug!("Token of {} expired", username);
        None
    }

    /// Exchange a valid token for a new one; the old token stops working
    pub fn refresh(&self, token: &str) -> Option<IssuedToken> {
        let username = self.validate(token)?;
        self.tokens.remove(token);
        Some(self.mint(&username))
    }

    pub fn invalidate(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drop every expired token, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            debug!("Swept {} expired tokens", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
