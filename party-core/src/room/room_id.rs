//! Room identifiers
//!
//! Rooms are addressed by short human-friendly codes that double as the
//! shareable part of an invite link.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PartyError;

/// Uppercase letters and digits that are hard to misread aloud or on screen
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

const CODE_LENGTH: usize = 8;

/// Opaque unique identifier of a watch-party room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn random() -> Self {
        use rand::seq::SliceRandom;
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .filter_map(|_| ALPHABET.choose(&mut rng))
            .map(|&b| b as char)
            .collect();
        RoomId(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a code the way people type or paste it: any case, with
    /// dashes or spaces between groups.
    pub fn parse(input: &str) -> Option<Self> {
        let mut code = String::with_capacity(CODE_LENGTH);
        for c in input.trim().chars() {
            if c == '-' || c.is_whitespace() {
                continue;
            }
            let upper = c.to_ascii_uppercase();
            if !upper.is_ascii() || !ALPHABET.contains(&(upper as u8)) {
                return None;
            }
            code.push(upper);
        }
        (code.len() == CODE_LENGTH).then_some(RoomId(code))
    }

    /// Shareable link for this room under `base_url`
    pub fn invite_link(&self, base_url: &str) -> String {
        format!("{}/watch-party/{}", base_url.trim_end_matches('/'), self)
    }
}

impl FromStr for RoomId {
    type Err = PartyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomId::parse(s).ok_or_else(|| PartyError::Validation(format!("'{}' is not a room code", s)))
    }
}

/// Shown as `XXXX-XXXX`
impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            CODE_LENGTH => {
                let (head, tail) = self.0.split_at(CODE_LENGTH / 2);
                write!(f, "{}-{}", head, tail)
            }
            _ => f.write_str(&self.0),
        }
    }
}
