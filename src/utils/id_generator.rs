// src/utils/id_generator.rs
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdType {
    Notification,
    Action,
}

impl IdType {
    pub fn to_prefix(&self) -> &'static str {
        match self {
            IdType::Notification => "not",
            IdType::Action => "act",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "not" => Some(IdType::Notification),
            "act" => Some(IdType::Action),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_prefix())
    }
}

pub struct IdGenerator;

impl IdGenerator {
    /// Generate a unique ID with format: {prefix}-{YYMMDD}-{5 random chars}
    pub fn generate(id_type: IdType) -> String {
        Self::generate_with_timestamp(id_type, Utc::now())
    }

    /// Generate ID with a specific timestamp (useful for testing)
    pub fn generate_with_timestamp(id_type: IdType, timestamp: DateTime<Utc>) -> String {
        let date_part = timestamp.format("%y%m%d").to_string();
        format!("{}-{}-{}", id_type.to_prefix(), date_part, Self::generate_random_suffix())
    }

    // 3 hex + 2 alphanumeric, or the other way round
    fn generate_random_suffix() -> String {
        if rand::random::<bool>() {
            format!("{}{}", Self::generate_hex_chars(3), Self::generate_alphanumeric_chars(2))
        } else {
            format!("{}{}", Self::generate_alphanumeric_chars(3), Self::generate_hex_chars(2))
        }
    }

    fn generate_hex_chars(n: usize) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        Self::generate_from_chars(HEX_CHARS, n)
    }

    fn generate_alphanumeric_chars(n: usize) -> String {
        const ALPHANUMERIC_CHARS: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        Self::generate_from_chars(ALPHANUMERIC_CHARS, n)
    }

    fn generate_from_chars(charset: &[u8], n: usize) -> String {
        let mut rng = rand::rng();
        (0..n)
            .map(|_| charset[rng.random_range(0..charset.len())] as char)
            .collect()
    }

    /// Which kind of ID this is, if it is well formed.
    pub fn parse_type(id: &str) -> Option<IdType> {
        let mut parts = id.split('-');
        let (prefix, date, suffix) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || date.len() != 6 || suffix.len() != 5 {
            return None;
        }
        if !date.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        IdType::from_prefix(prefix)
    }

    pub fn validate_id(id: &str, expected_type: Option<IdType>) -> bool {
        match (Self::parse_type(id), expected_type) {
            (Some(found), Some(expected)) => found == expected,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Device identifier used when the platform does not supply one.
pub fn generate_device_id() -> String {
    nanoid::nanoid!(16)
}
