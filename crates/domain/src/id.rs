//! Time-sortable identifiers.
//!
//! Every entity id is a `Tid`: 4 big-endian bytes of seconds since a fixed
//! epoch followed by 16 random bytes, rendered as a 27-character base-62
//! string. Byte order, string order and creation order all agree, which lets
//! the priority policy bound "today's entries" with a plain range scan on
//! `(queue, id)` instead of a timestamp column.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Seconds subtracted from the unix timestamp before encoding, buying the
/// 4-byte prefix more runway.
const EPOCH: i64 = 1_400_000_000;

const RAW_LEN: usize = 20;
const ENCODED_LEN: usize = 27;

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TidError {
    #[error("invalid id length {0}, expected {ENCODED_LEN}")]
    Length(usize),
    #[error("invalid character {0:?} in id")]
    Character(char),
    #[error("id value out of range")]
    Overflow,
}

/// A 20-byte time-ordered unique identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid([u8; RAW_LEN]);

impl Tid {
    /// A fresh id stamped with the current time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// A fresh id stamped with `t`.
    pub fn at(t: DateTime<Utc>) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..4].copy_from_slice(&Self::seconds_component(t).to_be_bytes());
        rand::thread_rng().fill_bytes(&mut raw[4..]);
        Self(raw)
    }

    /// The smallest id whose timestamp component equals `t`. Compares
    /// less-or-equal to every id minted during or after that second.
    pub fn min_at(t: DateTime<Utc>) -> Self {
        let mut raw = [0u8; RAW_LEN];
        raw[..4].copy_from_slice(&Self::seconds_component(t).to_be_bytes());
        Self(raw)
    }

    /// The smallest id of the local day containing `now`.
    pub fn start_of_day<Tz: TimeZone>(now: DateTime<Tz>) -> Self {
        let midnight = now.date_naive().and_time(NaiveTime::MIN);
        let local_midnight = midnight
            .and_local_timezone(now.timezone())
            .earliest()
            .unwrap_or(now);
        Self::min_at(local_midnight.with_timezone(&Utc))
    }

    /// The creation time carried in the id, at second resolution.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(secs as i64 + EPOCH, 0).unwrap_or_default()
    }

    fn seconds_component(t: DateTime<Utc>) -> u32 {
        (t.timestamp() - EPOCH).clamp(0, u32::MAX as i64) as u32
    }
}

impl Default for Tid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'0'; ENCODED_LEN];
        let mut src = self.0.to_vec();
        let mut idx = ENCODED_LEN;
        while !src.is_empty() {
            let mut remainder: u32 = 0;
            let mut quotient = Vec::with_capacity(src.len());
            for &byte in &src {
                let acc = remainder * 256 + byte as u32;
                let digit = acc / 62;
                remainder = acc % 62;
                if !quotient.is_empty() || digit != 0 {
                    quotient.push(digit as u8);
                }
            }
            idx -= 1;
            out[idx] = ALPHABET[remainder as usize];
            src = quotient;
        }
        f.write_str(std::str::from_utf8(&out).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({self})")
    }
}

impl FromStr for Tid {
    type Err = TidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(TidError::Length(s.len()));
        }
        let mut raw = [0u8; RAW_LEN];
        for ch in s.chars() {
            let digit = alphabet_index(ch).ok_or(TidError::Character(ch))?;
            let mut carry = digit as u32;
            for byte in raw.iter_mut().rev() {
                let acc = *byte as u32 * 62 + carry;
                *byte = (acc & 0xff) as u8;
                carry = acc >> 8;
            }
            if carry != 0 {
                return Err(TidError::Overflow);
            }
        }
        Ok(Self(raw))
    }
}

fn alphabet_index(ch: char) -> Option<u8> {
    match ch {
        '0'..='9' => Some(ch as u8 - b'0'),
        'A'..='Z' => Some(ch as u8 - b'A' + 10),
        'a'..='z' => Some(ch as u8 - b'a' + 36),
        _ => None,
    }
}

impl Serialize for Tid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Tid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl sqlx::Type<sqlx::Postgres> for Tid {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for Tid {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Tid {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn roundtrips_through_string() {
        for _ in 0..100 {
            let id = Tid::new();
            let parsed: Tid = id.to_string().parse().unwrap();
            assert_eq!(id, parsed);
            assert_eq!(id.to_string().len(), ENCODED_LEN);
        }
    }

    #[test]
    fn string_order_matches_time_order() {
        let early = Tid::at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        let late = Tid::at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 1).unwrap());
        assert!(early < late);
        assert!(early.to_string() < late.to_string());
    }

    #[test]
    fn min_at_sorts_before_ids_of_same_second() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let floor = Tid::min_at(t);
        for _ in 0..20 {
            assert!(floor <= Tid::at(t));
        }
    }

    #[test]
    fn timestamp_is_preserved() {
        let t = Utc.with_ymd_and_hms(2025, 1, 15, 13, 37, 42).unwrap();
        assert_eq!(Tid::at(t).timestamp(), t);
    }

    #[test]
    fn start_of_day_bounds_the_local_day() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        let floor = Tid::start_of_day(now);
        let midnight_utc = tz
            .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(floor.timestamp(), midnight_utc);
        assert!(floor < Tid::at(now.with_timezone(&Utc)));
        // An entry from the previous local day sorts below the floor.
        let yesterday = tz.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert!(Tid::at(yesterday.with_timezone(&Utc)) < floor);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!("short".parse::<Tid>(), Err(TidError::Length(5)));
        let bad = "!".repeat(ENCODED_LEN);
        assert_eq!(bad.parse::<Tid>(), Err(TidError::Character('!')));
    }

    #[test]
    fn serde_uses_string_form() {
        let id = Tid::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: Tid = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
