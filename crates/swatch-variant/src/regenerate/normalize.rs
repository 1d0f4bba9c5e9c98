//! Normalization of client-supplied used identifiers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::types::SlotIndex;

static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid digit pattern"));

/// Slot identifier as sent by a client.
///
/// Clients send plain integers, numeric strings, or tokens such as `"r3"`
/// that embed a slot number. Anything else deserializes to [`UsedId::Other`]
/// so one malformed entry never rejects the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum UsedId {
    /// A bare integer.
    Index(i64),
    /// A string containing a slot number.
    Token(String),
    /// A value carrying no slot number.
    Other,
}

impl UsedId {
    /// Extracts the slot number, if any.
    ///
    /// Integers are taken as-is. Strings contribute their first run of ASCII
    /// digits. Zero, negative, and out-of-range values yield `None`.
    pub fn slot(&self) -> Option<SlotIndex> {
        let index = match self {
            Self::Index(index) => u32::try_from(*index).ok()?,
            Self::Token(token) => {
                let digits = DIGITS.find(token)?;
                digits.as_str().parse::<u32>().ok()?
            }
            Self::Other => return None,
        };

        SlotIndex::new(index)
    }
}

impl<'de> Deserialize<'de> for UsedId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(UsedIdVisitor)
    }
}

struct UsedIdVisitor;

impl<'de> Visitor<'de> for UsedIdVisitor {
    type Value = UsedId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a slot number or an identifier token")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<UsedId, E> {
        Ok(UsedId::Index(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<UsedId, E> {
        Ok(i64::try_from(value).map_or(UsedId::Other, UsedId::Index))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<UsedId, E> {
        // Integral floats such as `4.0` name a slot; `u32` bounds keep the cast exact.
        if value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value) {
            Ok(UsedId::Index(value as i64))
        } else {
            Ok(UsedId::Other)
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<UsedId, E> {
        Ok(UsedId::from(value))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<UsedId, E> {
        Ok(UsedId::Token(value))
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<UsedId, E> {
        Ok(UsedId::Other)
    }

    fn visit_bytes<E: de::Error>(self, _: &[u8]) -> Result<UsedId, E> {
        Ok(UsedId::Other)
    }

    fn visit_unit<E: de::Error>(self) -> Result<UsedId, E> {
        Ok(UsedId::Other)
    }

    fn visit_none<E: de::Error>(self) -> Result<UsedId, E> {
        Ok(UsedId::Other)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<UsedId, D::Error>
    where
        D: Deserializer<'de>,
    {
        UsedId::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<UsedId, A::Error>
    where
        A: SeqAccess<'de>,
    {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(UsedId::Other)
    }

    fn visit_map<A>(self, mut map: A) -> Result<UsedId, A::Error>
    where
        A: MapAccess<'de>,
    {
        while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
        Ok(UsedId::Other)
    }
}

impl From<u32> for UsedId {
    fn from(index: u32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl From<&str> for UsedId {
    fn from(token: &str) -> Self {
        Self::Token(token.to_owned())
    }
}

impl From<String> for UsedId {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

impl fmt::Display for UsedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Token(token) => f.write_str(token),
            Self::Other => f.write_str("null"),
        }
    }
}

/// Converts heterogeneous identifiers into a set of slots.
///
/// Identifiers without a usable slot number are silently dropped.
pub fn normalize_used_ids<'a, I>(used_ids: I) -> BTreeSet<SlotIndex>
where
    I: IntoIterator<Item = &'a UsedId>,
{
    used_ids.into_iter().filter_map(UsedId::slot).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn slots(indices: &[u32]) -> BTreeSet<SlotIndex> {
        indices.iter().filter_map(|i| SlotIndex::new(*i)).collect()
    }

    #[test]
    fn test_mixed_identifiers() -> anyhow::Result<()> {
        let used: Vec<UsedId> = serde_json::from_value(json!(["1", "2", "r3", 4]))?;
        assert_eq!(normalize_used_ids(&used), slots(&[1, 2, 3, 4]));
        Ok(())
    }

    #[test]
    fn test_malformed_entries_are_ignored() -> anyhow::Result<()> {
        let used: Vec<UsedId> =
            serde_json::from_value(json!(["1", 4.0, null, "r3", 2.5, true, {"id": 6}, [5]]))?;
        assert_eq!(used[2], UsedId::Other);
        assert_eq!(normalize_used_ids(&used), slots(&[1, 3, 4]));
        Ok(())
    }

    #[test]
    fn test_only_ascii_digits_count() {
        assert_eq!(UsedId::from("r\u{0663}5").slot(), SlotIndex::new(5));
    }

    #[test]
    fn test_tokens_without_digits_are_dropped() {
        let used = [UsedId::from("abc")];
        assert!(normalize_used_ids(&used).is_empty());
    }

    #[test]
    fn test_first_digit_run_wins() {
        assert_eq!(UsedId::from("slot12-v7").slot(), SlotIndex::new(12));
    }

    #[test]
    fn test_zero_negative_and_overflow_are_dropped() {
        let used = [
            UsedId::Index(0),
            UsedId::Index(-2),
            UsedId::from("99999999999"),
            UsedId::from("v0"),
        ];
        assert!(normalize_used_ids(&used).is_empty());
    }

    #[test]
    fn test_duplicates_collapse() {
        let used = [UsedId::from(2), UsedId::from("2"), UsedId::from("id-2")];
        assert_eq!(normalize_used_ids(&used), slots(&[2]));
    }
}
