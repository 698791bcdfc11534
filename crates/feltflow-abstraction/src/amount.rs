//! Token amounts in integer base units.
//!
//! Chain amounts overflow JSON numbers, so every wire format carries them as
//! decimal strings. Plain integers are accepted on input as well.

/// Amount of a token in its smallest unit (wei).
pub type TokenAmount = u128;

/// Serde adapter for `TokenAmount` fields encoded as decimal strings.
pub mod as_string {
    use super::TokenAmount;
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(amount: &TokenAmount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TokenAmount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = TokenAmount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(TokenAmount::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            TokenAmount::try_from(v).map_err(|_| E::custom(format!("negative token amount: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed.parse::<TokenAmount>().map_err(|e| E::custom(format!("invalid token amount '{v}': {e}")))
        }
    }
}
