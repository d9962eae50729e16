//! Register decoding.
//!
//! Pure conversions between raw 16-bit holding-register words and typed point
//! values. Multi-word values use big-endian word order: the high-order word sits at
//! the lower register address.

use crate::error::AcqError;
use crate::reading::PointValue;
use crate::schema::DecodeType;

/// Interpret two registers as one big-endian IEEE-754 single.
#[must_use]
pub fn decode_float32(word_hi: u16, word_lo: u16) -> f32 {
    f32::from_bits(((word_hi as u32) << 16) | word_lo as u32)
}

/// Inverse of [`decode_float32`]: `[high, low]`.
#[must_use]
pub fn encode_float32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

#[must_use]
pub const fn decode_uint16(word: u16) -> u16 {
    word
}

#[must_use]
pub const fn decode_bool(word: u16) -> bool {
    word != 0
}

/// Types that can be decoded from a fixed number of consecutive registers.
pub trait FromWords: Sized {
    /// Number of registers consumed by one value of this type.
    const WORDS: usize;

    fn from_words(words: &[u16]) -> Result<Self, AcqError>;
}

/// Types that can be encoded into registers for writing.
pub trait ToWords {
    /// Append this value's registers to `out`, lowest address first.
    fn to_words(&self, out: &mut Vec<u16>);
}

fn check_len<T>(words: &[u16], expected: usize) -> Result<(), AcqError> {
    if words.len() == expected {
        Ok(())
    } else {
        Err(AcqError::Decode(format!(
            "expected {expected} word(s) for {}, got {}",
            std::any::type_name::<T>(),
            words.len()
        )))
    }
}

impl FromWords for f32 {
    const WORDS: usize = 2;
    fn from_words(words: &[u16]) -> Result<Self, AcqError> {
        check_len::<Self>(words, Self::WORDS)?;
        Ok(decode_float32(words[0], words[1]))
    }
}

impl FromWords for u16 {
    const WORDS: usize = 1;
    fn from_words(words: &[u16]) -> Result<Self, AcqError> {
        check_len::<Self>(words, Self::WORDS)?;
        Ok(decode_uint16(words[0]))
    }
}

impl FromWords for bool {
    const WORDS: usize = 1;
    fn from_words(words: &[u16]) -> Result<Self, AcqError> {
        check_len::<Self>(words, Self::WORDS)?;
        Ok(decode_bool(words[0]))
    }
}

impl ToWords for f32 {
    fn to_words(&self, out: &mut Vec<u16>) {
        out.extend_from_slice(&encode_float32(*self));
    }
}

impl ToWords for u16 {
    fn to_words(&self, out: &mut Vec<u16>) {
        out.push(*self);
    }
}

impl ToWords for bool {
    fn to_words(&self, out: &mut Vec<u16>) {
        out.push(u16::from(*self));
    }
}

/// Decode the words read for one point according to its decode rule.
///
/// # Errors
///
/// Returns `AcqError::Decode` when `words` does not hold exactly the number of
/// registers the decode type requires, or when a float point holds NaN or infinity.
pub fn decode_point(decode: DecodeType, words: &[u16]) -> Result<PointValue, AcqError> {
    Ok(match decode {
        DecodeType::Float32BE => {
            let v = f32::from_words(words)?;
            if !v.is_finite() {
                return Err(AcqError::Decode(format!(
                    "non-finite float {v} from words {words:04X?}"
                )));
            }
            PointValue::Float(v)
        }
        DecodeType::UInt16 => PointValue::UInt(u16::from_words(words)?),
        DecodeType::Bool => PointValue::Bool(bool::from_words(words)?),
    })
}

/// Encode `value` into the registers of a point with the given decode rule.
///
/// Integers are accepted for float points and 0/1 for boolean points; anything else
/// that does not match the decode type is rejected.
///
/// # Errors
///
/// Returns `AcqError::Decode` when the value cannot be represented by the decode type.
pub fn encode_point(decode: DecodeType, value: PointValue) -> Result<Vec<u16>, AcqError> {
    let mut out = Vec::with_capacity(decode.word_count().into());
    match (decode, value) {
        (DecodeType::Float32BE, PointValue::Float(v)) => v.to_words(&mut out),
        (DecodeType::Float32BE, PointValue::UInt(v)) => f32::from(v).to_words(&mut out),
        (DecodeType::UInt16, PointValue::UInt(v)) => v.to_words(&mut out),
        (DecodeType::Bool, PointValue::Bool(v)) => v.to_words(&mut out),
        (DecodeType::Bool, PointValue::UInt(v @ (0 | 1))) => (v == 1).to_words(&mut out),
        (decode, value) => {
            return Err(AcqError::Decode(format!(
                "value {value} does not fit a {decode} point"
            )))
        }
    }
    Ok(out)
}
