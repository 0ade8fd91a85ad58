//! Element types carried by object fifos.
//!
//! Every slot of a channel holds one element: a fixed-shape array of a
//! single scalar type, e.g. `24xi32`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl ScalarType {
    pub fn bits(self) -> u32 {
        match self {
            ScalarType::I8 | ScalarType::U8 => 8,
            ScalarType::I16 | ScalarType::U16 => 16,
            ScalarType::I32 | ScalarType::U32 => 32,
            ScalarType::I64 => 64,
        }
    }

    pub fn bytes(self) -> u64 {
        u64::from(self.bits() / 8)
    }

    /// Inclusive value range representable by this scalar.
    pub fn range(self) -> (i64, i64) {
        match self {
            ScalarType::I8 => (i8::MIN.into(), i8::MAX.into()),
            ScalarType::I16 => (i16::MIN.into(), i16::MAX.into()),
            ScalarType::I32 => (i32::MIN.into(), i32::MAX.into()),
            ScalarType::I64 => (i64::MIN, i64::MAX),
            ScalarType::U8 => (0, u8::MAX.into()),
            ScalarType::U16 => (0, u16::MAX.into()),
            ScalarType::U32 => (0, u32::MAX.into()),
        }
    }

    pub fn fits(self, value: i64) -> bool {
        let (lo, hi) = self.range();
        (lo..=hi).contains(&value)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U8 => "ui8",
            ScalarType::U16 => "ui16",
            ScalarType::U32 => "ui32",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Fixed-shape element descriptor shared by all slots of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementType {
    pub scalar: ScalarType,
    pub shape: Vec<usize>,
}

impl ElementType {
    pub fn new(scalar: ScalarType, shape: Vec<usize>) -> Self {
        Self { scalar, shape }
    }

    /// One-dimensional array of `len` scalars.
    pub fn array(scalar: ScalarType, len: usize) -> Self {
        Self {
            scalar,
            shape: vec![len],
        }
    }

    /// Number of scalars in one element; saturates on absurd shapes.
    pub fn len(&self) -> usize {
        self.shape.iter().fold(1usize, |n, d| n.saturating_mul(*d))
    }

    /// Shapes must be non-empty with every dimension at least 1.
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty() || self.shape.contains(&0)
    }

    pub fn bytes(&self) -> u64 {
        self.checked_bytes().unwrap_or(u64::MAX)
    }

    /// Size of one element, or `None` if it does not fit in a `u64`.
    pub fn checked_bytes(&self) -> Option<u64> {
        self.shape
            .iter()
            .try_fold(self.scalar.bytes(), |n, d| n.checked_mul(u64::try_from(*d).ok()?))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dim in &self.shape {
            write!(f, "{}x", dim)?;
        }
        write!(f, "{}", self.scalar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_len_and_bytes() {
        let ty = ElementType::array(ScalarType::I32, 24);
        assert_eq!(ty.len(), 24);
        assert_eq!(ty.bytes(), 96);
        assert_eq!(ty.to_string(), "24xi32");
    }

    #[test]
    fn test_multi_dim_display() {
        let ty = ElementType::new(ScalarType::U8, vec![4, 16]);
        assert_eq!(ty.len(), 64);
        assert_eq!(ty.to_string(), "4x16xui8");
    }

    #[test]
    fn test_empty_shapes() {
        assert!(ElementType::new(ScalarType::I32, vec![]).is_empty());
        assert!(ElementType::new(ScalarType::I32, vec![8, 0]).is_empty());
        assert!(!ElementType::array(ScalarType::I32, 1).is_empty());
    }

    #[test]
    fn test_oversized_shape_saturates() {
        let ty = ElementType::new(ScalarType::I32, vec![1 << 32, 1 << 32]);
        assert_eq!(ty.checked_bytes(), None);
        assert_eq!(ty.bytes(), u64::MAX);
        let ty = ElementType::new(ScalarType::I64, vec![usize::MAX, 2]);
        assert_eq!(ty.len(), usize::MAX);
        assert_eq!(ElementType::array(ScalarType::I16, 8).checked_bytes(), Some(16));
    }

    #[test]
    fn test_scalar_fits() {
        assert!(ScalarType::I8.fits(-128));
        assert!(!ScalarType::I8.fits(128));
        assert!(!ScalarType::U16.fits(-1));
        assert!(ScalarType::U32.fits(u32::MAX as i64));
        assert!(ScalarType::I64.fits(i64::MIN));
    }

    #[test]
    fn test_serde_lowercase_scalar() {
        let ty: ElementType = serde_json::from_str(r#"{"scalar":"i32","shape":[8]}"#).unwrap();
        assert_eq!(ty, ElementType::array(ScalarType::I32, 8));
    }
}
