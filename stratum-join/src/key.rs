//! Join method choice and per-row key extraction.
//!
//! Fixed-width keys pack into unsigned integers of 1/2/4/8/16/32 bytes;
//! single string keys keep their bytes (normalized by collation); anything
//! else serializes every key column length-prefixed.

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;
use stratum_result::{Error, Result};

use crate::{Collation, JoinKeyDesc};

/// The eleven key shapes, mirroring one map variant each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMethod {
    Key8,
    Key16,
    Key32,
    Key64,
    KeyString,
    KeyStringBinary,
    KeyStringBinaryPadding,
    KeyFixedString,
    Keys128,
    Keys256,
    Serialized,
}

/// 256-bit packed key for up to 32 bytes of fixed-width columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct U256(pub [u64; 4]);

impl U256 {
    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }
}

/// One row's key rendered for the chosen method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JoinKeyValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    U256(U256),
    Bytes(Vec<u8>),
}

fn fixed_key_width(data_type: &DataType) -> Option<usize> {
    Some(match data_type {
        DataType::Int8 | DataType::UInt8 | DataType::Boolean => 1,
        DataType::Int16 | DataType::UInt16 => 2,
        DataType::Int32 | DataType::UInt32 | DataType::Float32 | DataType::Date32 => 4,
        DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        _ => return None,
    })
}

/// Pick the map shape for the given key column types and collations.
pub fn choose_method(types: &[DataType], collations: &[Option<Collation>]) -> JoinMethod {
    if types.len() == 1 {
        match &types[0] {
            DataType::Utf8 => {
                return match collations[0] {
                    Some(Collation::BinaryPadding) => JoinMethod::KeyStringBinaryPadding,
                    Some(Collation::Binary) => JoinMethod::KeyStringBinary,
                    _ => JoinMethod::KeyString,
                };
            }
            DataType::Binary => return JoinMethod::KeyStringBinary,
            DataType::FixedSizeBinary(_) => return JoinMethod::KeyFixedString,
            _ => {}
        }
        if let Some(width) = fixed_key_width(&types[0]) {
            return match width {
                1 => JoinMethod::Key8,
                2 => JoinMethod::Key16,
                4 => JoinMethod::Key32,
                _ => JoinMethod::Key64,
            };
        }
        return JoinMethod::Serialized;
    }

    let mut total = 0usize;
    for data_type in types {
        match fixed_key_width(data_type) {
            Some(width) => total += width,
            None => return JoinMethod::Serialized,
        }
    }
    if total <= 16 {
        JoinMethod::Keys128
    } else if total <= 32 {
        JoinMethod::Keys256
    } else {
        JoinMethod::Serialized
    }
}

/// Extracts keys for one side of the join from a block's key columns.
pub struct KeyExtractor {
    method: JoinMethod,
    collations: Vec<Option<Collation>>,
}

impl KeyExtractor {
    pub fn new(method: JoinMethod, descs: &[JoinKeyDesc]) -> Self {
        Self {
            method,
            collations: descs.iter().map(|d| d.collation).collect(),
        }
    }

    pub fn method(&self) -> JoinMethod {
        self.method
    }

    /// Render `row`'s key, or `None` when any key part is NULL (NULL never
    /// joins).
    pub fn key_at(&self, columns: &[ArrayRef], row: usize) -> Result<Option<JoinKeyValue>> {
        for column in columns {
            if column.is_null(row) {
                return Ok(None);
            }
        }
        let key = match self.method {
            JoinMethod::Key8 => JoinKeyValue::U8(fixed_bytes::<1>(&columns[0], row)?[0]),
            JoinMethod::Key16 => {
                JoinKeyValue::U16(u16::from_le_bytes(fixed_bytes::<2>(&columns[0], row)?))
            }
            JoinMethod::Key32 => {
                JoinKeyValue::U32(u32::from_le_bytes(fixed_bytes::<4>(&columns[0], row)?))
            }
            JoinMethod::Key64 => {
                JoinKeyValue::U64(u64::from_le_bytes(fixed_bytes::<8>(&columns[0], row)?))
            }
            JoinMethod::Keys128 => {
                let mut buf = [0u8; 16];
                pack_fixed(columns, row, &mut buf)?;
                JoinKeyValue::U128(u128::from_le_bytes(buf))
            }
            JoinMethod::Keys256 => {
                let mut buf = [0u8; 32];
                pack_fixed(columns, row, &mut buf)?;
                let mut limbs = [0u64; 4];
                for (i, limb) in limbs.iter_mut().enumerate() {
                    *limb = u64::from_le_bytes(buf[i * 8..(i + 1) * 8].try_into().unwrap());
                }
                JoinKeyValue::U256(U256(limbs))
            }
            JoinMethod::KeyString
            | JoinMethod::KeyStringBinary
            | JoinMethod::KeyStringBinaryPadding
            | JoinMethod::KeyFixedString => {
                let raw = byte_key(&columns[0], row)?;
                JoinKeyValue::Bytes(normalize(raw, self.collations[0], self.method))
            }
            JoinMethod::Serialized => {
                let mut out = Vec::new();
                for (i, column) in columns.iter().enumerate() {
                    let raw = serialized_part(column, row)?;
                    let part = normalize(raw, self.collations.get(i).copied().flatten(), self.method);
                    out.extend_from_slice(&(part.len() as u32).to_le_bytes());
                    out.extend_from_slice(&part);
                }
                JoinKeyValue::Bytes(out)
            }
        };
        Ok(Some(key))
    }
}

fn normalize(mut bytes: Vec<u8>, collation: Option<Collation>, method: JoinMethod) -> Vec<u8> {
    let collation = match collation {
        Some(c) => c,
        None => {
            return match method {
                // The padded method implies trimming even without an
                // explicit collation tag.
                JoinMethod::KeyStringBinaryPadding => {
                    while bytes.last() == Some(&b' ') {
                        bytes.pop();
                    }
                    bytes
                }
                _ => bytes,
            };
        }
    };
    match collation {
        Collation::Binary => bytes,
        Collation::BinaryPadding => {
            while bytes.last() == Some(&b' ') {
                bytes.pop();
            }
            bytes
        }
        Collation::Utf8General => {
            bytes.make_ascii_lowercase();
            bytes
        }
    }
}

fn fixed_bytes<const N: usize>(column: &ArrayRef, row: usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    let written = write_fixed(column, row, &mut out)?;
    debug_assert_eq!(written, N);
    Ok(out)
}

fn pack_fixed(columns: &[ArrayRef], row: usize, out: &mut [u8]) -> Result<()> {
    let mut offset = 0usize;
    for column in columns {
        offset += write_fixed(column, row, &mut out[offset..])?;
    }
    Ok(())
}

/// Write one fixed-width value's LE bytes, returning the width.
fn write_fixed(column: &ArrayRef, row: usize, out: &mut [u8]) -> Result<usize> {
    use arrow::array::*;

    macro_rules! put {
        ($arr_ty:ty) => {{
            let arr = column
                .as_any()
                .downcast_ref::<$arr_ty>()
                .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?;
            let bytes = arr.value(row).to_le_bytes();
            out[..bytes.len()].copy_from_slice(&bytes);
            bytes.len()
        }};
    }

    Ok(match column.data_type() {
        DataType::Int8 => put!(Int8Array),
        DataType::Int16 => put!(Int16Array),
        DataType::Int32 => put!(Int32Array),
        DataType::Int64 => put!(Int64Array),
        DataType::UInt8 => put!(UInt8Array),
        DataType::UInt16 => put!(UInt16Array),
        DataType::UInt32 => put!(UInt32Array),
        DataType::UInt64 => put!(UInt64Array),
        DataType::Float32 => {
            let arr = column
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?;
            let bytes = arr.value(row).to_bits().to_le_bytes();
            out[..4].copy_from_slice(&bytes);
            4
        }
        DataType::Float64 => {
            let arr = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?;
            let bytes = arr.value(row).to_bits().to_le_bytes();
            out[..8].copy_from_slice(&bytes);
            8
        }
        DataType::Boolean => {
            let arr = column
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?;
            out[0] = arr.value(row) as u8;
            1
        }
        DataType::Date32 => {
            let arr = column
                .as_any()
                .downcast_ref::<Date32Array>()
                .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?;
            let bytes = arr.value(row).to_le_bytes();
            out[..4].copy_from_slice(&bytes);
            4
        }
        other => {
            return Err(Error::LogicalError(format!(
                "type {other} is not a fixed-width join key"
            )))
        }
    })
}

fn byte_key(column: &ArrayRef, row: usize) -> Result<Vec<u8>> {
    use arrow::array::*;

    Ok(match column.data_type() {
        DataType::Utf8 => column
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?
            .value(row)
            .as_bytes()
            .to_vec(),
        DataType::Binary => column
            .as_any()
            .downcast_ref::<BinaryArray>()
            .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?
            .value(row)
            .to_vec(),
        DataType::FixedSizeBinary(_) => column
            .as_any()
            .downcast_ref::<FixedSizeBinaryArray>()
            .ok_or_else(|| Error::LogicalError("key column type mismatch".into()))?
            .value(row)
            .to_vec(),
        other => {
            return Err(Error::LogicalError(format!(
                "type {other} is not a byte join key"
            )))
        }
    })
}

/// Bytes of one column for the serialized method: fixed types use their LE
/// encoding, byte types their contents.
fn serialized_part(column: &ArrayRef, row: usize) -> Result<Vec<u8>> {
    if fixed_key_width(column.data_type()).is_some() {
        let mut buf = [0u8; 8];
        let width = write_fixed(column, row, &mut buf)?;
        Ok(buf[..width].to_vec())
    } else {
        byte_key(column, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, Int64Array, StringArray, UInt8Array};
    use std::sync::Arc;

    #[test]
    fn method_choice() {
        let utf8 = [DataType::Utf8];
        assert_eq!(choose_method(&utf8, &[None]), JoinMethod::KeyString);
        assert_eq!(
            choose_method(&utf8, &[Some(Collation::Binary)]),
            JoinMethod::KeyStringBinary
        );
        assert_eq!(
            choose_method(&utf8, &[Some(Collation::BinaryPadding)]),
            JoinMethod::KeyStringBinaryPadding
        );
        assert_eq!(
            choose_method(&[DataType::FixedSizeBinary(16)], &[None]),
            JoinMethod::KeyFixedString
        );
        assert_eq!(choose_method(&[DataType::UInt8], &[None]), JoinMethod::Key8);
        assert_eq!(choose_method(&[DataType::Int16], &[None]), JoinMethod::Key16);
        assert_eq!(choose_method(&[DataType::Int32], &[None]), JoinMethod::Key32);
        assert_eq!(choose_method(&[DataType::Int64], &[None]), JoinMethod::Key64);
        assert_eq!(
            choose_method(&[DataType::Int64, DataType::Int32], &[None, None]),
            JoinMethod::Keys128
        );
        assert_eq!(
            choose_method(
                &[DataType::Int64, DataType::Int64, DataType::Int64],
                &[None, None, None]
            ),
            JoinMethod::Keys256
        );
        assert_eq!(
            choose_method(&[DataType::Int64, DataType::Utf8], &[None, None]),
            JoinMethod::Serialized
        );
    }

    #[test]
    fn null_key_parts_never_render() {
        let descs = vec![JoinKeyDesc::new(0, 0)];
        let extractor = KeyExtractor::new(JoinMethod::Key64, &descs);
        let col: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None]));
        assert!(extractor.key_at(&[Arc::clone(&col)], 0).unwrap().is_some());
        assert!(extractor.key_at(&[col], 1).unwrap().is_none());
    }

    #[test]
    fn padding_collation_trims_trailing_spaces() {
        let descs = vec![JoinKeyDesc::new(0, 0).with_collation(Collation::BinaryPadding)];
        let extractor = KeyExtractor::new(JoinMethod::KeyStringBinaryPadding, &descs);
        let a: ArrayRef = Arc::new(StringArray::from(vec!["abc   "]));
        let b: ArrayRef = Arc::new(StringArray::from(vec!["abc"]));
        let ka = extractor.key_at(&[a], 0).unwrap().unwrap();
        let kb = extractor.key_at(&[b], 0).unwrap().unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn case_insensitive_collation_folds() {
        let descs = vec![JoinKeyDesc::new(0, 0).with_collation(Collation::Utf8General)];
        let extractor = KeyExtractor::new(JoinMethod::KeyString, &descs);
        let a: ArrayRef = Arc::new(StringArray::from(vec!["HeLLo"]));
        let b: ArrayRef = Arc::new(StringArray::from(vec!["hello"]));
        assert_eq!(
            extractor.key_at(&[a], 0).unwrap(),
            extractor.key_at(&[b], 0).unwrap()
        );
    }

    #[test]
    fn packed_keys_distinguish_column_values() {
        let descs = vec![JoinKeyDesc::new(0, 0), JoinKeyDesc::new(1, 1)];
        let extractor = KeyExtractor::new(JoinMethod::Keys128, &descs);
        let a: ArrayRef = Arc::new(Int64Array::from(vec![1i64]));
        let b: ArrayRef = Arc::new(Int32Array::from(vec![2i32]));
        let c: ArrayRef = Arc::new(Int64Array::from(vec![2i64]));
        let d: ArrayRef = Arc::new(Int32Array::from(vec![1i32]));
        let k1 = extractor
            .key_at(&[Arc::clone(&a), Arc::clone(&b)], 0)
            .unwrap();
        let k2 = extractor.key_at(&[c, d], 0).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn serialized_keys_are_unambiguous() {
        let descs = vec![JoinKeyDesc::new(0, 0), JoinKeyDesc::new(1, 1)];
        let extractor = KeyExtractor::new(JoinMethod::Serialized, &descs);
        // ("ab", "c") must differ from ("a", "bc").
        let a1: ArrayRef = Arc::new(StringArray::from(vec!["ab"]));
        let b1: ArrayRef = Arc::new(StringArray::from(vec!["c"]));
        let a2: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let b2: ArrayRef = Arc::new(StringArray::from(vec!["bc"]));
        let k1 = extractor.key_at(&[a1, b1], 0).unwrap();
        let k2 = extractor.key_at(&[a2, b2], 0).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn key8_uses_single_byte(){
        let descs = vec![JoinKeyDesc::new(0, 0)];
        let extractor = KeyExtractor::new(JoinMethod::Key8, &descs);
        let col: ArrayRef = Arc::new(UInt8Array::from(vec![7u8]));
        assert_eq!(
            extractor.key_at(&[col], 0).unwrap(),
            Some(JoinKeyValue::U8(7))
        );
    }
}
