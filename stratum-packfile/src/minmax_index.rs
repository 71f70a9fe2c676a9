//! Per-pack min/max/null statistics for one column.

use arrow::array::{Array, ArrayRef};
use arrow::datatypes::DataType;
use stratum_common::codecs::{put_f64, put_i64, put_u32, put_u64, ByteReader};
use stratum_result::{Error, Result};

/// Typed scalar held by the index. Integers normalize into `Int` / `UInt`
/// domains, floats into `Float`, strings and binary into `Bytes`.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Partial order inside one domain. Cross-domain comparisons are `None`
    /// and make rough-set evaluation fall back to `Some`.
    pub fn partial_cmp_same(&self, other: &ScalarValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (ScalarValue::Int(a), ScalarValue::Int(b)) => Some(a.cmp(b)),
            (ScalarValue::UInt(a), ScalarValue::UInt(b)) => Some(a.cmp(b)),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.partial_cmp(b),
            (ScalarValue::Bytes(a), ScalarValue::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ScalarValue::Int(_) => 0,
            ScalarValue::UInt(_) => 1,
            ScalarValue::Float(_) => 2,
            ScalarValue::Bytes(_) => 3,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            ScalarValue::Int(v) => put_i64(out, *v),
            ScalarValue::UInt(v) => put_u64(out, *v),
            ScalarValue::Float(v) => put_f64(out, *v),
            ScalarValue::Bytes(v) => {
                put_u32(out, v.len() as u32);
                out.extend_from_slice(v);
            }
        }
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let tag = reader
            .read_u8()
            .ok_or_else(|| Error::LogicalError("scalar truncated".into()))?;
        let truncated = || Error::LogicalError("scalar truncated".into());
        Ok(match tag {
            0 => ScalarValue::Int(reader.read_i64().ok_or_else(truncated)?),
            1 => ScalarValue::UInt(reader.read_u64().ok_or_else(truncated)?),
            2 => ScalarValue::Float(reader.read_f64().ok_or_else(truncated)?),
            3 => {
                let len = reader.read_u32().ok_or_else(truncated)? as usize;
                ScalarValue::Bytes(reader.read_bytes(len).ok_or_else(truncated)?.to_vec())
            }
            other => {
                return Err(Error::LogicalError(format!("unknown scalar tag {other}")));
            }
        })
    }
}

/// Statistics of one pack: value bounds plus null presence. A pack that is
/// entirely null carries no bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct PackBounds {
    pub min: Option<ScalarValue>,
    pub max: Option<ScalarValue>,
    pub has_null: bool,
}

/// Min/max index over all packs of one column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MinMaxIndex {
    pub packs: Vec<PackBounds>,
}

impl MinMaxIndex {
    pub fn push_pack(&mut self, array: &ArrayRef) -> Result<()> {
        let mut min: Option<ScalarValue> = None;
        let mut max: Option<ScalarValue> = None;
        for row in 0..array.len() {
            if array.is_null(row) {
                continue;
            }
            let value = scalar_at(array, row)?;
            match &min {
                Some(cur) if value.partial_cmp_same(cur) != Some(std::cmp::Ordering::Less) => {}
                _ => min = Some(value.clone()),
            }
            match &max {
                Some(cur) if value.partial_cmp_same(cur) != Some(std::cmp::Ordering::Greater) => {}
                _ => max = Some(value),
            }
        }
        self.packs.push(PackBounds {
            min,
            max,
            has_null: array.null_count() > 0,
        });
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, self.packs.len() as u32);
        for pack in &self.packs {
            out.push(pack.has_null as u8);
            match (&pack.min, &pack.max) {
                (Some(min), Some(max)) => {
                    out.push(1);
                    min.encode(&mut out);
                    max.encode(&mut out);
                }
                _ => out.push(0),
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let truncated = || Error::LogicalError("minmax index truncated".into());
        let count = reader.read_u32().ok_or_else(truncated)? as usize;
        let mut packs = Vec::with_capacity(count);
        for _ in 0..count {
            let has_null = reader.read_u8().ok_or_else(truncated)? != 0;
            let has_bounds = reader.read_u8().ok_or_else(truncated)? != 0;
            let (min, max) = if has_bounds {
                (
                    Some(ScalarValue::decode(&mut reader)?),
                    Some(ScalarValue::decode(&mut reader)?),
                )
            } else {
                (None, None)
            };
            packs.push(PackBounds { min, max, has_null });
        }
        Ok(Self { packs })
    }
}

/// Extract one row as a normalized scalar.
pub fn scalar_at(array: &ArrayRef, row: usize) -> Result<ScalarValue> {
    use arrow::array::*;

    macro_rules! prim {
        ($ty:ty, $variant:ident, $cast:ty) => {{
            let arr = array
                .as_any()
                .downcast_ref::<$ty>()
                .ok_or_else(|| Error::LogicalError("array type mismatch".into()))?;
            ScalarValue::$variant(arr.value(row) as $cast)
        }};
    }

    Ok(match array.data_type() {
        DataType::Int8 => prim!(Int8Array, Int, i64),
        DataType::Int16 => prim!(Int16Array, Int, i64),
        DataType::Int32 => prim!(Int32Array, Int, i64),
        DataType::Int64 => prim!(Int64Array, Int, i64),
        DataType::UInt8 => prim!(UInt8Array, UInt, u64),
        DataType::UInt16 => prim!(UInt16Array, UInt, u64),
        DataType::UInt32 => prim!(UInt32Array, UInt, u64),
        DataType::UInt64 => prim!(UInt64Array, UInt, u64),
        DataType::Float32 => prim!(Float32Array, Float, f64),
        DataType::Float64 => prim!(Float64Array, Float, f64),
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::LogicalError("array type mismatch".into()))?;
            ScalarValue::Bytes(arr.value(row).as_bytes().to_vec())
        }
        DataType::Binary => {
            let arr = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| Error::LogicalError("array type mismatch".into()))?;
            ScalarValue::Bytes(arr.value(row).to_vec())
        }
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported type {other} in min/max index"
            )))
        }
    })
}
