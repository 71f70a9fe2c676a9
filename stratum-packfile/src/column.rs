//! Column definitions plus the per-pack value encoding.
//!
//! Each pack of a column serializes as `[u32 body_len][body]`. For
//! fixed-width types the body is the raw little-endian value stream (null
//! slots write zero); for strings/binary it is `rows` u32 end-offsets
//! followed by the concatenated bytes. Null maps are a one-byte-per-row
//! stream in the column's `.null.dat` file, framed the same way.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryBuilder, PrimitiveBuilder, StringBuilder,
};
use arrow::compute::{can_cast_types, cast};
use arrow::datatypes::*;
use stratum_common::codecs::{get_u32, put_u32};
use stratum_result::{Error, Result};

use crate::format::TypeTag;
use crate::minmax_index::ScalarValue;

/// A column the caller wants to read (or the writer persists).
#[derive(Clone, Debug)]
pub struct ColumnDefine {
    pub id: crate::format::ColId,
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Default used when the column is missing from the file (post-DDL).
    /// `None` means null for nullable columns and the type's zero value
    /// otherwise.
    pub default: Option<ScalarValue>,
}

impl ColumnDefine {
    pub fn new(id: crate::format::ColId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            nullable: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, default: ScalarValue) -> Self {
        self.default = Some(default);
        self
    }
}

macro_rules! encode_prim {
    ($array:expr, $out:expr, $arr_ty:ty) => {{
        let arr = $array
            .as_any()
            .downcast_ref::<$arr_ty>()
            .ok_or_else(|| Error::LogicalError("array type mismatch in encode".into()))?;
        for row in 0..arr.len() {
            let value = if arr.is_null(row) {
                Default::default()
            } else {
                arr.value(row)
            };
            $out.extend_from_slice(&value.to_le_bytes());
        }
    }};
}

/// Encode one pack's values (length-prefixed body).
pub fn encode_pack(array: &ArrayRef) -> Result<Vec<u8>> {
    use arrow::array::*;

    let mut body = Vec::new();
    match array.data_type() {
        DataType::Int8 => encode_prim!(array, body, Int8Array),
        DataType::Int16 => encode_prim!(array, body, Int16Array),
        DataType::Int32 => encode_prim!(array, body, Int32Array),
        DataType::Int64 => encode_prim!(array, body, Int64Array),
        DataType::UInt8 => encode_prim!(array, body, UInt8Array),
        DataType::UInt16 => encode_prim!(array, body, UInt16Array),
        DataType::UInt32 => encode_prim!(array, body, UInt32Array),
        DataType::UInt64 => encode_prim!(array, body, UInt64Array),
        DataType::Float32 => encode_prim!(array, body, Float32Array),
        DataType::Float64 => encode_prim!(array, body, Float64Array),
        DataType::Utf8 => {
            let arr = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| Error::LogicalError("array type mismatch in encode".into()))?;
            encode_var_size(&mut body, arr.len(), |row| {
                if arr.is_null(row) {
                    &[]
                } else {
                    arr.value(row).as_bytes()
                }
            });
        }
        DataType::Binary => {
            let arr = array
                .as_any()
                .downcast_ref::<BinaryArray>()
                .ok_or_else(|| Error::LogicalError("array type mismatch in encode".into()))?;
            encode_var_size(&mut body, arr.len(), |row| {
                if arr.is_null(row) {
                    &[]
                } else {
                    arr.value(row)
                }
            });
        }
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported pack column type {other}"
            )))
        }
    }

    let mut out = Vec::with_capacity(4 + body.len());
    put_u32(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_var_size<'a>(body: &mut Vec<u8>, rows: usize, value_at: impl Fn(usize) -> &'a [u8]) {
    let mut end = 0u32;
    for row in 0..rows {
        end += value_at(row).len() as u32;
        put_u32(body, end);
    }
    for row in 0..rows {
        body.extend_from_slice(value_at(row));
    }
}

/// Encode one pack's null map (length-prefixed, one byte per row, 1 = null).
pub fn encode_null_map(array: &ArrayRef) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + array.len());
    put_u32(&mut out, array.len() as u32);
    for row in 0..array.len() {
        out.push(array.is_null(row) as u8);
    }
    out
}

macro_rules! decode_prim {
    ($body:expr, $rows:expr, $nulls:expr, $prim_ty:ty, $width:expr, $read:expr) => {{
        let mut builder = PrimitiveBuilder::<$prim_ty>::with_capacity($rows);
        for row in 0..$rows {
            let offset = row * $width;
            if $nulls.map(|n: &[u8]| n[row] != 0).unwrap_or(false) {
                builder.append_null();
            } else {
                builder.append_value($read(&$body[offset..offset + $width]));
            }
        }
        Arc::new(builder.finish()) as ArrayRef
    }};
}

/// Decode one pack body (without the length prefix) into an arrow array.
pub fn decode_pack(
    tag: TypeTag,
    body: &[u8],
    rows: usize,
    nulls: Option<&[u8]>,
) -> Result<ArrayRef> {
    if let Some(width) = tag.fixed_width() {
        if body.len() < rows * width {
            return Err(Error::LogicalError(format!(
                "pack body too small: {} < {}",
                body.len(),
                rows * width
            )));
        }
    }
    let array = match tag {
        TypeTag::Int8 => decode_prim!(body, rows, nulls, Int8Type, 1, |b: &[u8]| b[0] as i8),
        TypeTag::Int16 => decode_prim!(body, rows, nulls, Int16Type, 2, |b: &[u8]| {
            i16::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::Int32 => decode_prim!(body, rows, nulls, Int32Type, 4, |b: &[u8]| {
            i32::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::Int64 => decode_prim!(body, rows, nulls, Int64Type, 8, |b: &[u8]| {
            i64::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::UInt8 => decode_prim!(body, rows, nulls, UInt8Type, 1, |b: &[u8]| b[0]),
        TypeTag::UInt16 => decode_prim!(body, rows, nulls, UInt16Type, 2, |b: &[u8]| {
            u16::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::UInt32 => decode_prim!(body, rows, nulls, UInt32Type, 4, |b: &[u8]| {
            u32::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::UInt64 => decode_prim!(body, rows, nulls, UInt64Type, 8, |b: &[u8]| {
            u64::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::Float32 => decode_prim!(body, rows, nulls, Float32Type, 4, |b: &[u8]| {
            f32::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::Float64 => decode_prim!(body, rows, nulls, Float64Type, 8, |b: &[u8]| {
            f64::from_le_bytes(b.try_into().unwrap())
        }),
        TypeTag::Utf8 => {
            let mut builder = StringBuilder::new();
            decode_var_size(body, rows, |row, bytes| {
                if nulls.map(|n| n[row] != 0).unwrap_or(false) {
                    builder.append_null();
                } else {
                    builder.append_value(std::str::from_utf8(bytes).unwrap_or(""));
                }
            })?;
            Arc::new(builder.finish()) as ArrayRef
        }
        TypeTag::Binary => {
            let mut builder = BinaryBuilder::new();
            decode_var_size(body, rows, |row, bytes| {
                if nulls.map(|n| n[row] != 0).unwrap_or(false) {
                    builder.append_null();
                } else {
                    builder.append_value(bytes);
                }
            })?;
            Arc::new(builder.finish()) as ArrayRef
        }
    };
    Ok(array)
}

fn decode_var_size(
    body: &[u8],
    rows: usize,
    mut visit: impl FnMut(usize, &[u8]),
) -> Result<()> {
    if body.len() < rows * 4 {
        return Err(Error::LogicalError("var-size pack body truncated".into()));
    }
    let data = &body[rows * 4..];
    let mut begin = 0usize;
    for row in 0..rows {
        let end = get_u32(&body[row * 4..]) as usize;
        if end < begin || end > data.len() {
            return Err(Error::LogicalError("var-size offsets corrupted".into()));
        }
        visit(row, &data[begin..end]);
        begin = end;
    }
    Ok(())
}

/// Build a constant column of `rows` copies of `value` (or nulls/zeroes).
pub fn new_constant_array(
    data_type: &DataType,
    rows: usize,
    value: Option<&ScalarValue>,
) -> Result<ArrayRef> {
    use arrow::array::*;

    macro_rules! const_prim {
        ($arr_ty:ty, $native:ty, $extract:pat => $val:expr) => {{
            match value {
                Some($extract) => {
                    Arc::new(<$arr_ty>::from(vec![$val as $native; rows])) as ArrayRef
                }
                Some(other) => {
                    return Err(Error::LogicalError(format!(
                        "default value {other:?} does not fit column type"
                    )))
                }
                None => Arc::new(<$arr_ty>::from(vec![<$native>::default(); rows])) as ArrayRef,
            }
        }};
    }

    Ok(match data_type {
        DataType::Int8 => const_prim!(Int8Array, i8, ScalarValue::Int(v) => *v),
        DataType::Int16 => const_prim!(Int16Array, i16, ScalarValue::Int(v) => *v),
        DataType::Int32 => const_prim!(Int32Array, i32, ScalarValue::Int(v) => *v),
        DataType::Int64 => const_prim!(Int64Array, i64, ScalarValue::Int(v) => *v),
        DataType::UInt8 => const_prim!(UInt8Array, u8, ScalarValue::UInt(v) => *v),
        DataType::UInt16 => const_prim!(UInt16Array, u16, ScalarValue::UInt(v) => *v),
        DataType::UInt32 => const_prim!(UInt32Array, u32, ScalarValue::UInt(v) => *v),
        DataType::UInt64 => const_prim!(UInt64Array, u64, ScalarValue::UInt(v) => *v),
        DataType::Float32 => const_prim!(Float32Array, f32, ScalarValue::Float(v) => *v),
        DataType::Float64 => const_prim!(Float64Array, f64, ScalarValue::Float(v) => *v),
        DataType::Utf8 => match value {
            Some(ScalarValue::Bytes(bytes)) => {
                let s = std::str::from_utf8(bytes).unwrap_or("");
                Arc::new(StringArray::from(vec![s; rows])) as ArrayRef
            }
            Some(other) => {
                return Err(Error::LogicalError(format!(
                    "default value {other:?} does not fit utf8 column"
                )))
            }
            None => Arc::new(StringArray::from(vec![""; rows])) as ArrayRef,
        },
        DataType::Binary => match value {
            Some(ScalarValue::Bytes(bytes)) => {
                Arc::new(BinaryArray::from(vec![bytes.as_slice(); rows])) as ArrayRef
            }
            Some(other) => {
                return Err(Error::LogicalError(format!(
                    "default value {other:?} does not fit binary column"
                )))
            }
            None => Arc::new(BinaryArray::from(vec![&[] as &[u8]; rows])) as ArrayRef,
        },
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported constant column type {other}"
            )))
        }
    })
}

/// Build an all-null column (missing column whose default is null).
pub fn new_null_array(data_type: &DataType, rows: usize) -> ArrayRef {
    arrow::array::new_null_array(data_type, rows)
}

/// Cast a column read with the on-disk type to the requested define.
/// Identity is free; otherwise a value-preserving arrow cast is applied.
/// Nullability narrowing is the caller's responsibility (unchecked here).
pub fn convert_column(array: ArrayRef, define: &ColumnDefine) -> Result<ArrayRef> {
    if array.data_type() == &define.data_type {
        return Ok(array);
    }
    if !can_cast_types(array.data_type(), &define.data_type) {
        return Err(Error::BadRequest(format!(
            "cannot convert column {} from {} to {}",
            define.name,
            array.data_type(),
            define.data_type
        )));
    }
    Ok(cast(&array, &define.data_type)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};

    #[test]
    fn primitive_round_trip_with_nulls() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(-3)]));
        let encoded = encode_pack(&array).unwrap();
        let nulls = encode_null_map(&array);
        let body = &encoded[4..];
        let null_body = &nulls[4..];
        let back = decode_pack(TypeTag::Int64, body, 3, Some(null_body)).unwrap();
        assert_eq!(back.as_ref(), array.as_ref());
    }

    #[test]
    fn string_round_trip() {
        let array: ArrayRef = Arc::new(StringArray::from(vec![
            Some("alpha"),
            Some(""),
            None,
            Some("gamma"),
        ]));
        let encoded = encode_pack(&array).unwrap();
        let nulls = encode_null_map(&array);
        let back =
            decode_pack(TypeTag::Utf8, &encoded[4..], 4, Some(&nulls[4..])).unwrap();
        assert_eq!(back.as_ref(), array.as_ref());
    }

    #[test]
    fn constant_and_null_columns() {
        let constant =
            new_constant_array(&DataType::Int64, 4, Some(&ScalarValue::Int(7))).unwrap();
        let expected: ArrayRef = Arc::new(Int64Array::from(vec![7i64; 4]));
        assert_eq!(constant.as_ref(), expected.as_ref());

        let nulls = new_null_array(&DataType::Utf8, 3);
        assert_eq!(nulls.null_count(), 3);
    }

    #[test]
    fn convert_widens_int32_to_int64() {
        let array: ArrayRef = Arc::new(arrow::array::Int32Array::from(vec![1, 2, 3]));
        let define = ColumnDefine::new(5, "c", DataType::Int64);
        let converted = convert_column(array, &define).unwrap();
        let expected: ArrayRef = Arc::new(Int64Array::from(vec![1i64, 2, 3]));
        assert_eq!(converted.as_ref(), expected.as_ref());
    }
}
