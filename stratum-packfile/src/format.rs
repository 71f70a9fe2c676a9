//! On-disk naming, schema variants, and column type tags.

use arrow::datatypes::DataType;
use stratum_result::{Error, Result};

/// Column identifier. Negative ids are reserved for the implicit columns.
pub type ColId = i64;

/// Implicit row-handle column (Int64, sorted non-decreasingly across packs).
pub const HANDLE_COL_ID: ColId = -1;
/// Implicit MVCC version column (UInt64).
pub const VERSION_COL_ID: ColId = -2;
/// Implicit delete-mark column (UInt8, 1 = deleted).
pub const DELMARK_COL_ID: ColId = -3;

pub const HANDLE_COL_NAME: &str = "_stratum_handle";
pub const VERSION_COL_NAME: &str = "_stratum_version";
pub const DELMARK_COL_NAME: &str = "_stratum_delmark";

/// Schema variants a pack file directory can be laid out in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MetaFormat {
    /// `meta.txt` + binary `pack`/`property` files, no frame checksums.
    Legacy,
    /// Legacy layout plus a `config` record and per-frame checksums.
    Checksummed,
    /// Single packed `meta` file with a footer checksum; frames as Checksummed.
    #[default]
    PackedMeta,
}

pub const META_TXT_FILE: &str = "meta.txt";
pub const PACK_STATS_FILE: &str = "pack";
pub const PROPERTY_FILE: &str = "property";
pub const CONFIG_FILE: &str = "config";
pub const PACKED_META_FILE: &str = "meta";

/// File-name base for a column id; negative ids encode as `neg_<abs>` so the
/// names stay filesystem-friendly.
pub fn col_name_base(col_id: ColId) -> String {
    if col_id < 0 {
        format!("neg_{}", -col_id)
    } else {
        format!("{col_id}")
    }
}

pub fn col_data_file(col_id: ColId) -> String {
    format!("{}.dat", col_name_base(col_id))
}

pub fn col_mark_file(col_id: ColId) -> String {
    format!("{}.mrk", col_name_base(col_id))
}

pub fn col_null_data_file(col_id: ColId) -> String {
    format!("{}.null.dat", col_name_base(col_id))
}

pub fn col_null_mark_file(col_id: ColId) -> String {
    format!("{}.null.mrk", col_name_base(col_id))
}

pub fn col_index_file(col_id: ColId) -> String {
    format!("{}.idx", col_name_base(col_id))
}

/// Stable on-disk tag for a column's value type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
    Utf8 = 11,
    Binary = 12,
}

impl TypeTag {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => TypeTag::Int8,
            2 => TypeTag::Int16,
            3 => TypeTag::Int32,
            4 => TypeTag::Int64,
            5 => TypeTag::UInt8,
            6 => TypeTag::UInt16,
            7 => TypeTag::UInt32,
            8 => TypeTag::UInt64,
            9 => TypeTag::Float32,
            10 => TypeTag::Float64,
            11 => TypeTag::Utf8,
            12 => TypeTag::Binary,
            other => {
                return Err(Error::LogicalError(format!(
                    "unknown column type tag {other}"
                )))
            }
        })
    }

    pub fn from_data_type(data_type: &DataType) -> Result<Self> {
        Ok(match data_type {
            DataType::Int8 => TypeTag::Int8,
            DataType::Int16 => TypeTag::Int16,
            DataType::Int32 => TypeTag::Int32,
            DataType::Int64 => TypeTag::Int64,
            DataType::UInt8 => TypeTag::UInt8,
            DataType::UInt16 => TypeTag::UInt16,
            DataType::UInt32 => TypeTag::UInt32,
            DataType::UInt64 => TypeTag::UInt64,
            DataType::Float32 => TypeTag::Float32,
            DataType::Float64 => TypeTag::Float64,
            DataType::Utf8 => TypeTag::Utf8,
            DataType::Binary => TypeTag::Binary,
            other => {
                return Err(Error::BadRequest(format!(
                    "unsupported pack file column type {other}"
                )))
            }
        })
    }

    pub fn to_data_type(self) -> DataType {
        match self {
            TypeTag::Int8 => DataType::Int8,
            TypeTag::Int16 => DataType::Int16,
            TypeTag::Int32 => DataType::Int32,
            TypeTag::Int64 => DataType::Int64,
            TypeTag::UInt8 => DataType::UInt8,
            TypeTag::UInt16 => DataType::UInt16,
            TypeTag::UInt32 => DataType::UInt32,
            TypeTag::UInt64 => DataType::UInt64,
            TypeTag::Float32 => DataType::Float32,
            TypeTag::Float64 => DataType::Float64,
            TypeTag::Utf8 => DataType::Utf8,
            TypeTag::Binary => DataType::Binary,
        }
    }

    /// Width in bytes of one value, or `None` for variable-size types.
    pub fn fixed_width(self) -> Option<usize> {
        Some(match self {
            TypeTag::Int8 | TypeTag::UInt8 => 1,
            TypeTag::Int16 | TypeTag::UInt16 => 2,
            TypeTag::Int32 | TypeTag::UInt32 | TypeTag::Float32 => 4,
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Float64 => 8,
            TypeTag::Utf8 | TypeTag::Binary => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for tag in 1..=12u8 {
            let t = TypeTag::from_u8(tag).unwrap();
            assert_eq!(t as u8, tag);
            assert_eq!(TypeTag::from_data_type(&t.to_data_type()).unwrap(), t);
        }
        assert!(TypeTag::from_u8(0).is_err());
    }

    #[test]
    fn implicit_column_file_names() {
        assert_eq!(col_data_file(HANDLE_COL_ID), "neg_1.dat");
        assert_eq!(col_mark_file(7), "7.mrk");
        assert_eq!(col_null_data_file(VERSION_COL_ID), "neg_2.null.dat");
    }
}
