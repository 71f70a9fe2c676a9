//! Pack file metadata records and the three on-disk schema variants.
//!
//! * Legacy: human-readable `meta.txt` plus binary `pack` / `property`
//!   files; data frames carry no checksums.
//! * Checksummed: Legacy layout plus a binary `config` record; every frame
//!   carries a checksum prefix.
//! * PackedMeta: everything in a single binary `meta` file guarded by a
//!   trailing CRC64 footer; frames as Checksummed.

use std::path::Path;
use std::sync::Arc;

use stratum_common::checksum::{crc64, ChecksumAlgo};
use stratum_common::codecs::{put_u32, put_u64, ByteReader};
use stratum_common::file_provider::FileProvider;
use stratum_result::{Error, Result};

use crate::compress::CompressionMethod;
use crate::format::{
    ColId, MetaFormat, TypeTag, CONFIG_FILE, META_TXT_FILE, PACKED_META_FILE, PACK_STATS_FILE,
    PROPERTY_FILE,
};

const PACKED_META_MAGIC: &[u8; 4] = b"SPKM";
const PACKED_META_VERSION: u32 = 3;

/// Per-column statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnStat {
    pub col_id: ColId,
    pub type_tag: TypeTag,
    pub nullable: bool,
    /// Average serialized cell size, used to size read buffers.
    pub avg_size: u64,
    pub serialized_bytes: u64,
    pub data_bytes: u64,
    pub mark_bytes: u64,
    pub null_data_bytes: u64,
    pub null_mark_bytes: u64,
    pub index_bytes: u64,
}

/// Per-pack statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PackStat {
    pub rows: u64,
    /// Rows that might be shadowed or duplicated by neighbors; clean reads
    /// require all packs of a run to report zero.
    pub not_clean: u64,
    pub first_version: u64,
    pub first_tag: u8,
    pub bytes: u64,
}

/// Per-pack properties filled by the writer for GC and fast-scan decisions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PackProperty {
    pub gc_hint_version: u64,
    pub deleted_rows: u64,
}

#[derive(Clone, Debug)]
pub struct PackFileMeta {
    pub format: MetaFormat,
    pub checksum_algorithm: ChecksumAlgo,
    pub checksum_frame_length: u32,
    pub compression: CompressionMethod,
    pub compression_level: i32,
    pub column_stats: Vec<ColumnStat>,
    pub pack_stats: Vec<PackStat>,
    pub properties: Vec<PackProperty>,
}

impl PackFileMeta {
    pub fn total_rows(&self) -> u64 {
        self.pack_stats.iter().map(|stat| stat.rows).sum()
    }

    pub fn pack_count(&self) -> usize {
        self.pack_stats.len()
    }

    pub fn column_stat(&self, col_id: ColId) -> Option<&ColumnStat> {
        self.column_stats.iter().find(|stat| stat.col_id == col_id)
    }

    /// Frame checksum algorithm for data files; Legacy files have none.
    pub fn frame_checksum(&self) -> ChecksumAlgo {
        match self.format {
            MetaFormat::Legacy => ChecksumAlgo::None,
            _ => self.checksum_algorithm,
        }
    }

    pub fn write(&self, provider: &Arc<dyn FileProvider>, dir: &Path) -> Result<()> {
        match self.format {
            MetaFormat::Legacy => {
                self.write_legacy_files(provider, dir)?;
            }
            MetaFormat::Checksummed => {
                self.write_legacy_files(provider, dir)?;
                write_file(provider, &dir.join(CONFIG_FILE), &self.encode_config())?;
            }
            MetaFormat::PackedMeta => {
                let mut body = Vec::new();
                body.extend_from_slice(PACKED_META_MAGIC);
                put_u32(&mut body, PACKED_META_VERSION);
                body.extend_from_slice(&self.encode_config());
                put_u32(&mut body, self.column_stats.len() as u32);
                for stat in &self.column_stats {
                    encode_column_stat(&mut body, stat);
                }
                put_u32(&mut body, self.pack_stats.len() as u32);
                for stat in &self.pack_stats {
                    encode_pack_stat(&mut body, stat);
                }
                for property in &self.properties {
                    put_u64(&mut body, property.gc_hint_version);
                    put_u64(&mut body, property.deleted_rows);
                }
                let footer = crc64(&body);
                put_u64(&mut body, footer);
                write_file(provider, &dir.join(PACKED_META_FILE), &body)?;
            }
        }
        Ok(())
    }

    fn write_legacy_files(&self, provider: &Arc<dyn FileProvider>, dir: &Path) -> Result<()> {
        let mut text = String::new();
        text.push_str("format version: 1\n");
        text.push_str(&format!("packs: {}\n", self.pack_stats.len()));
        text.push_str(&format!("columns: {}\n", self.column_stats.len()));
        for stat in &self.column_stats {
            text.push_str(&format!(
                "col: {} {} {} {} {} {} {} {} {} {}\n",
                stat.col_id,
                stat.type_tag as u8,
                stat.nullable as u8,
                stat.avg_size,
                stat.serialized_bytes,
                stat.data_bytes,
                stat.mark_bytes,
                stat.null_data_bytes,
                stat.null_mark_bytes,
                stat.index_bytes,
            ));
        }
        write_file(provider, &dir.join(META_TXT_FILE), text.as_bytes())?;

        let mut packs = Vec::new();
        for stat in &self.pack_stats {
            encode_pack_stat(&mut packs, stat);
        }
        write_file(provider, &dir.join(PACK_STATS_FILE), &packs)?;

        let mut props = Vec::new();
        for property in &self.properties {
            put_u64(&mut props, property.gc_hint_version);
            put_u64(&mut props, property.deleted_rows);
        }
        write_file(provider, &dir.join(PROPERTY_FILE), &props)
    }

    fn encode_config(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10);
        out.push(self.checksum_algorithm.tag());
        put_u32(&mut out, self.checksum_frame_length);
        out.push(self.compression as u8);
        out.extend_from_slice(&self.compression_level.to_le_bytes());
        out
    }

    /// Open metadata from a pack file directory, detecting the variant.
    /// `expected_algo` refuses files configured with a different checksum
    /// algorithm.
    pub fn read(
        provider: &Arc<dyn FileProvider>,
        dir: &Path,
        expected_algo: Option<ChecksumAlgo>,
    ) -> Result<Self> {
        let meta = if provider.exists(&dir.join(PACKED_META_FILE)) {
            Self::read_packed(provider, dir)?
        } else if provider.exists(&dir.join(META_TXT_FILE)) {
            let format = if provider.exists(&dir.join(CONFIG_FILE)) {
                MetaFormat::Checksummed
            } else {
                MetaFormat::Legacy
            };
            Self::read_legacy(provider, dir, format)?
        } else {
            return Err(Error::NotFound(format!(
                "no pack file metadata under {}",
                dir.display()
            )));
        };

        if let Some(expected) = expected_algo {
            if meta.format != MetaFormat::Legacy && meta.checksum_algorithm != expected {
                return Err(Error::ChecksumConfigMismatch(format!(
                    "file configured with {:?}, caller expects {expected:?}",
                    meta.checksum_algorithm
                )));
            }
        }
        Ok(meta)
    }

    fn read_packed(provider: &Arc<dyn FileProvider>, dir: &Path) -> Result<Self> {
        let bytes = read_file(provider, &dir.join(PACKED_META_FILE))?;
        if bytes.len() < 8 {
            return Err(Error::LogicalError("packed meta truncated".into()));
        }
        let (body, footer_bytes) = bytes.split_at(bytes.len() - 8);
        let footer = u64::from_le_bytes(footer_bytes.try_into().unwrap());
        let actual = crc64(body);
        if footer != actual {
            return Err(Error::ChecksumMismatch(format!(
                "packed meta footer expected={footer:#x} actual={actual:#x}"
            )));
        }

        let mut reader = ByteReader::new(body);
        let truncated = || Error::LogicalError("packed meta truncated".into());
        let magic = reader.read_bytes(4).ok_or_else(truncated)?;
        if magic != PACKED_META_MAGIC {
            return Err(Error::LogicalError("packed meta bad magic".into()));
        }
        let version = reader.read_u32().ok_or_else(truncated)?;
        if version != PACKED_META_VERSION {
            return Err(Error::LogicalError(format!(
                "unsupported packed meta version {version}"
            )));
        }
        let (algo, frame_len, compression, level) = decode_config(&mut reader)?;

        let column_count = reader.read_u32().ok_or_else(truncated)? as usize;
        let mut column_stats = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            column_stats.push(decode_column_stat(&mut reader)?);
        }
        let pack_count = reader.read_u32().ok_or_else(truncated)? as usize;
        let mut pack_stats = Vec::with_capacity(pack_count);
        for _ in 0..pack_count {
            pack_stats.push(decode_pack_stat(&mut reader)?);
        }
        let mut properties = Vec::with_capacity(pack_count);
        for _ in 0..pack_count {
            properties.push(PackProperty {
                gc_hint_version: reader.read_u64().ok_or_else(truncated)?,
                deleted_rows: reader.read_u64().ok_or_else(truncated)?,
            });
        }

        Ok(Self {
            format: MetaFormat::PackedMeta,
            checksum_algorithm: algo,
            checksum_frame_length: frame_len,
            compression,
            compression_level: level,
            column_stats,
            pack_stats,
            properties,
        })
    }

    fn read_legacy(
        provider: &Arc<dyn FileProvider>,
        dir: &Path,
        format: MetaFormat,
    ) -> Result<Self> {
        let text = String::from_utf8(read_file(provider, &dir.join(META_TXT_FILE))?)
            .map_err(|_| Error::LogicalError("meta.txt is not utf-8".into()))?;
        let mut pack_count = 0usize;
        let mut column_stats = Vec::new();
        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("packs: ") {
                pack_count = rest
                    .trim()
                    .parse()
                    .map_err(|_| Error::LogicalError("bad pack count in meta.txt".into()))?;
            } else if let Some(rest) = line.strip_prefix("col: ") {
                column_stats.push(parse_column_line(rest)?);
            }
        }

        let packs = read_file(provider, &dir.join(PACK_STATS_FILE))?;
        let mut reader = ByteReader::new(&packs);
        let mut pack_stats = Vec::with_capacity(pack_count);
        for _ in 0..pack_count {
            pack_stats.push(decode_pack_stat(&mut reader)?);
        }

        let mut properties = vec![PackProperty::default(); pack_count];
        let property_path = dir.join(PROPERTY_FILE);
        if provider.exists(&property_path) {
            let props = read_file(provider, &property_path)?;
            let mut reader = ByteReader::new(&props);
            for property in properties.iter_mut() {
                let truncated = || Error::LogicalError("property file truncated".into());
                property.gc_hint_version = reader.read_u64().ok_or_else(truncated)?;
                property.deleted_rows = reader.read_u64().ok_or_else(truncated)?;
            }
        }

        let (algo, frame_len, compression, level) = if format == MetaFormat::Checksummed {
            let config = read_file(provider, &dir.join(CONFIG_FILE))?;
            decode_config(&mut ByteReader::new(&config))?
        } else {
            (ChecksumAlgo::None, 0, CompressionMethod::Lz4, 1)
        };

        Ok(Self {
            format,
            checksum_algorithm: algo,
            checksum_frame_length: frame_len,
            compression,
            compression_level: level,
            column_stats,
            pack_stats,
            properties,
        })
    }
}

fn parse_column_line(rest: &str) -> Result<ColumnStat> {
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() != 10 {
        return Err(Error::LogicalError(format!(
            "bad column line in meta.txt: {rest}"
        )));
    }
    let parse_u64 = |s: &str| -> Result<u64> {
        s.parse()
            .map_err(|_| Error::LogicalError(format!("bad number in meta.txt: {s}")))
    };
    Ok(ColumnStat {
        col_id: fields[0]
            .parse()
            .map_err(|_| Error::LogicalError("bad col id in meta.txt".into()))?,
        type_tag: TypeTag::from_u8(parse_u64(fields[1])? as u8)?,
        nullable: parse_u64(fields[2])? != 0,
        avg_size: parse_u64(fields[3])?,
        serialized_bytes: parse_u64(fields[4])?,
        data_bytes: parse_u64(fields[5])?,
        mark_bytes: parse_u64(fields[6])?,
        null_data_bytes: parse_u64(fields[7])?,
        null_mark_bytes: parse_u64(fields[8])?,
        index_bytes: parse_u64(fields[9])?,
    })
}

fn encode_column_stat(out: &mut Vec<u8>, stat: &ColumnStat) {
    out.extend_from_slice(&stat.col_id.to_le_bytes());
    out.push(stat.type_tag as u8);
    out.push(stat.nullable as u8);
    put_u64(out, stat.avg_size);
    put_u64(out, stat.serialized_bytes);
    put_u64(out, stat.data_bytes);
    put_u64(out, stat.mark_bytes);
    put_u64(out, stat.null_data_bytes);
    put_u64(out, stat.null_mark_bytes);
    put_u64(out, stat.index_bytes);
}

fn decode_column_stat(reader: &mut ByteReader<'_>) -> Result<ColumnStat> {
    let truncated = || Error::LogicalError("column stat truncated".into());
    Ok(ColumnStat {
        col_id: reader.read_i64().ok_or_else(truncated)?,
        type_tag: TypeTag::from_u8(reader.read_u8().ok_or_else(truncated)?)?,
        nullable: reader.read_u8().ok_or_else(truncated)? != 0,
        avg_size: reader.read_u64().ok_or_else(truncated)?,
        serialized_bytes: reader.read_u64().ok_or_else(truncated)?,
        data_bytes: reader.read_u64().ok_or_else(truncated)?,
        mark_bytes: reader.read_u64().ok_or_else(truncated)?,
        null_data_bytes: reader.read_u64().ok_or_else(truncated)?,
        null_mark_bytes: reader.read_u64().ok_or_else(truncated)?,
        index_bytes: reader.read_u64().ok_or_else(truncated)?,
    })
}

fn encode_pack_stat(out: &mut Vec<u8>, stat: &PackStat) {
    put_u64(out, stat.rows);
    put_u64(out, stat.not_clean);
    put_u64(out, stat.first_version);
    out.push(stat.first_tag);
    put_u64(out, stat.bytes);
}

fn decode_pack_stat(reader: &mut ByteReader<'_>) -> Result<PackStat> {
    let truncated = || Error::LogicalError("pack stat truncated".into());
    Ok(PackStat {
        rows: reader.read_u64().ok_or_else(truncated)?,
        not_clean: reader.read_u64().ok_or_else(truncated)?,
        first_version: reader.read_u64().ok_or_else(truncated)?,
        first_tag: reader.read_u8().ok_or_else(truncated)?,
        bytes: reader.read_u64().ok_or_else(truncated)?,
    })
}

fn decode_config(
    reader: &mut ByteReader<'_>,
) -> Result<(ChecksumAlgo, u32, CompressionMethod, i32)> {
    let truncated = || Error::LogicalError("config record truncated".into());
    let algo = ChecksumAlgo::from_tag(reader.read_u8().ok_or_else(truncated)?)
        .ok_or_else(|| Error::LogicalError("unknown checksum algorithm tag".into()))?;
    let frame_len = reader.read_u32().ok_or_else(truncated)?;
    let compression = CompressionMethod::from_tag(reader.read_u8().ok_or_else(truncated)?)?;
    let level_bytes = reader.read_bytes(4).ok_or_else(truncated)?;
    let level = i32::from_le_bytes(level_bytes.try_into().unwrap());
    Ok((algo, frame_len, compression, level))
}

pub(crate) fn write_file(
    provider: &Arc<dyn FileProvider>,
    path: &Path,
    bytes: &[u8],
) -> Result<()> {
    let file = provider.open_for_write(path, true)?;
    file.write_all_at(bytes, 0)?;
    file.truncate(bytes.len() as u64)?;
    file.sync()
}

pub(crate) fn read_file(provider: &Arc<dyn FileProvider>, path: &Path) -> Result<Vec<u8>> {
    let file = provider.open_for_read(path)?;
    let size = file.file_size()? as usize;
    let mut buf = vec![0u8; size];
    file.read_at(&mut buf, 0)?;
    Ok(buf)
}
