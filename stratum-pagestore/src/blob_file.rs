//! One append-write, random-read blob file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stratum_common::file_provider::{FileProvider, RandomAccessFile, WritableFile};
use stratum_common::{CancelToken, IoLimiter};
use stratum_result::{Error, Result};

use crate::types::BlobFileId;

/// Handle to a blob file. Writes are serialized by the internal mutex;
/// positional reads go through a shared read handle and need no lock.
pub struct BlobFile {
    blob_id: BlobFileId,
    path: PathBuf,
    provider: Arc<dyn FileProvider>,
    writer: Mutex<Arc<dyn WritableFile>>,
    reader: Arc<dyn RandomAccessFile>,
}

impl BlobFile {
    pub fn open(
        provider: Arc<dyn FileProvider>,
        parent: &std::path::Path,
        blob_id: BlobFileId,
    ) -> Result<Self> {
        let path = parent.join(format!("blob_{blob_id}"));
        let writer = provider.open_for_write(&path, true)?;
        let reader = provider.open_for_read(&path)?;
        Ok(Self {
            blob_id,
            path,
            provider,
            writer: Mutex::new(writer),
            reader,
        })
    }

    pub fn blob_id(&self) -> BlobFileId {
        self.blob_id
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn write(
        &self,
        data: &[u8],
        offset: u64,
        limiter: Option<&IoLimiter>,
        cancel: &CancelToken,
    ) -> Result<()> {
        if let Some(limiter) = limiter {
            limiter.request(data.len(), cancel)?;
        }
        let writer = self.writer.lock().expect("blob writer lock poisoned");
        writer
            .write_all_at(data, offset)
            .map_err(|e| e.context(format!("blob_id={} offset={offset}", self.blob_id)))?;
        writer.sync()
    }

    pub fn read(
        &self,
        buf: &mut [u8],
        offset: u64,
        limiter: Option<&IoLimiter>,
        cancel: &CancelToken,
    ) -> Result<()> {
        if let Some(limiter) = limiter {
            limiter.request(buf.len(), cancel)?;
        }
        self.reader.read_at(buf, offset).map_err(|e| {
            e.context(format!(
                "blob_id={} offset={offset} size={}",
                self.blob_id,
                buf.len()
            ))
        })
    }

    pub fn truncate(&self, size: u64) -> Result<()> {
        let writer = self.writer.lock().expect("blob writer lock poisoned");
        writer.truncate(size)?;
        writer.sync()
    }

    pub fn remove(&self) -> Result<()> {
        match self.provider.remove(&self.path) {
            Ok(()) => Ok(()),
            // Never-written blob files may not exist on disk yet.
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
