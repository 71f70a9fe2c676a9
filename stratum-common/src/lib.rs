//! Shared support for the stratum storage stack: checksum digests, byte
//! codecs, hierarchical memory accounting, token-bucket I/O limiting,
//! cancellation tokens, and the file-provider seam every file touch goes
//! through.

pub mod cancel;
pub mod checksum;
pub mod codecs;
pub mod file_provider;
pub mod limiter;
pub mod mem;

pub use cancel::CancelToken;
pub use checksum::{ChecksumAlgo, Digest};
pub use file_provider::{
    FileProvider, LocalFileProvider, RandomAccessFile, WritableFile, XorFileProvider,
};
pub use limiter::IoLimiter;
pub use mem::{MemoryReservation, MemoryTracker};
