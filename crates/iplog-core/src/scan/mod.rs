//! One scan pass over the log file
//!
//! A [`ScanCycle`] reads the whole file, splits it into newline-aligned
//! chunks and runs the [`Extraction`] pipeline over each chunk on a rayon
//! pool. Chunk results are merged by set union, so the outcome does not
//! depend on how the work was split or scheduled.
//!
//! The cycle is stateless: running it twice over unchanged content yields
//! the same [`ScanResult`].

use rayon::prelude::*;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::ScanConfig;
use crate::error::{Error, Result};
use crate::extract::{AddressClass, Extraction, FilterPolicy};

/// Unique addresses observed during one cycle, split by class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    private: BTreeSet<Ipv4Addr>,
    public: BTreeSet<Ipv4Addr>,
}

impl ScanResult {
    /// Record an address under `class`
    pub fn insert(&mut self, class: AddressClass, ip: Ipv4Addr) -> bool {
        match class {
            AddressClass::Private => self.private.insert(ip),
            AddressClass::Public => self.public.insert(ip),
        }
    }

    /// Set union of two results
    pub fn merge(mut self, other: ScanResult) -> ScanResult {
        self.private.extend(other.private);
        self.public.extend(other.public);
        self
    }

    /// Addresses of one class, in numeric order
    pub fn get(&self, class: AddressClass) -> &BTreeSet<Ipv4Addr> {
        match class {
            AddressClass::Private => &self.private,
            AddressClass::Public => &self.public,
        }
    }

    /// Addresses of one class as canonical strings, in numeric order
    pub fn ips(&self, class: AddressClass) -> Vec<String> {
        self.get(class).iter().map(|ip| ip.to_string()).collect()
    }

    /// Private addresses as strings
    pub fn private_ips(&self) -> Vec<String> {
        self.ips(AddressClass::Private)
    }

    /// Public addresses as strings
    pub fn public_ips(&self) -> Vec<String> {
        self.ips(AddressClass::Public)
    }

    /// Total number of unique addresses
    pub fn len(&self) -> usize {
        self.private.len() + self.public.len()
    }

    /// Whether nothing was found
    pub fn is_empty(&self) -> bool {
        self.private.is_empty() && self.public.is_empty()
    }
}

/// Reads the log file and extracts classified addresses
#[derive(Debug, Clone)]
pub struct ScanCycle {
    extraction: Extraction,
    chunk_size: usize,
    read_timeout: Duration,
    pool: Option<Arc<rayon::ThreadPool>>,
    /// Set while a blocking read is running, even past its timeout
    reading: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the blocking read ends, panics included
struct ReadingGuard(Arc<AtomicBool>);

impl Drop for ReadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScanCycle {
    /// Create a scan cycle
    ///
    /// With `config.workers == 0` the global rayon pool is used; otherwise a
    /// dedicated pool of that many threads is built.
    pub fn new(config: &ScanConfig, policy: FilterPolicy) -> Result<Self> {
        config.validate()?;

        let pool = if config.workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.workers)
                .thread_name(|i| format!("iplog-scan-{}", i))
                .build()
                .map_err(|e| Error::config(format!("Failed to build scan pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self {
            extraction: Extraction::new(policy),
            chunk_size: config.chunk_size,
            read_timeout: config.read_timeout(),
            pool,
            reading: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether a read started by [`ScanCycle::run`] has not finished yet
    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }

    /// Scan the file at `path`
    ///
    /// # Returns
    ///
    /// - `Ok(ScanResult)`: Addresses found (empty for an empty file)
    /// - `Err(Error::FileUnavailable)`: The file is missing or unreadable
    /// - `Err(Error::Timeout)`: Reading and parsing exceeded the read timeout,
    ///   or a read that timed out earlier is still blocked
    pub async fn run(&self, path: impl AsRef<Path>) -> Result<ScanResult> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();

        // At most one blocking read at a time, so a hung file system cannot
        // pile up threads
        if self
            .reading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::timeout(format!(
                "Previous read of {} is still running",
                display
            )));
        }
        let guard = ReadingGuard(Arc::clone(&self.reading));
        let cycle = self.clone();

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            cycle.scan_file(&path)
        });

        match tokio::time::timeout(self.read_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Error::Other(format!(
                "Scan task for {} failed: {}",
                display, join_err
            ))),
            Err(_) => Err(Error::timeout(format!(
                "Scanning {} exceeded {:?}",
                display, self.read_timeout
            ))),
        }
    }

    /// Scan an in-memory buffer with the same chunking as [`ScanCycle::run`]
    pub fn scan_bytes(&self, data: &[u8]) -> ScanResult {
        let chunks = split_chunks(data, self.chunk_size);
        let extraction = self.extraction;

        let scan = || {
            chunks
                .par_iter()
                .map(|chunk| extraction.scan(chunk))
                .reduce(ScanResult::default, ScanResult::merge)
        };

        let result = match &self.pool {
            Some(pool) => pool.install(scan),
            None => scan(),
        };

        debug!(
            "Scanned {} bytes in {} chunk(s): {} private, {} public",
            data.len(),
            chunks.len(),
            result.private.len(),
            result.public.len()
        );
        result
    }

    fn scan_file(&self, path: &Path) -> Result<ScanResult> {
        let data = std::fs::read(path).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::NotFound => "file does not exist".to_string(),
                _ => e.to_string(),
            };
            Error::file_unavailable(path.display().to_string(), reason)
        })?;

        Ok(self.scan_bytes(&data))
    }
}

/// Split `data` into pieces of roughly `chunk_size` bytes ending on a newline
///
/// A window without any newline is cut after its last separator byte (see
/// [`is_separator`]). A window made only of word bytes and dots is extended
/// to the end of that run. Either way no match can straddle two chunks, and
/// every chunk boundary looks to the parser exactly like it does in `data`.
fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);
    let mut rest = data;

    while rest.len() > chunk_size {
        let window = &rest[..chunk_size];
        let cut = match memchr::memrchr(b'\n', window) {
            Some(i) => i + 1,
            None => match window.iter().rposition(|&b| is_separator(b)) {
                Some(i) => i + 1,
                None => rest[chunk_size..]
                    .iter()
                    .position(|&b| is_separator(b))
                    .map_or(rest.len(), |i| chunk_size + i + 1),
            },
        };
        let (chunk, tail) = rest.split_at(cut);
        chunks.push(chunk);
        rest = tail;
    }

    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Bytes that end a candidate address: not an ASCII word byte and not `.`
///
/// Cutting right after one keeps the `\b` and adjacency checks of the parser
/// unchanged on both sides of the cut.
fn is_separator(b: u8) -> bool {
    !(b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}
