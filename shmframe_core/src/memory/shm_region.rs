// SHMFRAME Shared Memory Region - named frame regions under /dev/shm/shmframe
use super::platform;
use crate::config::ChannelConfig;
use crate::error::{FrameError, FrameResult};
use crate::protocol::header::{SharedHeader, HEADER_SIZE, MIN_PAYLOAD};
use crate::protocol::FrameFormat;
use memmap2::{MmapOptions, MmapRaw};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Poll interval while an opener waits for the creator to stamp the header
const ATTACH_POLL: Duration = Duration::from_millis(1);

/// Which side of the create-or-open race this handle ended up on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRole {
    /// Initialized the header
    Creator,
    /// Attached to an existing header and validated it
    Opener,
}

/// Memory-mapped frame region: header at offset 0, data area after it
#[derive(Debug)]
pub struct ShmRegion {
    mmap: MmapRaw,
    _file: File,
    path: PathBuf,
    name: String,
    committed_size: usize,
    role: RegionRole,
}

impl ShmRegion {
    /// Open the region called `name`, creating and initializing it if absent
    ///
    /// `requested_size` covers header plus data area and is rounded up to the
    /// page size when creating. An existing region keeps its own size.
    pub fn create(
        name: &str,
        requested_size: usize,
        format: Option<FrameFormat>,
        config: &ChannelConfig,
    ) -> FrameResult<Self> {
        if requested_size < HEADER_SIZE + MIN_PAYLOAD {
            return Err(FrameError::invalid_argument(format!(
                "Requested size {} too small, minimum is {}",
                requested_size,
                HEADER_SIZE + MIN_PAYLOAD
            )));
        }
        if let Some(format) = format {
            format.validate()?;
        }
        let path = Self::path_for(name, config)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        // Lost the exclusive create to a concurrent creator: go around as opener
        for _ in 0..2 {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => return Self::attach(file, path, name, config),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => {
                    return Self::initialize(file, &path, name, requested_size, format).map_err(
                        |e| {
                            // A half-created object would poison every later opener
                            let _ = std::fs::remove_file(&path);
                            e
                        },
                    );
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(FrameError::invalid_argument(format!(
            "Shared memory '{}' kept disappearing during create",
            name
        )))
    }

    /// Open existing shared memory region (no creation)
    pub fn open(name: &str, config: &ChannelConfig) -> FrameResult<Self> {
        let path = Self::path_for(name, config)?;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FrameError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Self::attach(file, path, name, config)
    }

    /// Remove the named object; attached handles keep their mappings
    pub fn unlink(name: &str, config: &ChannelConfig) -> FrameResult<()> {
        let path = Self::path_for(name, config)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Backing object path for `name`
    ///
    /// Separators in `name` are escaped rather than followed, so every region
    /// is a single file directly under the region directory.
    pub fn path_for(name: &str, config: &ChannelConfig) -> FrameResult<PathBuf> {
        if name.is_empty() || name.contains('\0') || name == "." || name == ".." {
            return Err(FrameError::invalid_argument(format!(
                "Invalid shared memory name '{}'",
                name.escape_default()
            )));
        }
        Ok(config.region_dir().join(platform::safe_name(name)))
    }

    fn initialize(
        file: File,
        path: &Path,
        name: &str,
        requested_size: usize,
        format: Option<FrameFormat>,
    ) -> FrameResult<Self> {
        let size = platform::round_to_page(requested_size).ok_or_else(|| {
            FrameError::invalid_argument(format!("Requested size {} too large", requested_size))
        })?;
        file.set_len(size as u64)?;

        let mmap = MmapOptions::new().map_raw(&file)?;
        let committed_size = query_committed_size(&file, &mmap)?;
        if committed_size < HEADER_SIZE {
            return Err(FrameError::invalid_argument(format!(
                "Committed size {} cannot hold the header",
                committed_size
            )));
        }

        // SAFETY: the mapping is page aligned, at least HEADER_SIZE long, and
        // nobody can have validated a header whose magic is still zero
        unsafe {
            SharedHeader::initialize(mmap.as_mut_ptr(), format, committed_size as u64);
        }

        log::info!(
            "SHM: Created frame region '{}' (requested {} bytes, committed {} bytes)",
            name,
            requested_size,
            committed_size
        );

        Ok(Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            name: name.to_string(),
            committed_size,
            role: RegionRole::Creator,
        })
    }

    fn attach(file: File, path: PathBuf, name: &str, config: &ChannelConfig) -> FrameResult<Self> {
        let deadline = Instant::now() + config.attach_timeout();

        loop {
            let len = file.metadata()?.len();
            let expired = Instant::now() >= deadline;

            if len >= HEADER_SIZE as u64 {
                let mmap = MmapOptions::new().map_raw(&file)?;
                // SAFETY: mapping is page aligned and holds at least HEADER_SIZE bytes
                let header = unsafe { SharedHeader::from_ptr(mmap.as_ptr()) };
                let magic = header.magic();

                // Zero magic: the creator has not finished stamping the header yet
                if magic != 0 || expired {
                    if !header.is_compatible() {
                        let version = header.version();
                        log::warn!(
                            "SHM: Rejected region '{}' (magic {:#010x}, version {})",
                            name,
                            magic,
                            version
                        );
                        return Err(FrameError::FormatMismatch { magic, version });
                    }

                    let committed_size = query_committed_size(&file, &mmap)?;
                    log::info!(
                        "SHM: Opened existing frame region '{}' (committed {} bytes)",
                        name,
                        committed_size
                    );
                    return Ok(Self {
                        mmap,
                        _file: file,
                        path,
                        name: name.to_string(),
                        committed_size,
                        role: RegionRole::Opener,
                    });
                }
            } else if expired {
                log::warn!(
                    "SHM: Region '{}' is {} bytes, too small for a header",
                    name,
                    len
                );
                return Err(FrameError::FormatMismatch {
                    magic: 0,
                    version: 0,
                });
            }

            std::thread::sleep(ATTACH_POLL);
        }
    }

    pub fn header(&self) -> &SharedHeader {
        // SAFETY: validated or initialized at construction; lives as long as self
        unsafe { SharedHeader::from_ptr(self.mmap.as_ptr()) }
    }

    /// Start of the data area
    pub fn data_ptr(&self) -> *mut u8 {
        // SAFETY: committed_size >= HEADER_SIZE, so this stays within the mapping
        unsafe { self.mmap.as_mut_ptr().add(HEADER_SIZE) }
    }

    /// Bytes available for frame payloads
    pub fn capacity(&self) -> usize {
        self.committed_size.saturating_sub(HEADER_SIZE)
    }

    /// Region size reported by the OS after mapping
    pub fn committed_size(&self) -> usize {
        self.committed_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> RegionRole {
        self.role
    }

    pub fn is_owner(&self) -> bool {
        self.role == RegionRole::Creator
    }
}

/// Size of the mapped object as the OS reports it, never the requested size
fn query_committed_size(file: &File, mmap: &MmapRaw) -> FrameResult<usize> {
    let len = usize::try_from(file.metadata()?.len())
        .map_err(|_| FrameError::invalid_argument("Mapping larger than address space"))?;
    Ok(len.min(mmap.len()))
}
