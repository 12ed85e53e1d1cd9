use crate::config::ChannelConfig;
use crate::error::{FrameError, FrameResult};
use crate::memory::notify::{EventNamespace, Notifier};
use crate::memory::shm_region::{RegionRole, ShmRegion};
use crate::protocol::seqlock::{self, WriteSection};
use crate::protocol::{FrameFormat, FrameMetadata};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free counters for channel monitoring
#[derive(Debug)]
#[repr(align(64))] // Cache-line aligned to prevent false sharing
pub struct AtomicChannelMetrics {
    pub frames_published: AtomicU64,
    pub frames_read: AtomicU64,
    pub read_timeouts: AtomicU64,
    pub contention_failures: AtomicU64,
}

impl Default for AtomicChannelMetrics {
    fn default() -> Self {
        Self {
            frames_published: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            read_timeouts: AtomicU64::new(0),
            contention_failures: AtomicU64::new(0),
        }
    }
}

impl AtomicChannelMetrics {
    pub fn snapshot(&self) -> ChannelMetrics {
        ChannelMetrics {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            contention_failures: self.contention_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the channel counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelMetrics {
    pub frames_published: u64,
    pub frames_read: u64,
    pub read_timeouts: u64,
    pub contention_failures: u64,
}

/// Caller-owned copy of one published frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    metadata: FrameMetadata,
    data: Vec<u8>,
}

impl Frame {
    /// Header fields observed in the same consistent read as the payload
    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn format(&self) -> FrameFormat {
        self.metadata.format
    }

    pub fn frame_index(&self) -> u64 {
        self.metadata.frame_index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Result of a blocking read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Frame),
    /// The wait expired before any new frame was signalled
    Timeout,
}

impl ReadOutcome {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            ReadOutcome::Frame(frame) => Some(frame),
            ReadOutcome::Timeout => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReadOutcome::Timeout)
    }
}

#[derive(Debug)]
struct Attached {
    region: ShmRegion,
    notifier: Option<Notifier>,
}

impl Attached {
    fn signal(&self) {
        if let Some(ref notifier) = self.notifier {
            notifier.signal();
        }
    }
}

/// Zero-copy frame write held inside a seqlock write section
///
/// Readers retry while the loan is alive, so it should be short. `commit`
/// publishes the frame; dropping the loan without committing publishes an
/// empty frame, since the data area may already be partially rewritten.
#[must_use = "dropping a loan without commit publishes an empty frame"]
pub struct FrameLoan<'a> {
    attached: &'a Attached,
    metrics: &'a AtomicChannelMetrics,
    section: Option<WriteSection<'a>>,
}

impl<'a> FrameLoan<'a> {
    /// Whole data area, writable in place
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let region = &self.attached.region;
        // SAFETY: the data area spans `capacity` mapped bytes, and the open
        // write section keeps seqlock readers from trusting them
        unsafe { std::slice::from_raw_parts_mut(region.data_ptr(), region.capacity()) }
    }

    pub fn capacity(&self) -> usize {
        self.attached.region.capacity()
    }

    /// Publish the first `len` bytes of the data area; returns the frame index
    pub fn commit(mut self, len: usize) -> FrameResult<u64> {
        let capacity = self.capacity();
        let frame_size = checked_frame_size(len, capacity)?;

        let header = self.attached.region.header();
        header.set_frame_size(frame_size);
        let index = header.bump_frame_index();
        drop(self.section.take());

        self.attached.signal();
        self.metrics.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(index)
    }
}

impl Drop for FrameLoan<'_> {
    fn drop(&mut self) {
        if let Some(section) = self.section.take() {
            self.attached.region.header().set_frame_size(0);
            drop(section);
            log::debug!(
                "Frame loan on '{}' dropped without commit",
                self.attached.region.name()
            );
        }
    }
}

fn checked_frame_size(len: usize, capacity: usize) -> FrameResult<u32> {
    if len > capacity {
        return Err(FrameError::InvalidSize {
            requested: len,
            capacity,
        });
    }
    u32::try_from(len).map_err(|_| FrameError::InvalidSize {
        requested: len,
        capacity,
    })
}

/// Latest-frame channel over a named shared memory region
///
/// One writer publishes, any number of readers (in this or other processes)
/// copy the newest frame out. Writer-side methods take `&mut self`; a producer
/// that drives one region from several threads or handles must serialize its
/// writers itself, since the seqlock only orders the writer against readers.
#[derive(Debug)]
pub struct FrameChannel {
    config: ChannelConfig,
    attached: Option<Attached>,
    metrics: AtomicChannelMetrics,
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameChannel {
    /// Closed channel with default configuration
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            config,
            attached: None,
            metrics: AtomicChannelMetrics::default(),
        }
    }

    /// Open region `name`, creating it first if it does not exist
    ///
    /// Only the creator applies `requested_size` and `format`; later callers
    /// attach to the existing region and validate its header. Any previous
    /// attachment of this channel is closed first.
    pub fn create(
        &mut self,
        name: &str,
        requested_size: usize,
        format: Option<FrameFormat>,
    ) -> FrameResult<RegionRole> {
        self.close();
        self.config.validate()?;

        let region = ShmRegion::create(name, requested_size, format, &self.config)?;
        let role = region.role();
        self.attach(region);
        Ok(role)
    }

    /// Attach to an existing region without creating it
    pub fn open(&mut self, name: &str) -> FrameResult<()> {
        self.close();
        self.config.validate()?;

        let region = ShmRegion::open(name, &self.config)?;
        self.attach(region);
        Ok(())
    }

    fn attach(&mut self, region: ShmRegion) {
        let notifier = if self.config.notifications {
            match Notifier::open_or_create(region.name(), &self.config) {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    log::warn!(
                        "No notification for '{}', readers will poll: {}",
                        region.name(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        self.attached = Some(Attached { region, notifier });
    }

    /// Release the mapping and notification handle; safe to call repeatedly
    ///
    /// Only this handle detaches. The region and notification objects stay in
    /// `shm_dir` (and keep their last frame) even after every process has
    /// closed, until [`FrameChannel::unlink`] removes them.
    pub fn close(&mut self) {
        if let Some(attached) = self.attached.take() {
            log::info!("SHM: Closed frame region '{}'", attached.region.name());
        }
    }

    /// Remove region `name` and its notification object from the namespace
    ///
    /// Processes that are still attached keep working on their mappings; the
    /// memory is released once the last of them closes.
    pub fn unlink(name: &str, config: &ChannelConfig) -> FrameResult<()> {
        ShmRegion::unlink(name, config)?;
        Notifier::unlink(name, config)
    }

    fn attached(&self) -> FrameResult<&Attached> {
        self.attached.as_ref().ok_or(FrameError::NotReady)
    }

    pub fn is_open(&self) -> bool {
        self.attached.is_some()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.attached.as_ref().map(|a| a.region.name())
    }

    pub fn role(&self) -> Option<RegionRole> {
        self.attached.as_ref().map(|a| a.region.role())
    }

    /// Namespace of the notification object, `None` in polling mode
    pub fn notification_namespace(&self) -> Option<EventNamespace> {
        self.attached
            .as_ref()
            .and_then(|a| a.notifier.as_ref())
            .map(Notifier::namespace)
    }

    /// Bytes available for a frame payload; 0 when closed
    pub fn capacity(&self) -> usize {
        self.attached
            .as_ref()
            .map_or(0, |a| a.region.capacity())
    }

    pub fn metrics(&self) -> ChannelMetrics {
        self.metrics.snapshot()
    }

    /// Change the advertised frame geometry
    ///
    /// `frame_size` is left alone; readers that see it disagree with the new
    /// geometry are looking at a transition in progress.
    pub fn set_format(&mut self, width: u32, height: u32, channels: u32) -> FrameResult<()> {
        let attached = self.attached()?;
        let format = FrameFormat::new(width, height, channels);
        format.validate()?;

        {
            let header = attached.region.header();
            let _section = WriteSection::begin(header.seq());
            header.set_format(format);
        }
        attached.signal();

        log::debug!(
            "Format of '{}' set to {}x{}x{}",
            attached.region.name(),
            width,
            height,
            channels
        );
        Ok(())
    }

    /// Commit `frame_bytes` already written into the data area
    ///
    /// Only the header transition is seqlock-protected; bytes written through
    /// [`FrameChannel::frame_buffer_mut`] while readers copy can tear. Use
    /// [`FrameChannel::write_frame`] or [`FrameChannel::loan`] when that
    /// matters. Returns the new frame index.
    pub fn publish(&mut self, frame_bytes: usize) -> FrameResult<u64> {
        let attached = self.attached()?;
        let frame_size = checked_frame_size(frame_bytes, attached.region.capacity())?;

        let index = {
            let header = attached.region.header();
            let _section = WriteSection::begin(header.seq());
            header.set_frame_size(frame_size);
            header.bump_frame_index()
        };
        attached.signal();

        self.metrics.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(index)
    }

    /// Copy `bytes` in and publish them within one seqlock write section
    pub fn write_frame(&mut self, bytes: &[u8]) -> FrameResult<u64> {
        let attached = self.attached()?;
        let frame_size = checked_frame_size(bytes.len(), attached.region.capacity())?;

        let index = {
            let header = attached.region.header();
            let _section = WriteSection::begin(header.seq());
            // SAFETY: bytes.len() <= capacity, and the source is local memory
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    attached.region.data_ptr(),
                    bytes.len(),
                );
            }
            header.set_frame_size(frame_size);
            header.bump_frame_index()
        };
        attached.signal();

        self.metrics.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(index)
    }

    /// Open a write section and lend out the data area for in-place writing
    pub fn loan(&mut self) -> FrameResult<FrameLoan<'_>> {
        let attached = self.attached()?;
        if attached.region.capacity() == 0 {
            return Err(FrameError::invalid_argument("No capacity"));
        }

        Ok(FrameLoan {
            attached,
            metrics: &self.metrics,
            section: Some(WriteSection::begin(attached.region.header().seq())),
        })
    }

    /// The whole data area, writable in place (producer side)
    pub fn frame_buffer_mut(&mut self) -> FrameResult<&mut [u8]> {
        let attached = self.attached()?;
        let region = &attached.region;
        if region.capacity() == 0 {
            return Err(FrameError::invalid_argument("No capacity"));
        }
        // SAFETY: the data area spans `capacity` mapped bytes and `&mut self`
        // keeps this channel from handing out another view meanwhile
        Ok(unsafe { std::slice::from_raw_parts_mut(region.data_ptr(), region.capacity()) })
    }

    /// The whole data area, aliased without copying
    ///
    /// # Safety
    ///
    /// The bytes are not seqlock-protected: the caller must ensure no writer
    /// (in any process) modifies the data area while the slice is in use.
    pub unsafe fn frame_view(&self) -> FrameResult<&[u8]> {
        let attached = self.attached()?;
        let region = &attached.region;
        if region.capacity() == 0 {
            return Err(FrameError::invalid_argument("No capacity"));
        }
        Ok(std::slice::from_raw_parts(region.data_ptr(), region.capacity()))
    }

    /// Wait for a new frame, then return a consistent copy of it
    ///
    /// Without a notification object the read happens immediately. With one,
    /// the call blocks up to `timeout` (forever for `None`) and yields
    /// [`ReadOutcome::Timeout`] if nothing was signalled.
    pub fn read(&self, timeout: Option<Duration>) -> FrameResult<ReadOutcome> {
        let attached = self.attached()?;

        if let Some(ref notifier) = attached.notifier {
            if !notifier.wait(timeout) {
                self.metrics.read_timeouts.fetch_add(1, Ordering::Relaxed);
                return Ok(ReadOutcome::Timeout);
            }
        }

        self.copy_current(attached).map(ReadOutcome::Frame)
    }

    /// Consistent copy of the current frame without waiting
    pub fn try_read(&self) -> FrameResult<Frame> {
        self.copy_current(self.attached()?)
    }

    fn copy_current(&self, attached: &Attached) -> FrameResult<Frame> {
        // An unconditional copy always yields a frame
        self.copy_frame(attached, |_| true)?
            .ok_or(FrameError::NotReady)
    }

    /// Consistent copy of the current frame if its index is past `last_index`
    pub fn read_if_newer(&self, last_index: u64) -> FrameResult<Option<Frame>> {
        let attached = self.attached()?;
        self.copy_frame(attached, |meta| meta.frame_index > last_index)
    }

    /// Consistent snapshot of the header fields
    pub fn metadata(&self) -> FrameResult<FrameMetadata> {
        let header = self.attached()?.region.header();
        self.guarded(seqlock::read(
            header.seq(),
            self.config.max_read_attempts,
            || Ok(header.metadata()),
        ))
    }

    /// Seqlock read of metadata plus payload; `wanted` decides from the
    /// metadata whether the payload is copied at all
    fn copy_frame<F>(&self, attached: &Attached, wanted: F) -> FrameResult<Option<Frame>>
    where
        F: Fn(&FrameMetadata) -> bool,
    {
        let region = &attached.region;
        let header = region.header();
        let capacity = region.capacity();
        let mut data = Vec::new();

        let metadata = self.guarded(seqlock::read(
            header.seq(),
            self.config.max_read_attempts,
            || {
                let metadata = header.metadata();
                let frame_size = metadata.frame_size as usize;
                // Re-checked on every read: the writer may have crashed or be foreign
                if frame_size > capacity {
                    return Err(FrameError::CorruptHeader {
                        frame_size,
                        capacity,
                    });
                }
                if !wanted(&metadata) {
                    return Ok(None);
                }

                data.clear();
                data.reserve(frame_size);
                // SAFETY: frame_size <= capacity keeps the source inside the
                // data area; `data` has room for frame_size bytes
                unsafe {
                    std::ptr::copy_nonoverlapping(region.data_ptr(), data.as_mut_ptr(), frame_size);
                    data.set_len(frame_size);
                }
                Ok(Some(metadata))
            },
        ))?;

        Ok(metadata.map(|metadata| {
            self.metrics.frames_read.fetch_add(1, Ordering::Relaxed);
            if !metadata.format_consistent() {
                log::debug!(
                    "Frame {} of '{}' is {} bytes but format {}x{}x{} implies {}",
                    metadata.frame_index,
                    region.name(),
                    metadata.frame_size,
                    metadata.format.width,
                    metadata.format.height,
                    metadata.format.channels,
                    metadata.format.expected_frame_size()
                );
            }
            Frame { metadata, data }
        }))
    }

    fn guarded<T>(&self, result: FrameResult<T>) -> FrameResult<T> {
        if let Err(FrameError::Contention { attempts }) = result {
            self.metrics
                .contention_failures
                .fetch_add(1, Ordering::Relaxed);
            log::debug!("Seqlock read gave up after {} attempts", attempts);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;

    fn channel(dir: &tempfile::TempDir) -> FrameChannel {
        FrameChannel::with_config(ChannelConfig::with_shm_dir(dir.path()))
    }

    #[test]
    fn test_operations_before_open() {
        let mut chan = FrameChannel::new();
        assert!(!chan.is_open());
        assert_eq!(chan.capacity(), 0);
        assert!(matches!(chan.publish(1), Err(FrameError::NotReady)));
        assert!(matches!(chan.set_format(1, 1, 3), Err(FrameError::NotReady)));
        assert!(matches!(chan.read(None), Err(FrameError::NotReady)));
        assert!(matches!(chan.metadata(), Err(FrameError::NotReady)));
        assert!(matches!(chan.frame_buffer_mut(), Err(FrameError::NotReady)));
        chan.close();
        chan.close();
    }

    #[test]
    fn test_write_frame_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = channel(&dir);
        let mut reader = channel(&dir);

        assert_eq!(writer.create("rt", 4096, None).unwrap(), RegionRole::Creator);
        reader.open("rt").unwrap();
        assert_eq!(reader.role(), Some(RegionRole::Opener));

        assert_eq!(writer.write_frame(b"hello").unwrap(), 1);
        let frame = reader
            .read(Some(Duration::from_secs(1)))
            .unwrap()
            .into_frame()
            .unwrap();
        assert_eq!(frame.data(), b"hello");
        assert_eq!(frame.frame_index(), 1);

        // Already consumed the pulse: nothing new to wake for
        assert!(reader
            .read(Some(Duration::from_millis(10)))
            .unwrap()
            .is_timeout());
        assert_eq!(reader.metrics().read_timeouts, 1);
        assert_eq!(writer.metrics().frames_published, 1);
    }

    #[test]
    fn test_loan_commit_and_abandon() {
        let dir = tempfile::tempdir().unwrap();
        let mut chan = channel(&dir);
        chan.create("loan", 4096, None).unwrap();

        let mut loan = chan.loan().unwrap();
        loan.as_mut_slice()[..3].copy_from_slice(&[7, 8, 9]);
        assert_eq!(loan.commit(3).unwrap(), 1);

        let frame = chan.try_read().unwrap();
        assert_eq!(frame.data(), &[7, 8, 9]);

        {
            let mut loan = chan.loan().unwrap();
            loan.as_mut_slice()[0] = 0xFF;
        }
        let meta = chan.metadata().unwrap();
        assert_eq!(meta.frame_size, 0);
        assert_eq!(meta.frame_index, 1);

        let capacity = chan.capacity();
        let loan = chan.loan().unwrap();
        assert!(matches!(
            loan.commit(capacity + 1),
            Err(FrameError::InvalidSize { .. })
        ));
        // Writer section was closed by the failed commit
        assert!(chan.metadata().is_ok());
    }

    #[test]
    fn test_read_with_unbounded_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut chan = channel(&dir);
        chan.create("forever", 4096, None).unwrap();
        chan.write_frame(b"x").unwrap();

        let frame = chan
            .read(Some(Duration::MAX))
            .unwrap()
            .into_frame()
            .unwrap();
        assert_eq!(frame.data(), b"x");
    }

    #[test]
    fn test_read_if_newer() {
        let dir = tempfile::tempdir().unwrap();
        let mut chan = channel(&dir);
        chan.create("newer", 4096, None).unwrap();

        assert!(chan.read_if_newer(0).unwrap().is_none());
        chan.write_frame(&[1, 2]).unwrap();
        let frame = chan.read_if_newer(0).unwrap().unwrap();
        assert_eq!(frame.frame_index(), 1);
        assert!(chan.read_if_newer(frame.frame_index()).unwrap().is_none());
    }

    #[test]
    fn test_polling_mode_reads_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig {
            notifications: false,
            ..ChannelConfig::with_shm_dir(dir.path())
        };
        let mut chan = FrameChannel::with_config(config);
        chan.create("poll", 4096, None).unwrap();
        assert_eq!(chan.notification_namespace(), None);

        let frame = chan.read(None).unwrap().into_frame().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.frame_index(), 0);
    }

    #[test]
    fn test_create_reattaches() {
        let dir = tempfile::tempdir().unwrap();
        let mut chan = channel(&dir);
        chan.create("first", 4096, None).unwrap();
        chan.create("second", 8192, None).unwrap();
        assert_eq!(chan.name(), Some("second"));
        assert!(chan.capacity() >= 8192 - HEADER_SIZE);
    }
}
