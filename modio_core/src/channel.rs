//! Process image channel and I/O error accounting.
//!
//! The channel is a seekable handle of fixed length. Whole-image reads start
//! at offset zero; writes go to the absolute start of a device region. In
//! buffered mode writes are staged and reach the handle on
//! [`ProcessImageChannel::flush`].
//! [`IoErrorCounter`] decides whether a failed transfer is a warning or the
//! end of the road.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{error, info, warn};

use crate::error::{ModIoError, Result};

/// Anything usable as a process image handle.
pub trait ImageHandle: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> ImageHandle for T {}

/// Byte-addressable access to the process image.
pub struct ProcessImageChannel {
    handle: Option<Box<dyn ImageHandle>>,
    length: usize,
    buffered: bool,
    staged: Vec<(usize, Vec<u8>)>,
}

impl ProcessImageChannel {
    /// Open the process image at `path` for reading and writing.
    pub fn open(path: &Path, length: usize, buffered: bool) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("Opened process image {:?} ({} bytes)", path, length);
        Ok(Self::from_handle(Box::new(file), length, buffered))
    }

    /// Wrap an existing handle.
    pub fn from_handle(handle: Box<dyn ImageHandle>, length: usize, buffered: bool) -> Self {
        Self {
            handle: Some(handle),
            length,
            buffered,
            staged: Vec::new(),
        }
    }

    /// Image length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Buffered write mode.
    pub fn buffered(&self) -> bool {
        self.buffered
    }

    /// False after [`close`](Self::close).
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&mut self) -> io::Result<&mut Box<dyn ImageHandle>> {
        self.handle
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "process image is closed"))
    }

    /// Read the whole image from offset zero. Staged writes go out first.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        if !self.staged.is_empty() {
            self.flush()?;
        }
        let length = self.length;
        let handle = self.handle()?;
        handle.seek(SeekFrom::Start(0))?;
        let mut image = vec![0u8; length];
        handle.read_exact(&mut image)?;
        Ok(image)
    }

    /// Write `data` at absolute offset `start`, or stage it when buffered.
    pub fn write_region(&mut self, start: usize, data: &[u8]) -> io::Result<()> {
        if start + data.len() > self.length {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("region {}..{} exceeds image length {}", start, start + data.len(), self.length),
            ));
        }
        if self.buffered {
            self.handle()?;
            self.staged.push((start, data.to_vec()));
            return Ok(());
        }
        let handle = self.handle()?;
        handle.seek(SeekFrom::Start(start as u64))?;
        handle.write_all(data)
    }

    /// Write out staged regions and flush the handle; no-op unless buffered.
    ///
    /// Staged regions are dropped on failure.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.buffered {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        let handle = self.handle()?;
        for (start, data) in &staged {
            handle.seek(SeekFrom::Start(*start as u64))?;
            handle.write_all(data)?;
        }
        handle.flush()
    }

    /// Staged regions not yet written.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Release the handle. Later transfers fail with `NotConnected`.
    pub fn close(&mut self) {
        if !self.staged.is_empty() {
            if let Err(e) = self.flush() {
                warn!("staged writes lost on close: {e}");
            }
        }
        if self.handle.take().is_some() {
            info!("Process image handle closed");
        }
    }
}

// ─── IoErrorCounter ─────────────────────────────────────────────────

/// Consecutive I/O error accounting with an optional fatal threshold.
#[derive(Debug, Default)]
pub struct IoErrorCounter {
    count: AtomicU32,
    max: AtomicU32,
}

impl IoErrorCounter {
    /// Counter with threshold `max` (0 = unlimited).
    pub fn new(max: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            max: AtomicU32::new(max),
        }
    }

    /// Count one failure of `action`.
    ///
    /// # Errors
    /// Returns [`ModIoError::IoThreshold`] once the count reaches a non-zero maximum.
    pub fn record(&self, action: &'static str, cause: &io::Error) -> Result<u32> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.max.load(Ordering::SeqCst);
        if max != 0 && count >= max {
            error!("I/O error during {action}: {cause}; reached max io errors {max}");
            return Err(ModIoError::IoThreshold { max, action });
        }
        warn!("got io error during {action} and count {count} errors now: {cause}");
        Ok(count)
    }

    /// Failures counted so far.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Overwrite the count.
    pub fn set_count(&self, count: u32) {
        self.count.store(count, Ordering::SeqCst);
    }

    /// Reset the count; the threshold stays.
    pub fn reset(&self) {
        self.set_count(0);
    }

    /// Configured threshold.
    pub fn max(&self) -> u32 {
        self.max.load(Ordering::SeqCst)
    }

    /// Change the threshold.
    pub fn set_max(&self, max: u32) {
        self.max.store(max, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::sync::Arc;

    fn channel(bytes: Vec<u8>) -> ProcessImageChannel {
        let len = bytes.len();
        ProcessImageChannel::from_handle(Box::new(Cursor::new(bytes)), len, false)
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut ch = channel(vec![0; 8]);
        ch.write_region(3, &[0xAA, 0xBB]).unwrap();
        assert_eq!(ch.read_all().unwrap(), [0, 0, 0, 0xAA, 0xBB, 0, 0, 0]);
    }

    /// Cursor shared with the test so writes can be observed.
    #[derive(Clone)]
    struct SharedImage(Arc<Mutex<Cursor<Vec<u8>>>>);

    impl Read for SharedImage {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.lock().read(buf)
        }
    }

    impl Write for SharedImage {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for SharedImage {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.lock().seek(pos)
        }
    }

    #[test]
    fn buffered_writes_wait_for_flush() {
        let image = SharedImage(Arc::new(Mutex::new(Cursor::new(vec![0u8; 6]))));
        let mut ch = ProcessImageChannel::from_handle(Box::new(image.clone()), 6, true);

        ch.write_region(1, &[0x11]).unwrap();
        ch.write_region(4, &[0x44, 0x55]).unwrap();
        assert_eq!(ch.staged(), 2);
        assert_eq!(image.0.lock().get_ref(), &[0u8; 6]);

        ch.flush().unwrap();
        assert_eq!(ch.staged(), 0);
        assert_eq!(image.0.lock().get_ref(), &[0, 0x11, 0, 0, 0x44, 0x55]);

        // a read sees staged writes
        ch.write_region(0, &[0xFF]).unwrap();
        assert_eq!(ch.read_all().unwrap(), [0xFF, 0x11, 0, 0, 0x44, 0x55]);
    }

    #[test]
    fn unbuffered_writes_go_straight_through() {
        let image = SharedImage(Arc::new(Mutex::new(Cursor::new(vec![0u8; 2]))));
        let mut ch = ProcessImageChannel::from_handle(Box::new(image.clone()), 2, false);
        ch.write_region(1, &[0x22]).unwrap();
        assert_eq!(ch.staged(), 0);
        assert_eq!(image.0.lock().get_ref(), &[0, 0x22]);
    }

    #[test]
    fn short_image_fails_read() {
        let mut ch = ProcessImageChannel::from_handle(Box::new(Cursor::new(vec![0u8; 4])), 8, false);
        assert_eq!(ch.read_all().unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn region_outside_image_is_rejected() {
        let mut ch = channel(vec![0; 4]);
        assert!(ch.write_region(3, &[1, 2]).is_err());
    }

    #[test]
    fn closed_channel_refuses_transfers() {
        let mut ch = channel(vec![0; 4]);
        ch.close();
        assert!(!ch.is_open());
        assert_eq!(ch.read_all().unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn threshold_reached_on_second_error() {
        let counter = IoErrorCounter::new(2);
        let cause = io::Error::other("bus fault");
        assert_eq!(counter.record("read_procimg", &cause).unwrap(), 1);
        assert!(matches!(
            counter.record("read_procimg", &cause),
            Err(ModIoError::IoThreshold { max: 2, .. })
        ));
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn unlimited_counter_only_warns() {
        let counter = IoErrorCounter::new(0);
        let cause = io::Error::other("bus fault");
        for expected in 1..=50 {
            assert_eq!(counter.record("write_procimg", &cause).unwrap(), expected);
        }
        counter.reset();
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.max(), 0);
    }
}
