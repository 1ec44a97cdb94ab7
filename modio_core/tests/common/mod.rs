//! Shared fixtures for the modio_core integration tests.

#![allow(dead_code)]

use modio_common::config::ModIoSettings;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Base module (bytes 0..4), one extension (4..6) and a virtual device (6..8).
pub const CONFIG: &str = r#"{
    "App": { "name": "PiCtory", "version": "2.1.0", "saveTS": "20260101120000" },
    "Summary": { "inpTotal": 4, "outTotal": 4 },
    "Devices": [
        {
            "type": "LEFT_RIGHT", "name": "dio", "position": 32, "offset": 4,
            "inp": { "0": ["Di_1", "0", "1", "4", true, "0000", "", "0"] },
            "out": { "0": ["Do_1", "0", "1", "5", true, "0001", "", "0"] }
        },
        {
            "type": "BASE", "name": "core", "position": 0, "offset": 0,
            "inp": { "0": ["I_1", "0", "1", "0", true, "0000", "", "0"],
                     "1": ["I_2", "0", "1", "0", true, "0001", "", "1"] },
            "out": { "0": ["O_1", "1", "1", "1", true, "0002", "", "0"],
                     "1": ["O_Word", "7", "16", "2", true, "0003", "", ""] }
        },
        {
            "type": "VIRTUAL", "name": "virt", "position": 64, "offset": 6,
            "inp": { "0": ["V_In", "0", "8", "6", true, "0000", "", ""] },
            "out": { "0": ["V_Out", "0", "8", "7", true, "0001", "", ""] }
        }
    ]
}"#;

/// Total image length of [`CONFIG`].
pub const IMAGE_LEN: usize = 8;

// ─── File fixture ───────────────────────────────────────────────────

/// Configuration file plus a zeroed process image file.
pub struct Fixture {
    _dir: TempDir,
    pub procimg: PathBuf,
    pub configrsc: PathBuf,
}

impl Fixture {
    pub fn new(config: &str, length: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let procimg = dir.path().join("piControl0");
        let configrsc = dir.path().join("config.rsc");
        fs::write(&procimg, vec![0u8; length]).expect("write image");
        fs::write(&configrsc, config).expect("write config");
        Self {
            _dir: dir,
            procimg,
            configrsc,
        }
    }

    pub fn standard() -> Self {
        Self::new(CONFIG, IMAGE_LEN)
    }

    /// Settings pointing at this fixture with a 10 ms refresh interval.
    pub fn settings(&self) -> ModIoSettings {
        ModIoSettings {
            procimg: self.procimg.clone(),
            configrsc: Some(self.configrsc.clone()),
            cycle_time_ms: 10,
            ..ModIoSettings::default()
        }
    }

    pub fn image(&self) -> Vec<u8> {
        fs::read(&self.procimg).expect("read image")
    }

    /// Write `bytes` at `offset`, as the hardware side would.
    pub fn poke(&self, offset: u64, bytes: &[u8]) {
        poke_file(&self.procimg, offset, bytes);
    }
}

/// Write `bytes` at `offset` of the image file without truncating it.
pub fn poke_file(path: &Path, offset: u64, bytes: &[u8]) {
    let file = OpenOptions::new().write(true).open(path).expect("open image");
    file.write_all_at(bytes, offset).expect("poke image");
}

// ─── In-memory image ────────────────────────────────────────────────

/// In-memory process image that records writes and fails reads on demand.
#[derive(Clone)]
pub struct MemoryImage {
    pub bytes: Arc<parking_lot::Mutex<Vec<u8>>>,
    pub writes: Arc<parking_lot::Mutex<Vec<(u64, usize)>>>,
    pub fail_reads: Arc<AtomicBool>,
    pos: u64,
}

impl MemoryImage {
    pub fn new(length: usize) -> Self {
        Self {
            bytes: Arc::new(parking_lot::Mutex::new(vec![0u8; length])),
            writes: Arc::new(parking_lot::Mutex::new(Vec::new())),
            fail_reads: Arc::new(AtomicBool::new(false)),
            pos: 0,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn take_writes(&self) -> Vec<(u64, usize)> {
        std::mem::take(&mut *self.writes.lock())
    }
}

impl Read for MemoryImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected read failure"));
        }
        let bytes = self.bytes.lock();
        let start = (self.pos as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryImage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.bytes.lock();
        let start = self.pos as usize;
        if bytes.len() < start + buf.len() {
            bytes.resize(start + buf.len(), 0);
        }
        bytes[start..start + buf.len()].copy_from_slice(buf);
        self.writes.lock().push((self.pos, buf.len()));
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryImage {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.bytes.lock().len() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(3);
