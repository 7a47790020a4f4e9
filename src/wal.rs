//! Ledger log: the durable record every committed event goes through.
//!
//! Each entry is one frame, `[u32 len][bincode Event][u32 crc32]`, all
//! little-endian. A group commit writes all of its frames with a single
//! `write_all` + `sync_data`, and a commit that fails is cut back off the
//! file, so the log only ever holds whole batches that some caller was told
//! succeeded.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event. A length prefix above it can only come
/// from a corrupt or foreign file.
const MAX_FRAME_BYTES: usize = 1 << 20;

fn encode_frame(frames: &mut Vec<u8>, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("event of {} bytes exceeds the frame limit", payload.len()),
        ));
    }
    frames.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frames.extend_from_slice(&payload);
    frames.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// `Ok(false)` when the reader ran out mid-buffer.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact frame and its size on disk. `None` at the end of the log or
/// at the first torn, corrupt or undecodable frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut header = [0u8; 4];
    if !fill(reader, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut body = vec![0u8; len + 4];
    if !fill(reader, &mut body)? {
        return Ok(None);
    }
    let (payload, crc) = body.split_at(len);
    if crc32fast::hash(payload).to_le_bytes()[..] != *crc {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(payload)
        .ok()
        .map(|event| (event, (len + 8) as u64)))
}

/// Every intact event from the start of `reader`, plus the byte length of
/// that intact prefix.
fn recover(reader: impl Read) -> io::Result<(Vec<Event>, u64)> {
    let mut reader = BufReader::new(reader);
    let mut events = Vec::new();
    let mut intact = 0u64;
    while let Some((event, size)) = read_frame(&mut reader)? {
        events.push(event);
        intact += size;
    }
    Ok((events, intact))
}

/// Append-only ledger log for one property.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Bytes holding committed frames. The file never keeps anything past it.
    committed: u64,
    /// Set when a failed commit could not be cut back off the file. Every
    /// later commit is refused until the log is reopened.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log at `path` and recover its events.
    ///
    /// A torn or corrupt tail left by a crash is logged and truncated away,
    /// so new commits land directly after the last intact frame.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let (events, committed) = recover(&file)?;
        let on_disk = file.metadata()?.len();
        if on_disk > committed {
            tracing::warn!(
                path = %path.display(),
                recovered = events.len(),
                discarded_bytes = on_disk - committed,
                "ledger log has a torn or corrupt tail; truncating"
            );
            file.set_len(committed)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            committed,
            poisoned: false,
        };
        Ok((wal, events))
    }

    /// Durably commit `events` as one unit. On `Err` none of them is in the
    /// log, now or after a restart.
    pub fn commit(&mut self, events: &[&Event]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "ledger log refused writes after a failed rollback",
            ));
        }
        // Encode everything before touching the file.
        let mut frames = Vec::new();
        for event in events {
            encode_frame(&mut frames, event)?;
        }
        if let Err(e) = self.write_frames(&frames) {
            self.roll_back();
            return Err(e);
        }
        self.committed += frames.len() as u64;
        Ok(())
    }

    fn write_frames(&mut self, frames: &[u8]) -> io::Result<()> {
        self.file.write_all(frames)?;
        self.file.sync_data()
    }

    fn roll_back(&mut self) {
        let restored = self
            .file
            .set_len(self.committed)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = restored {
            tracing::error!(
                path = %self.path.display(),
                "could not roll back a failed commit, refusing further writes: {e}"
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only recovery, without opening for writes.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        match File::open(path) {
            Ok(file) => recover(file).map(|(events, _)| events),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
