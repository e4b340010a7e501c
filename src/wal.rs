use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::model::Event;

/// Length prefix plus CRC trailer around each bincode payload.
const FRAME_OVERHEAD: u64 = 8;

/// A length prefix above this is read as garbage, not as a record to allocate.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode][u32 crc32]`, all little-endian.
fn write_record(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "event too large for one record"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// `read_exact` that reports end of file as `false` instead of an error.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// The next intact record and its framed size, or `None` at the end of the
/// readable log. A torn or corrupt record also ends the log.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, u64::from(len) + FRAME_OVERHEAD)))
}

/// Everything readable from a log file.
struct Scan {
    events: Vec<Event>,
    /// Bytes covered by intact records.
    intact_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                intact_len: 0,
                file_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, size)) = read_record(&mut reader)? {
        events.push(event);
        intact_len += size;
    }
    Ok(Scan {
        events,
        intact_len,
        file_len,
    })
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Append-only event log behind the in-memory store.
///
/// Appends are staged with `push` and made durable together by `sync`, which
/// is how the store's writer task group-commits. A crash can leave a torn
/// record at the tail; `recover` cuts it off before new records go in, so an
/// interrupted write never hides the appends that follow it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every intact record at `path`, drop any torn tail, and open the
    /// file for appending. A missing file starts an empty log.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let Scan {
            events,
            intact_len,
            file_len,
        } = scan(path)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file_len > intact_len {
            warn!(
                "discarding {} unreadable bytes at the end of {}",
                file_len - intact_len,
                path.display()
            );
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        info!("recovered {} events from {}", events.len(), path.display());

        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: events.len() as u64,
        };
        Ok((wal, events))
    }

    /// Stage one event. Nothing is durable until `sync`.
    pub fn push(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Write out staged events and fsync.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Replace the log with `snapshot`. The snapshot is written and synced
    /// beside the log, then renamed over it, so a crash leaves either the old
    /// log or the new one.
    pub fn compact(&mut self, snapshot: &[Event]) -> io::Result<()> {
        self.sync()?;
        let staging = sibling(&self.path, ".compact");
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            for event in snapshot {
                write_record(&mut out, event)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        if let Some(dir) = self.path.parent()
            && let Ok(dir) = File::open(dir)
        {
            // Persist the rename itself; not every platform can open a directory.
            let _ = dir.sync_all();
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Records written since the last compaction (or since recovery, counting
    /// the recovered ones).
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Resource, SlotConfig};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn resource_put(id: Ulid, name: Option<&str>) -> Event {
        Event::ResourcePut {
            resource: Resource::new(id, name.map(String::from), SlotConfig::default()),
        }
    }

    fn reserved(resource_id: Ulid, at: i64) -> Event {
        Event::SlotReserved {
            id: Ulid::new(),
            resource_id,
            reserved_at: at,
        }
    }

    fn write_events(path: &Path, events: &[Event]) {
        let (mut wal, _) = Wal::recover(path).unwrap();
        for e in events {
            wal.push(e).unwrap();
        }
        wal.sync().unwrap();
    }

    fn recovered(path: &Path) -> Vec<Event> {
        Wal::recover(path).unwrap().1
    }

    #[test]
    fn staged_events_recover_after_sync() {
        let path = tmp_path("staged.wal");
        let rid = Ulid::new();
        let events = vec![resource_put(rid, Some("Court 1")), reserved(rid, 1_700_000_000_000)];

        let (mut wal, existing) = Wal::recover(&path).unwrap();
        assert!(existing.is_empty());
        for e in &events {
            wal.push(e).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 2);
        wal.sync().unwrap();
        drop(wal);

        assert_eq!(recovered(&path), events);
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        let path = tmp_path("torn_tail.wal");
        let first = resource_put(Ulid::new(), None);
        write_events(&path, std::slice::from_ref(&first));
        let intact = fs::metadata(&path).unwrap().len();

        // Half a record, as left by a crash mid-write.
        OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(&[7u8; 6])
            .unwrap();

        let later = resource_put(Ulid::new(), Some("after crash"));
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            wal.push(&later).unwrap();
            wal.sync().unwrap();
        }

        assert_eq!(recovered(&path), vec![first, later]);
    }

    #[test]
    fn bad_checksum_ends_the_log() {
        let path = tmp_path("bad_crc.wal");
        let good = resource_put(Ulid::new(), None);
        write_events(&path, std::slice::from_ref(&good));
        {
            let bad = Event::BookingDeleted {
                id: Ulid::new(),
                resource_id: Ulid::new(),
            };
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(recovered(&path), vec![good]);
    }

    #[test]
    fn oversized_length_prefix_is_garbage() {
        let path = tmp_path("oversized.wal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert!(recovered(&path).is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn compact_replaces_history_with_snapshot() {
        let path = tmp_path("compact.wal");
        let rid = Ulid::new();
        let history: Vec<Event> = std::iter::once(resource_put(rid, Some("Room")))
            .chain((0..20).map(|i| reserved(rid, i)))
            .collect();
        write_events(&path, &history);
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![resource_put(rid, Some("Room"))];
        let tail = Event::BookingCommitted {
            id: Ulid::new(),
            resource_id: rid,
        };
        {
            let (mut wal, _) = Wal::recover(&path).unwrap();
            assert_eq!(wal.appends_since_compact(), 21);
            wal.compact(&snapshot).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.push(&tail).unwrap();
            wal.sync().unwrap();
        }

        assert!(fs::metadata(&path).unwrap().len() < before);
        assert!(!sibling(&path, ".compact").exists());
        assert_eq!(recovered(&path), vec![snapshot[0].clone(), tail]);
    }
}
