use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Length prefix plus crc32 trailer around every payload.
const FRAME_OVERHEAD: u64 = 8;

/// Frame one record as `[len][bincode][crc32]`.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Intact prefix of a journal file.
struct Scan {
    events: Vec<Event>,
    /// Byte length of the intact prefix.
    good_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                good_len: 0,
                file_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut good_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u64::from(u32::from_le_bytes(len_buf));
        // A garbage length would otherwise allocate whatever it claims.
        if good_len + FRAME_OVERHEAD + len > file_len {
            break;
        }
        let mut payload = vec![0u8; len as usize];
        if !read_frame_part(&mut reader, &mut payload)? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if !read_frame_part(&mut reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
        good_len += FRAME_OVERHEAD + len;
    }

    Ok(Scan {
        events,
        good_len,
        file_len,
    })
}

/// Append-only journal of store events.
///
/// Each entry is `[u32: len][bincode: Event][u32: crc32]`, little endian, where
/// `len` counts only the payload. Opening a journal cuts off a torn or corrupt
/// tail, so new records always follow the last intact one.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Recover the journal at `path` (creating it if missing) and open it for
    /// appends. Returns the intact records in write order.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scan = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if scan.good_len < scan.file_len {
            warn!(
                "journal {}: dropping {} bytes of torn tail after {} records",
                path.display(),
                scan.file_len - scan.good_len,
                scan.events.len()
            );
            file.set_len(scan.good_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, scan.events))
    }

    /// Buffer a record without syncing. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a snapshot of records to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the journal and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read the intact records without touching the file.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AvailabilitySlot, Booking};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(start: i64) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                user_id: Ulid::new(),
                start,
                duration_minutes: 30,
                slot_id: None,
                created_at: 1,
                updated_at: 1,
            },
        }
    }

    fn slot_created(provider_id: Ulid, start: i64) -> Event {
        Event::SlotCreated {
            slot: AvailabilitySlot {
                id: Ulid::new(),
                provider_id,
                pattern_id: None,
                start,
                end: start + 3_600_000,
                created_at: 1,
            },
        }
    }

    fn append_all(path: &Path, events: &[Event]) {
        let (mut wal, _) = Wal::open(path).unwrap();
        for e in events {
            wal.append_buffered(e).unwrap();
        }
        wal.flush_sync().unwrap();
    }

    fn append_garbage(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn append_and_reopen() {
        let path = tmp_path("append_and_reopen.wal");
        let events = vec![created(1_000), slot_created(Ulid::new(), 5_000)];
        append_all(&path, &events);

        let (_, recovered) = Wal::open(&path).unwrap();
        assert_eq!(recovered, events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_opens_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
        let (_, recovered) = Wal::open(&path).unwrap();
        assert!(recovered.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn open_cuts_torn_tail_before_appending() {
        let path = tmp_path("torn_tail.wal");
        let first = created(1_000);
        append_all(&path, std::slice::from_ref(&first));
        let intact_len = fs::metadata(&path).unwrap().len();
        append_garbage(&path, &[7u8; 6]);

        let second = created(2_000);
        {
            let (mut wal, recovered) = Wal::open(&path).unwrap();
            assert_eq!(recovered, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
            wal.append_buffered(&second).unwrap();
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn open_cuts_record_with_bad_checksum() {
        let path = tmp_path("bad_crc.wal");
        let good = created(1_000);
        append_all(&path, std::slice::from_ref(&good));
        let payload = bincode::serialize(&Event::BookingDeleted { id: Ulid::new() }).unwrap();
        let mut bad = (payload.len() as u32).to_le_bytes().to_vec();
        bad.extend_from_slice(&payload);
        bad.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        append_garbage(&path, &bad);

        assert_eq!(Wal::replay(&path).unwrap(), vec![good.clone()]);
        let later = created(3_000);
        append_all(&path, std::slice::from_ref(&later));
        assert_eq!(Wal::replay(&path).unwrap(), vec![good, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn huge_length_prefix_is_treated_as_torn() {
        let path = tmp_path("huge_len.wal");
        let good = created(1_000);
        append_all(&path, std::slice::from_ref(&good));
        append_garbage(&path, &u32::MAX.to_le_bytes());

        let (_, recovered) = Wal::open(&path).unwrap();
        assert_eq!(recovered, vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_keeps_snapshot() {
        let path = tmp_path("compact.wal");
        let keep = slot_created(Ulid::new(), 0);
        let mut events = vec![keep.clone()];
        for i in 0..20 {
            let e = created(i * 10_000);
            let Event::BookingCreated { booking } = &e else { unreachable!() };
            let id = booking.id;
            events.push(e);
            events.push(Event::BookingDeleted { id });
        }
        append_all(&path, &events);
        let before = fs::metadata(&path).unwrap().len();

        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            Wal::write_compact_file(wal.path(), std::slice::from_ref(&keep)).unwrap();
            wal.swap_compact_file().unwrap();
            assert_eq!(wal.appends_since_compact(), 0);

            let later = created(500_000);
            wal.append_buffered(&later).unwrap();
            wal.flush_sync().unwrap();
            assert_eq!(Wal::replay(&path).unwrap(), vec![keep.clone(), later]);
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_count_until_synced() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| created(i * 1_000)).collect();
        {
            let (mut wal, _) = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
