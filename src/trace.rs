//! Binary trace files.
//!
//! A trace starts with the ASCII signature `5TRF` and a big-endian `u32`
//! processor count, followed by 8-byte big-endian entries. Entries of the
//! different processors are interleaved: entry `k` of processor `p` lives at
//! `8 + (k * procs + p) * 8`. The three most significant bits of an entry hold
//! its kind code, the remaining 61 bits the word address.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const SIGNATURE: &[u8; 4] = b"5TRF";
pub const HEADER_SIZE: u64 = 8;
pub const ENTRY_SIZE: u64 = 8;
pub const ADDRESS_MASK: u64 = (1 << KIND_SHIFT) - 1;
const KIND_SHIFT: u32 = 61;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Nop,
    Read,
    Write,
    End,
    Barrier,
}

impl EntryKind {
    pub const ALL: [EntryKind; 5] = [
        EntryKind::Nop,
        EntryKind::Read,
        EntryKind::Write,
        EntryKind::End,
        EntryKind::Barrier,
    ];

    pub fn letter(self) -> char {
        match self {
            EntryKind::Nop => 'N',
            EntryKind::Read => 'R',
            EntryKind::Write => 'W',
            EntryKind::End => 'E',
            EntryKind::Barrier => 'B',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        EntryKind::ALL
            .into_iter()
            .find(|k| k.letter() == c.to_ascii_uppercase())
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryKind::Nop => "NOP",
            EntryKind::Read => "READ",
            EntryKind::Write => "WRITE",
            EntryKind::End => "END",
            EntryKind::Barrier => "BARRIER",
        };
        f.write_str(name)
    }
}

/// Assignment of the 3-bit kind codes to entry kinds.
///
/// Written as a string of kind letters where the letter at position `i`
/// names the kind encoded as `i`. The default, `NRWEB`, is the convention of
/// the trace generator scripts: `NOP=0, READ=1, WRITE=2, END=3, BARRIER=4`.
/// Codes past the end of the string are unassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindMap {
    kinds: [Option<EntryKind>; 8],
    codes: [u8; 5],
}

impl KindMap {
    pub fn new(letters: &str) -> Result<Self> {
        let mut kinds = [None; 8];
        let mut codes = [0u8; 5];
        let mut assigned = [false; 5];

        if letters.chars().count() > kinds.len() {
            return Err(Error::Config(format!(
                "kind map '{letters}' assigns more than {} codes",
                kinds.len()
            )));
        }
        for (code, c) in letters.chars().enumerate() {
            let kind = EntryKind::from_letter(c).ok_or_else(|| {
                Error::Config(format!("kind map '{letters}': unknown kind letter '{c}'"))
            })?;
            let slot = kind_slot(kind);
            if assigned[slot] {
                return Err(Error::Config(format!(
                    "kind map '{letters}': {kind} assigned twice"
                )));
            }
            assigned[slot] = true;
            kinds[code] = Some(kind);
            codes[slot] = code as u8;
        }
        if let Some(missing) = EntryKind::ALL.into_iter().find(|k| !assigned[kind_slot(*k)]) {
            return Err(Error::Config(format!(
                "kind map '{letters}' does not assign {missing}"
            )));
        }
        Ok(KindMap { kinds, codes })
    }

    pub fn kind(&self, code: u8) -> Option<EntryKind> {
        self.kinds.get(code as usize).copied().flatten()
    }

    pub fn code(&self, kind: EntryKind) -> u8 {
        self.codes[kind_slot(kind)]
    }
}

fn kind_slot(kind: EntryKind) -> usize {
    match kind {
        EntryKind::Nop => 0,
        EntryKind::Read => 1,
        EntryKind::Write => 2,
        EntryKind::End => 3,
        EntryKind::Barrier => 4,
    }
}

impl Default for KindMap {
    fn default() -> Self {
        KindMap {
            kinds: [
                Some(EntryKind::Nop),
                Some(EntryKind::Read),
                Some(EntryKind::Write),
                Some(EntryKind::End),
                Some(EntryKind::Barrier),
                None,
                None,
                None,
            ],
            codes: [0, 1, 2, 3, 4],
        }
    }
}

impl FromStr for KindMap {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KindMap::new(s)
    }
}

impl fmt::Display for KindMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in self.kinds.iter().map_while(|k| *k) {
            write!(f, "{}", kind.letter())?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub address: u64,
    pub kind: EntryKind,
}

impl TraceEntry {
    pub const NOP: TraceEntry = TraceEntry {
        address: 0,
        kind: EntryKind::Nop,
    };

    /// Builds an entry, dropping address bits that do not fit in 61 bits.
    pub fn new(kind: EntryKind, address: u64) -> Self {
        TraceEntry {
            address: address & ADDRESS_MASK,
            kind,
        }
    }

    pub fn encode(&self, kind_map: &KindMap) -> u64 {
        ((kind_map.code(self.kind) as u64) << KIND_SHIFT) | (self.address & ADDRESS_MASK)
    }

    /// Decodes a raw entry. `None` when its kind code is unassigned.
    pub fn decode(raw: u64, kind_map: &KindMap) -> Option<Self> {
        let (code, address) = split_raw(raw);
        kind_map.kind(code).map(|kind| TraceEntry { address, kind })
    }
}

/// Splits a raw entry into its kind code and address.
pub fn split_raw(raw: u64) -> (u8, u64) {
    ((raw >> KIND_SHIFT) as u8, raw & ADDRESS_MASK)
}

fn read_header<R: Read>(input: &mut R) -> Result<u32> {
    let mut signature = [0u8; 4];
    match input.read_exact(&mut signature) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::Format("file is shorter than the signature".into()));
        }
        Err(e) => return Err(e.into()),
    }
    if &signature != SIGNATURE {
        return Err(Error::Format(format!(
            "expected signature \"5TRF\", found {:?}",
            String::from_utf8_lossy(&signature)
        )));
    }

    let mut count = [0u8; 4];
    match input.read_exact(&mut count) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(Error::TruncatedFile { procs: 0, len: 4 });
        }
        Err(e) => return Err(e.into()),
    }
    let procs = u32::from_be_bytes(count);
    if procs == 0 {
        return Err(Error::Format("trace declares zero processors".into()));
    }
    Ok(procs)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cursor {
    At(u64),
    Finished,
}

/// Serves the entries of a trace one processor at a time.
///
/// Each processor has its own cursor. Barriers hold a processor on `NOP`
/// until every processor has reached one, and a trace that ends (with an
/// `END` entry or by running out of bytes) keeps answering `NOP`.
pub struct TraceReader<R> {
    input: R,
    kind_map: KindMap,
    cursors: Vec<Cursor>,
    waiting: Vec<bool>,
    end: u64,
    finished: usize,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, kind_map: KindMap) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        TraceReader::from_reader(BufReader::new(file), kind_map)
    }
}

impl<R: Read + Seek> TraceReader<R> {
    pub fn from_reader(mut input: R, kind_map: KindMap) -> Result<Self> {
        input.seek(SeekFrom::Start(0))?;
        let procs = read_header(&mut input)?;
        let end = input.seek(SeekFrom::End(0))?;

        if end < HEADER_SIZE + procs as u64 * ENTRY_SIZE {
            return Err(Error::TruncatedFile { procs, len: end });
        }

        let cursors = (0..procs as u64)
            .map(|i| Cursor::At(HEADER_SIZE + i * ENTRY_SIZE))
            .collect();

        Ok(TraceReader {
            input,
            kind_map,
            cursors,
            waiting: vec![false; procs as usize],
            end,
            finished: 0,
        })
    }

    pub fn processor_count(&self) -> usize {
        self.cursors.len()
    }

    pub fn kind_map(&self) -> &KindMap {
        &self.kind_map
    }

    /// Next access of processor `proc_id`.
    ///
    /// Only `READ`, `WRITE` and `NOP` entries are ever returned: barriers and
    /// end markers are consumed here and reported as `NOP`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown processor id, on an I/O error, and when the entry
    /// under the cursor carries an unassigned kind code.
    pub fn next(&mut self, proc_id: usize) -> Result<TraceEntry> {
        let procs = self.processor_count();
        let pos = match self.cursors.get(proc_id) {
            None => return Err(Error::InvalidProcessor { proc_id, procs }),
            Some(Cursor::Finished) => return Ok(TraceEntry::NOP),
            Some(Cursor::At(pos)) => *pos,
        };

        // no whole entry left: the trace ended without an END tag
        if pos + ENTRY_SIZE > self.end {
            self.finish(proc_id);
            return Ok(TraceEntry::NOP);
        }

        if self.waiting[proc_id] {
            return Ok(TraceEntry::NOP);
        }

        let mut buf = [0u8; ENTRY_SIZE as usize];
        self.input.seek(SeekFrom::Start(pos))?;
        self.input.read_exact(&mut buf)?;
        let raw = u64::from_be_bytes(buf);
        self.cursors[proc_id] = Cursor::At(pos + procs as u64 * ENTRY_SIZE);

        let entry = TraceEntry::decode(raw, &self.kind_map).ok_or(Error::RuntimeTrace {
            proc_id,
            code: split_raw(raw).0,
            offset: pos,
        })?;

        match entry.kind {
            EntryKind::Barrier => {
                self.waiting[proc_id] = true;
                if self.waiting.iter().all(|w| *w) {
                    self.waiting.fill(false);
                }
                Ok(TraceEntry::NOP)
            }
            EntryKind::End => {
                self.finish(proc_id);
                Ok(TraceEntry::NOP)
            }
            EntryKind::Read | EntryKind::Write | EntryKind::Nop => Ok(entry),
        }
    }

    fn finish(&mut self, proc_id: usize) {
        self.cursors[proc_id] = Cursor::Finished;
        self.finished += 1;
    }
}

impl<R> TraceReader<R> {
    /// True once every processor's trace has ended.
    pub fn eof(&self) -> bool {
        self.finished == self.cursors.len()
    }

    pub fn is_waiting(&self, proc_id: usize) -> bool {
        self.waiting.get(proc_id).copied().unwrap_or(false)
    }

    pub fn is_finished(&self, proc_id: usize) -> bool {
        matches!(self.cursors.get(proc_id), Some(Cursor::Finished))
    }
}

/// Produces trace files.
///
/// Entries are appended in file order, so the caller interleaves processors
/// itself: with two processors, the first entry belongs to P0, the second to
/// P1, the third to P0 again.
pub struct TraceWriter<W: Write> {
    out: W,
    procs: u32,
    kind_map: KindMap,
}

impl TraceWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>, procs: u32) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        TraceWriter::new(BufWriter::new(file), procs, KindMap::default())
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut out: W, procs: u32, kind_map: KindMap) -> Result<Self> {
        out.write_all(SIGNATURE)?;
        out.write_all(&procs.to_be_bytes())?;
        Ok(TraceWriter {
            out,
            procs,
            kind_map,
        })
    }

    pub fn entry(&mut self, kind: EntryKind, address: u64) -> Result<()> {
        let raw = TraceEntry::new(kind, address).encode(&self.kind_map);
        self.out.write_all(&raw.to_be_bytes())?;
        Ok(())
    }

    pub fn read(&mut self, address: u64) -> Result<()> {
        self.entry(EntryKind::Read, address)
    }

    pub fn write(&mut self, address: u64) -> Result<()> {
        self.entry(EntryKind::Write, address)
    }

    pub fn nop(&mut self) -> Result<()> {
        self.entry(EntryKind::Nop, 0)
    }

    pub fn barrier(&mut self) -> Result<()> {
        self.entry(EntryKind::Barrier, 0)
    }

    /// Terminates every processor's trace with `END` and flushes.
    pub fn finish(mut self) -> Result<W> {
        for _ in 0..self.procs {
            self.entry(EntryKind::End, 0)?;
        }
        self.finish_without_end()
    }

    pub fn finish_without_end(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// One raw entry as stored in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DumpedEntry {
    pub proc_id: usize,
    pub code: u8,
    pub kind: Option<EntryKind>,
    pub address: u64,
}

impl DumpedEntry {
    pub fn format(&self, hex: bool) -> String {
        let kind = match self.kind {
            Some(kind) => kind.to_string(),
            None => format!("UNKNOWN({})", self.code),
        };
        if hex {
            format!("P{} {} {:#x}", self.proc_id, kind, self.address)
        } else {
            format!("P{} {} {}", self.proc_id, kind, self.address)
        }
    }
}

/// Iterates over the entries of a trace in file order, without any of the
/// barrier or end-of-trace handling of [`TraceReader`].
pub struct TraceDump<R> {
    input: R,
    kind_map: KindMap,
    procs: usize,
    next_proc: usize,
}

impl<R: Read> TraceDump<R> {
    pub fn new(mut input: R, kind_map: KindMap) -> Result<Self> {
        let procs = read_header(&mut input)? as usize;
        Ok(TraceDump {
            input,
            kind_map,
            procs,
            next_proc: 0,
        })
    }

    pub fn processor_count(&self) -> usize {
        self.procs
    }

    /// First line of a listing: the signature and the processor count.
    pub fn header(&self) -> String {
        format!("{} {}", String::from_utf8_lossy(SIGNATURE), self.procs)
    }
}

impl<R: Read> Iterator for TraceDump<R> {
    type Item = Result<DumpedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        match self.input.read_exact(&mut buf) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }
        let (code, address) = split_raw(u64::from_be_bytes(buf));
        let proc_id = self.next_proc;
        self.next_proc = (self.next_proc + 1) % self.procs;
        Some(Ok(DumpedEntry {
            proc_id,
            code,
            kind: self.kind_map.kind(code),
            address,
        }))
    }
}
