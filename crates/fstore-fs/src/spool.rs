use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// Default rollover threshold: 256 MiB.
pub const ROLLOVER_THRESHOLD: usize = 256 * 1024 * 1024;

/// A read/write byte buffer backed by memory until a threshold, then by an
/// unnamed temp file.
///
/// Writes accumulate in memory; once the total would exceed the threshold,
/// the buffered bytes are copied to a temp file and subsequent writes go
/// there. The first read rewinds to the start. The temp file is unlinked by
/// the OS once the buffer is dropped.
pub struct SpooledBuffer {
    backing: Backing,
    threshold: usize,
    read_started: bool,
}

enum Backing {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

impl SpooledBuffer {
    pub fn new() -> Self {
        Self::with_threshold(ROLLOVER_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            backing: Backing::Memory(Cursor::new(Vec::new())),
            threshold,
            read_started: false,
        }
    }

    /// Total bytes held, answered by whichever backing store is active.
    pub fn len(&self) -> io::Result<u64> {
        match &self.backing {
            Backing::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
            Backing::File(file) => Ok(file.metadata()?.len()),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// True once writes have spilled to the temp file.
    pub fn rolled_over(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Reposition to the start for (re-)reading.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.read_started = true;
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.set_position(0),
            Backing::File(file) => {
                file.seek(SeekFrom::Start(0))?;
            }
        }
        Ok(())
    }

    /// Copy the in-memory bytes into a fresh temp file and redirect
    /// subsequent writes there.
    fn roll_over(&mut self) -> io::Result<()> {
        let Backing::Memory(cursor) = &mut self.backing else {
            return Ok(());
        };
        tracing::debug!(buffered = cursor.get_ref().len(), "spool rollover to temp file");
        let mut file = tempfile::tempfile()?;
        file.write_all(cursor.get_ref())?;
        self.backing = Backing::File(file);
        Ok(())
    }
}

impl Default for SpooledBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for SpooledBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Backing::Memory(cursor) = &self.backing {
            if cursor.get_ref().len() + buf.len() > self.threshold {
                self.roll_over()?;
            }
        }
        match &mut self.backing {
            Backing::Memory(cursor) => {
                cursor.get_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            Backing::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::Memory(_) => Ok(()),
            Backing::File(file) => file.flush(),
        }
    }
}

impl Read for SpooledBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.read_started {
            self.rewind()?;
        }
        match &mut self.backing {
            Backing::Memory(cursor) => cursor.read(buf),
            Backing::File(file) => file.read(buf),
        }
    }
}
