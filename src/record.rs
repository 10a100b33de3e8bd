//! The unit every iterator yields: a source-relative path and a seekable,
//! explicitly released content handle.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// One crawled document.
#[derive(Debug)]
pub struct Record {
    pub path: String,
    pub content: RecordContent,
}

impl Record {
    pub fn new(path: impl Into<String>, content: RecordContent) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }

    /// Reads the remaining content into memory.
    pub fn read_to_vec(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.content.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Releases the content handle.
    pub fn close(mut self) {
        self.content.close();
    }
}

/// Seekable content owned by the iterator until the consumer closes it.
///
/// Bodies are buffered in memory so a record stays readable after the
/// clone directory it came from has been removed.
#[derive(Debug)]
pub struct RecordContent {
    inner: Cursor<Vec<u8>>,
    closed: bool,
}

impl RecordContent {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Cursor::new(body.into()),
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Drops the buffered body. Further reads and seeks fail.
    pub fn close(&mut self) {
        self.closed = true;
        self.inner = Cursor::new(Vec::new());
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::other("record content has been closed"));
        }
        Ok(())
    }
}

impl Read for RecordContent {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.inner.read(buf)
    }
}

impl Seek for RecordContent {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        self.inner.seek(pos)
    }
}
