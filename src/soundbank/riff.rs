//! Chunk walker for RIFF containers (SF2 and WAV).

use std::io::{self, Read, Seek, SeekFrom};

/// Four-character chunk tag.
pub type FourCC = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Top-level `RIFF` container, re-tagged with its form type.
    Riff,
    /// `LIST` container, re-tagged with its list type.
    List,
    /// Any leaf chunk.
    Custom,
}

/// Header of one chunk. `start` is the payload offset, `size` the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub id: FourCC,
    pub size: u32,
    pub start: u64,
    pub kind: ChunkKind,
}

impl Chunk {
    /// Reads a chunk header at the current stream position.
    ///
    /// Containers consume their inner type tag, so `id` becomes e.g. `sfbk` or `pdta` and the
    /// payload starts after it.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        let mut id = [0u8; 4];
        reader.read_exact(&mut id)?;
        let mut size = [0u8; 4];
        reader.read_exact(&mut size)?;
        let mut size = u32::from_le_bytes(size);
        let mut start = reader.stream_position()?;

        let kind = match &id {
            b"RIFF" => ChunkKind::Riff,
            b"LIST" => ChunkKind::List,
            _ => ChunkKind::Custom,
        };

        if kind != ChunkKind::Custom {
            reader.read_exact(&mut id)?;
            start += 4;
            size = size.saturating_sub(4);
        }

        Ok(Self {
            id,
            size,
            start,
            kind,
        })
    }

    pub fn is(&self, tag: &FourCC) -> bool {
        &self.id == tag
    }

    pub fn end(&self) -> u64 {
        self.start + u64::from(self.size)
    }

    /// Moves to the next sibling chunk, honoring the word-alignment pad byte.
    pub fn seek_after<S: Seek>(&self, reader: &mut S) -> io::Result<u64> {
        let mut next = self.end();
        if next % 2 != 0 {
            next += 1;
        }
        reader.seek(SeekFrom::Start(next))
    }

    /// Reads the whole payload of a leaf chunk.
    pub fn read_payload<R: Read + Seek>(&self, reader: &mut R) -> io::Result<Vec<u8>> {
        reader.seek(SeekFrom::Start(self.start))?;
        let mut payload = vec![0u8; self.size as usize];
        reader.read_exact(&mut payload)?;
        Ok(payload)
    }

    pub fn id_str(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}

/// Walks sibling chunks from the current position up to `end`, stopping at the first `tag`.
///
/// On success the stream is positioned at the found chunk's payload.
pub fn find_chunk<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    tag: &FourCC,
) -> io::Result<Option<Chunk>> {
    while reader.stream_position()? + 8 <= end {
        let chunk = Chunk::read_from(reader)?;
        if chunk.is(tag) {
            return Ok(Some(chunk));
        }
        chunk.seek_after(reader)?;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn leaf(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_container_is_retagged() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(b"sfbk");
        bytes.extend_from_slice(&leaf(b"abcd", &[]));

        let mut cursor = Cursor::new(bytes);
        let chunk = Chunk::read_from(&mut cursor).unwrap();

        assert_eq!(chunk.kind, ChunkKind::Riff);
        assert!(chunk.is(b"sfbk"));
        assert_eq!(chunk.start, 12);
        assert_eq!(chunk.size, 8);
        assert_eq!(chunk.end(), 20);
    }

    #[test]
    fn test_leaf_chunk_keeps_unknown_tag() {
        let mut cursor = Cursor::new(leaf(b"\x01\x02zz", &[1, 2, 3, 4]));
        let chunk = Chunk::read_from(&mut cursor).unwrap();

        assert_eq!(chunk.kind, ChunkKind::Custom);
        assert_eq!(chunk.id, *b"\x01\x02zz");
        assert_eq!(chunk.read_payload(&mut cursor).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_seek_after_skips_pad_byte() {
        let mut bytes = leaf(b"odd ", &[9, 9, 9]);
        bytes.extend_from_slice(&leaf(b"next", &[7, 7]));

        let mut cursor = Cursor::new(bytes);
        let odd = Chunk::read_from(&mut cursor).unwrap();
        assert_eq!(odd.seek_after(&mut cursor).unwrap(), 12);

        let next = Chunk::read_from(&mut cursor).unwrap();
        assert!(next.is(b"next"));
        assert_eq!(next.size, 2);
    }

    #[test]
    fn test_find_chunk_walks_siblings() {
        let mut bytes = leaf(b"aaaa", &[0; 6]);
        bytes.extend_from_slice(&leaf(b"bbbb", &[5]));
        bytes.extend_from_slice(&leaf(b"cccc", &[1, 2]));
        let end = bytes.len() as u64;

        let mut cursor = Cursor::new(bytes);
        let found = find_chunk(&mut cursor, end, b"cccc").unwrap().unwrap();
        assert_eq!(found.read_payload(&mut cursor).unwrap(), vec![1, 2]);

        cursor.set_position(0);
        assert!(find_chunk(&mut cursor, end, b"zzzz").unwrap().is_none());
    }

    #[test]
    fn test_truncated_header_is_an_io_error() {
        let mut cursor = Cursor::new(b"RIF".to_vec());
        assert!(Chunk::read_from(&mut cursor).is_err());
    }
}
