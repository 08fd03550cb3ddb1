//! On-disk image of a store tree.
//!
//! ```text
//! magic "PULSEIMG" | version u16 | node_count u32 | nodes... | crc32 u32
//! node: path | has_record u8 | record | segment_count u32 | segments...
//! segment: start f64 | end f64 | row_size u32 | capacity u32 | used u32
//!          | descriptor | bytes
//! ```
//!
//! Variable-length fields are a `u32` length followed by the bytes. All
//! integers are little endian. The checksum covers everything before it.

use crate::backend::{SegmentData, SegmentInfo};
use crate::error::{StorageError, StorageResult};
use crate::memory::{Node, Tree};
use bytes::{Buf, BufMut};

const MAGIC: &[u8; 8] = b"PULSEIMG";
const VERSION: u16 = 1;

/// CRC-32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

fn put_blob(buf: &mut Vec<u8>, blob: &[u8]) -> StorageResult<()> {
    let len = u32::try_from(blob.len())
        .map_err(|_| StorageError::Corrupted(format!("blob of {} bytes too large", blob.len())))?;
    buf.put_u32_le(len);
    buf.put_slice(blob);
    Ok(())
}

fn put_count(buf: &mut Vec<u8>, n: usize) -> StorageResult<()> {
    let n = u32::try_from(n)
        .map_err(|_| StorageError::Corrupted(format!("count {n} too large")))?;
    buf.put_u32_le(n);
    Ok(())
}

/// Serializes a tree into an image.
pub(crate) fn encode_image(tree: &Tree) -> StorageResult<Vec<u8>> {
    let nodes: Vec<&Node> = tree.nodes().collect();
    let mut buf = Vec::new();
    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    put_count(&mut buf, nodes.len())?;

    for node in nodes {
        put_blob(&mut buf, node.path.as_bytes())?;
        match &node.record {
            Some(record) => {
                buf.put_u8(1);
                put_blob(&mut buf, record)?;
            }
            None => buf.put_u8(0),
        }
        put_count(&mut buf, node.segments.len())?;
        for segment in &node.segments {
            let info = &segment.info;
            buf.put_f64_le(info.start);
            buf.put_f64_le(info.end);
            put_count(&mut buf, info.row_size)?;
            put_count(&mut buf, info.capacity)?;
            put_count(&mut buf, info.used)?;
            put_blob(&mut buf, &info.descriptor)?;
            put_blob(&mut buf, &segment.bytes)?;
        }
    }

    let crc = compute_crc32(&buf);
    buf.put_u32_le(crc);
    Ok(buf)
}

/// Bounds-checked reader over an image body.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> StorageResult<()> {
        if self.data.remaining() < n {
            return Err(StorageError::Corrupted(format!(
                "image truncated: need {n} bytes, {} left",
                self.data.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> StorageResult<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn u16(&mut self) -> StorageResult<u16> {
        self.need(2)?;
        Ok(self.data.get_u16_le())
    }

    fn count(&mut self) -> StorageResult<usize> {
        self.need(4)?;
        Ok(self.data.get_u32_le() as usize)
    }

    fn f64(&mut self) -> StorageResult<f64> {
        self.need(8)?;
        Ok(self.data.get_f64_le())
    }

    fn blob(&mut self) -> StorageResult<&'a [u8]> {
        let len = self.count()?;
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }
}

/// Parses an image produced by [`encode_image`].
pub(crate) fn decode_image(image: &[u8]) -> StorageResult<Tree> {
    if image.len() < MAGIC.len() + 2 + 4 + 4 {
        return Err(StorageError::Corrupted("image too short".into()));
    }
    let (body, trailer) = image.split_at(image.len() - 4);
    let stored_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed_crc = compute_crc32(body);
    if stored_crc != computed_crc {
        return Err(StorageError::Corrupted(format!(
            "checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }
    if &body[..MAGIC.len()] != MAGIC {
        return Err(StorageError::Corrupted("not a pulse file image".into()));
    }

    let mut reader = Reader {
        data: &body[MAGIC.len()..],
    };
    let version = reader.u16()?;
    if version != VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported image version {version}"
        )));
    }

    let node_count = reader.count()?;
    let mut nodes = Vec::with_capacity(node_count.min(4096));
    for _ in 0..node_count {
        let path = std::str::from_utf8(reader.blob()?)
            .map_err(|_| StorageError::Corrupted("node path is not UTF-8".into()))?
            .to_string();
        let record = match reader.u8()? {
            0 => None,
            1 => Some(reader.blob()?.to_vec()),
            flag => {
                return Err(StorageError::Corrupted(format!(
                    "bad record flag {flag} on {path}"
                )))
            }
        };
        let segment_count = reader.count()?;
        let mut segments = Vec::with_capacity(segment_count.min(4096));
        for _ in 0..segment_count {
            let start = reader.f64()?;
            let end = reader.f64()?;
            let row_size = reader.count()?;
            let capacity = reader.count()?;
            let used = reader.count()?;
            let descriptor = reader.blob()?.to_vec();
            let bytes = reader.blob()?.to_vec();
            if bytes.len() != row_size * capacity || used > capacity {
                return Err(StorageError::Corrupted(format!(
                    "segment of {path} has inconsistent size"
                )));
            }
            segments.push(SegmentData {
                info: SegmentInfo {
                    start,
                    end,
                    row_size,
                    capacity,
                    used,
                    descriptor,
                },
                bytes,
            });
        }
        nodes.push(Node {
            path,
            record,
            segments,
        });
    }

    if reader.data.has_remaining() {
        return Err(StorageError::Corrupted("trailing bytes in image".into()));
    }
    Ok(Tree::from_nodes(nodes))
}
