//! Splits a byte stream into content-addressed chunks (§3, §4.5). A chunk's
//! identifier is the lower-hex SHA-1 digest of its bytes; identical bytes
//! always produce the identical id (I5).

use crate::wire::ChunkId;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub index: usize,
    pub chunk_id: ChunkId,
    pub data: Vec<u8>,
}

pub fn sha1_hex(data: &[u8]) -> ChunkId {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads `reader` to completion, producing chunks of at most `chunk_size`
/// bytes. Only the final chunk may be shorter. A zero-length input yields no
/// chunks.
pub async fn split_into_chunks<R: AsyncRead + Unpin>(
    mut reader: R,
    chunk_size: usize,
) -> std::io::Result<Vec<ChunkPiece>> {
    let mut pieces = Vec::new();
    let mut buf = vec![0u8; chunk_size];
    let mut index = 0usize;

    loop {
        let mut filled = 0usize;
        while filled < chunk_size {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        let data = buf[..filled].to_vec();
        let chunk_id = sha1_hex(&data);
        pieces.push(ChunkPiece {
            index,
            chunk_id,
            data,
        });
        index += 1;
        if filled < chunk_size {
            break;
        }
    }

    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn splits_into_full_and_final_short_chunk() {
        let chunk_size = 4;
        let data = b"aaaabbbbc".to_vec(); // 4 + 4 + 1
        let pieces = split_into_chunks(Cursor::new(data), chunk_size).await.unwrap();
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].data, b"aaaa");
        assert_eq!(pieces[1].data, b"bbbb");
        assert_eq!(pieces[2].data, b"c");
        assert_eq!(pieces[0].index, 0);
        assert_eq!(pieces[2].index, 2);
    }

    #[tokio::test]
    async fn identical_bytes_produce_identical_chunk_id() {
        let a = split_into_chunks(Cursor::new(b"hello world".to_vec()), 1024)
            .await
            .unwrap();
        let b = split_into_chunks(Cursor::new(b"hello world".to_vec()), 1024)
            .await
            .unwrap();
        assert_eq!(a[0].chunk_id, b[0].chunk_id);
    }

    #[tokio::test]
    async fn empty_input_yields_no_chunks() {
        let pieces = split_into_chunks(Cursor::new(Vec::<u8>::new()), 1024)
            .await
            .unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn sha1_hex_is_stable() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
