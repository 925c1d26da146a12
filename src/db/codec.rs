//! Fixed binary encodings for store keys and values.

use crate::error::DatabaseError;
use crate::types::{MessageId, PostId};
use crate::{Error, Result};

const ID_WIDTH: usize = 8;

/// Encode a source id as 8 big-endian bytes
pub fn encode_post_id(id: PostId) -> Vec<u8> {
    id.get().to_be_bytes().to_vec()
}

/// Decode a source id; the input must be exactly 8 bytes
pub fn decode_post_id(bytes: &[u8], partition: &'static str) -> Result<PostId> {
    let raw: [u8; ID_WIDTH] = bytes.try_into().map_err(|_| {
        Error::Database(DatabaseError::CorruptRecord {
            partition,
            reason: format!("expected {} byte id, found {} bytes", ID_WIDTH, bytes.len()),
        })
    })?;
    Ok(PostId(i64::from_be_bytes(raw)))
}

/// Encode a message id list as the concatenation of 8-byte big-endian ids
pub fn encode_message_ids(ids: &[MessageId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * ID_WIDTH);
    for id in ids {
        out.extend_from_slice(&id.get().to_be_bytes());
    }
    out
}

/// Decode a concatenated id list; the length must be a multiple of 8
pub fn decode_message_ids(bytes: &[u8], partition: &'static str) -> Result<Vec<MessageId>> {
    if bytes.len() % ID_WIDTH != 0 {
        return Err(Error::Database(DatabaseError::CorruptRecord {
            partition,
            reason: format!(
                "id list length {} is not a multiple of {}",
                bytes.len(),
                ID_WIDTH
            ),
        }));
    }

    Ok(bytes
        .chunks_exact(ID_WIDTH)
        .map(|chunk| {
            let mut raw = [0u8; ID_WIDTH];
            raw.copy_from_slice(chunk);
            MessageId(i64::from_be_bytes(raw))
        })
        .collect())
}
