//! File transfer — chunking and envelope-mode key wrapping.
//!
//! A file is split into chunks that each fit the sealed-size bound, every
//! chunk sealed with an independent IV.  Envelope mode seals chunks under
//! a fresh per-file key; the file key travels wrapped under the session
//! key, one wrapped copy per recipient, inside the chunk metadata.

use zeroize::Zeroizing;

use ql_crypto::{aead, rng};
use ql_proto::api::SendMessageResponse;
use ql_proto::encoding::{b64, b64d};
use ql_proto::message::{FileMetadata, FILE_CHUNK_BYTES};
use ql_proto::{MessageRecord, MessageType};

use crate::channel::SecureChannel;
use crate::error::ClientError;

impl SecureChannel {
    /// Send a file in envelope mode. Returns one relay response per chunk.
    pub async fn send_file(
        &self,
        file_name: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<Vec<SendMessageResponse>, ClientError> {
        let file_key = Zeroizing::new(rng::random_array::<32>());
        let wrapped = aead::wrap_key(&self.key, &file_key)?;
        let mut wrapped_keys = std::collections::BTreeMap::new();
        wrapped_keys.insert(self.partner_id.clone(), b64(&wrapped));

        // An empty file still travels as one (empty) chunk so the
        // recipient sees a complete transfer.
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[]]
        } else {
            bytes.chunks(FILE_CHUNK_BYTES).collect()
        };
        let chunk_count = chunks.len() as u32;

        let mut responses = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.into_iter().enumerate() {
            let metadata = FileMetadata {
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
                size_bytes: bytes.len() as u64,
                chunk_index: index as u32,
                chunk_count,
                wrapped_keys: wrapped_keys.clone(),
            };
            let response = self
                .send_payload(MessageType::File, chunk, Some(&*file_key), Some(metadata))
                .await?;
            responses.push(response);
        }
        Ok(responses)
    }

    /// Open one incoming file chunk: unwrap the file key addressed to us,
    /// then authenticate and decrypt the chunk under it.
    pub async fn receive_file_chunk(
        &self,
        record: &MessageRecord,
    ) -> Result<(FileMetadata, Zeroizing<Vec<u8>>), ClientError> {
        let metadata = record
            .file_metadata
            .clone()
            .ok_or_else(|| ClientError::State("file message without metadata".into()))?;
        let wrapped_b64 = metadata
            .wrapped_keys
            .get(&self.user_id)
            .ok_or_else(|| ClientError::State("no wrapped file key for this recipient".into()))?;
        let wrapped = b64d(wrapped_b64)?;
        let file_key = aead::unwrap_key(&self.key, &wrapped)?;

        let plaintext = self.open_with(record, &file_key).await?;
        Ok((metadata, plaintext))
    }
}

/// Stitch received chunks back into the original file.
/// Chunks may arrive already ordered (the relay enforces sequence order);
/// indices are still validated for completeness.
pub fn reassemble_file(
    mut chunks: Vec<(FileMetadata, Zeroizing<Vec<u8>>)>,
) -> Result<Vec<u8>, ClientError> {
    let Some((first, _)) = chunks.first() else {
        return Err(ClientError::State("no chunks to reassemble".into()));
    };
    let expected = first.chunk_count as usize;
    let total_size = first.size_bytes as usize;
    if chunks.len() != expected {
        return Err(ClientError::State(format!(
            "expected {expected} chunks, got {}",
            chunks.len()
        )));
    }

    chunks.sort_by_key(|(meta, _)| meta.chunk_index);
    let mut out = Vec::with_capacity(total_size);
    for (index, (meta, chunk)) in chunks.iter().enumerate() {
        if meta.chunk_index as usize != index {
            return Err(ClientError::State("missing or duplicate chunk".into()));
        }
        out.extend_from_slice(chunk);
    }
    if out.len() != total_size {
        return Err(ClientError::State("reassembled size mismatch".into()));
    }
    Ok(out)
}
