//! Receiving side of a chunked upload
//!
//! Chunks are held per session, keyed by index, until `complete` checks that
//! indices `0..n` are all present, joins them and decodes the text. A resent
//! chunk replaces the earlier copy, so client retries are harmless.
//!
//! Sessions idle for longer than the TTL are dropped whenever a chunk
//! arrives, and at most `max_sessions` may be open at once.

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use taskaudit_config::UploadConfig;
use tokio::time::Instant;

use crate::error::{UploadError, UploadResult};

const DEFAULT_MAX_SESSIONS: usize = 64;
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

struct Session {
    chunks: BTreeMap<u32, Bytes>,
    bytes: u64,
    last_touched: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            bytes: 0,
            last_touched: Instant::now(),
        }
    }
}

/// Fully assembled payload of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledUpload {
    pub session_id: String,
    pub content: String,
    pub total_chunks: u32,
}

pub struct UploadAssembler {
    sessions: DashMap<String, Session>,
    max_session_bytes: u64,
    max_sessions: usize,
    session_ttl: Duration,
}

impl UploadAssembler {
    pub fn new(max_session_bytes: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            max_session_bytes,
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_session_bytes)
            .with_session_limits(config.max_sessions, config.session_ttl())
    }

    #[must_use]
    pub const fn with_session_limits(mut self, max_sessions: usize, session_ttl: Duration) -> Self {
        self.max_sessions = max_sessions;
        self.session_ttl = session_ttl;
        self
    }

    /// Store one chunk; the session is created on its first chunk
    ///
    /// # Errors
    ///
    /// Returns `TooManySessions` if a new session would exceed the open
    /// session limit, or `SessionTooLarge` if the chunk would push the
    /// session past the byte limit; the session is dropped in that case
    pub fn accept_chunk(&self, session_id: &str, index: u32, data: Bytes) -> UploadResult<()> {
        self.evict_expired();
        if !self.sessions.contains_key(session_id) && self.sessions.len() >= self.max_sessions {
            tracing::warn!(
                %session_id,
                max_sessions = self.max_sessions,
                "Upload session limit reached"
            );
            return Err(UploadError::TooManySessions {
                max: self.max_sessions,
            });
        }

        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.last_touched = Instant::now();

        let replaced = session
            .chunks
            .get(&index)
            .map_or(0, |previous| previous.len() as u64);
        let bytes = session
            .bytes
            .saturating_sub(replaced)
            .saturating_add(data.len() as u64);

        if bytes > self.max_session_bytes {
            drop(session);
            self.sessions.remove(session_id);
            tracing::warn!(
                %session_id,
                max_bytes = self.max_session_bytes,
                "Upload session exceeded size limit, discarded"
            );
            return Err(UploadError::SessionTooLarge {
                session_id: session_id.to_string(),
                max: self.max_session_bytes,
            });
        }

        session.bytes = bytes;
        session.chunks.insert(index, data);
        tracing::debug!(%session_id, index, session_bytes = bytes, "Chunk received");
        Ok(())
    }

    /// Join a session's chunks into the payload text and forget the session
    ///
    /// # Errors
    ///
    /// Returns `UnknownSession`, `UnexpectedChunk` for indices at or beyond
    /// `total_chunks`, `MissingChunks` for gaps, or `InvalidUtf8`. Only
    /// `InvalidUtf8` and `UnexpectedChunk` discard the session; after
    /// `MissingChunks` the client may still send the gaps.
    pub fn complete(&self, session_id: &str, total_chunks: u32) -> UploadResult<AssembledUpload> {
        {
            let session = self
                .sessions
                .get(session_id)
                .ok_or_else(|| UploadError::UnknownSession {
                    session_id: session_id.to_string(),
                })?;

            let missing: Vec<u32> = (0..total_chunks)
                .filter(|index| !session.chunks.contains_key(index))
                .collect();
            if !missing.is_empty() {
                return Err(UploadError::MissingChunks {
                    session_id: session_id.to_string(),
                    missing,
                });
            }
        }

        let (_, session) =
            self.sessions
                .remove(session_id)
                .ok_or_else(|| UploadError::UnknownSession {
                    session_id: session_id.to_string(),
                })?;

        if let Some((&index, _)) = session.chunks.range(total_chunks..).next() {
            return Err(UploadError::UnexpectedChunk {
                index,
                total: total_chunks,
            });
        }

        let capacity = usize::try_from(session.bytes).unwrap_or(0);
        let mut joined = BytesMut::with_capacity(capacity);
        for chunk in session.chunks.values() {
            joined.extend_from_slice(chunk);
        }
        let content = String::from_utf8(joined.to_vec())
            .map_err(|e| UploadError::InvalidUtf8(e.to_string()))?;

        tracing::info!(
            %session_id,
            total_chunks,
            bytes = content.len(),
            "Upload session assembled"
        );
        Ok(AssembledUpload {
            session_id: session_id.to_string(),
            content,
            total_chunks,
        })
    }

    /// Drop a session; returns whether it existed
    pub fn abort(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions that received no chunk within the TTL; returns how many
    pub fn evict_expired(&self) -> usize {
        let before = self.sessions.len();
        let ttl = self.session_ttl;
        self.sessions
            .retain(|_, session| session.last_touched.elapsed() <= ttl);
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::info!(evicted, "Dropped abandoned upload sessions");
        }
        evicted
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_chunks_assemble_in_index_order() {
        let assembler = UploadAssembler::new(1024);
        assembler.accept_chunk("s", 2, Bytes::from_static(b"89")).unwrap();
        assembler.accept_chunk("s", 0, Bytes::from_static(b"0123")).unwrap();
        assembler.accept_chunk("s", 1, Bytes::from_static(b"4567")).unwrap();

        let assembled = assembler.complete("s", 3).unwrap();
        assert_eq!(assembled.content, "0123456789");
        assert_eq!(assembler.session_count(), 0);
    }

    #[test]
    fn test_gap_is_reported_and_session_kept() {
        let assembler = UploadAssembler::new(1024);
        assembler.accept_chunk("s", 0, Bytes::from_static(b"ab")).unwrap();
        assembler.accept_chunk("s", 2, Bytes::from_static(b"ef")).unwrap();

        match assembler.complete("s", 3) {
            Err(UploadError::MissingChunks { missing, .. }) => assert_eq!(missing, vec![1]),
            other => panic!("expected missing chunks, got {other:?}"),
        }

        assembler.accept_chunk("s", 1, Bytes::from_static(b"cd")).unwrap();
        assert_eq!(assembler.complete("s", 3).unwrap().content, "abcdef");
    }

    #[test]
    fn test_resent_chunk_replaces_previous_copy() {
        let assembler = UploadAssembler::new(6);
        assembler.accept_chunk("s", 0, Bytes::from_static(b"abc")).unwrap();
        assembler.accept_chunk("s", 0, Bytes::from_static(b"xyz")).unwrap();
        assembler.accept_chunk("s", 1, Bytes::from_static(b"123")).unwrap();

        assert_eq!(assembler.complete("s", 2).unwrap().content, "xyz123");
    }

    #[test]
    fn test_size_limit_discards_session() {
        let assembler = UploadAssembler::new(4);
        assembler.accept_chunk("s", 0, Bytes::from_static(b"abc")).unwrap();
        let result = assembler.accept_chunk("s", 1, Bytes::from_static(b"de"));

        assert!(matches!(result, Err(UploadError::SessionTooLarge { max: 4, .. })));
        assert!(matches!(
            assembler.complete("s", 2),
            Err(UploadError::UnknownSession { .. })
        ));
    }

    #[test]
    fn test_chunk_beyond_declared_total_is_rejected() {
        let assembler = UploadAssembler::new(1024);
        assembler.accept_chunk("s", 0, Bytes::from_static(b"a")).unwrap();
        assembler.accept_chunk("s", 5, Bytes::from_static(b"b")).unwrap();

        assert!(matches!(
            assembler.complete("s", 1),
            Err(UploadError::UnexpectedChunk { index: 5, total: 1 })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_rejected() {
        let assembler = UploadAssembler::new(1024);
        assembler.accept_chunk("s", 0, Bytes::from_static(&[0xff, 0xfe])).unwrap();
        assert!(matches!(
            assembler.complete("s", 1),
            Err(UploadError::InvalidUtf8(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_session_is_evicted_after_ttl() {
        let assembler = UploadAssembler::new(1024).with_session_limits(8, Duration::from_secs(60));
        assembler.accept_chunk("stale", 0, Bytes::from_static(b"half")).unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assembler.accept_chunk("live", 0, Bytes::from_static(b"one")).unwrap();
        assert_eq!(assembler.session_count(), 2);

        tokio::time::advance(Duration::from_secs(45)).await;
        assembler.accept_chunk("live", 1, Bytes::from_static(b"two")).unwrap();

        assert_eq!(assembler.session_count(), 1);
        assert!(matches!(
            assembler.complete("stale", 1),
            Err(UploadError::UnknownSession { .. })
        ));
        assert_eq!(assembler.complete("live", 2).unwrap().content, "onetwo");
    }

    #[test]
    fn test_open_session_limit() {
        let assembler = UploadAssembler::new(1024).with_session_limits(2, Duration::from_secs(60));
        assembler.accept_chunk("a", 0, Bytes::from_static(b"1")).unwrap();
        assembler.accept_chunk("b", 0, Bytes::from_static(b"2")).unwrap();

        assert!(matches!(
            assembler.accept_chunk("c", 0, Bytes::from_static(b"3")),
            Err(UploadError::TooManySessions { max: 2 })
        ));
        assembler.accept_chunk("a", 1, Bytes::from_static(b"1")).unwrap();

        assert!(assembler.abort("b"));
        assembler.accept_chunk("c", 0, Bytes::from_static(b"3")).unwrap();
        assert_eq!(assembler.session_count(), 2);
    }

    #[test]
    fn test_sessions_are_independent_and_abortable() {
        let assembler = UploadAssembler::new(1024);
        assembler.accept_chunk("a", 0, Bytes::from_static(b"one")).unwrap();
        assembler.accept_chunk("b", 0, Bytes::from_static(b"two")).unwrap();

        assert!(assembler.abort("a"));
        assert!(!assembler.abort("a"));
        assert_eq!(assembler.complete("b", 1).unwrap().content, "two");
    }
}
