use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::LimitBreach;
use crate::{Limit, MultipartError, MultipartResult};

/// Stream of bytes for a part's content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Lifecycle of a part's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyState {
    /// Nobody has touched the stream yet
    Unread,
    /// The stream was handed out to a reader
    Taken,
    /// Read to end by a writer or buffer
    Consumed,
    /// Ended without keeping the bytes
    Drained,
    /// Dropped mid-stream after a failure
    Destroyed,
}

impl BodyState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BodyState::Unread,
            1 => BodyState::Taken,
            2 => BodyState::Consumed,
            3 => BodyState::Drained,
            _ => BodyState::Destroyed,
        }
    }

    /// Whether the source may safely advance past this part.
    pub fn is_settled(&self) -> bool {
        matches!(self, BodyState::Consumed | BodyState::Drained | BodyState::Destroyed)
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    state: AtomicU8,
    end_signals: AtomicUsize,
}

/// Shared view on a body's lifecycle.
///
/// The router keeps one for the part it pulled last so it can refuse to
/// advance the source while that part is still unsettled.
#[derive(Debug, Clone, Default)]
pub struct BodyTracker {
    inner: Arc<TrackerInner>,
}

impl BodyTracker {
    pub fn state(&self) -> BodyState {
        BodyState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Number of explicit end signals (drains) this body received.
    pub fn end_signals(&self) -> usize {
        self.inner.end_signals.load(Ordering::Acquire)
    }

    fn set(&self, state: BodyState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }
}

/// Single-consumer byte stream of one multipart part.
///
/// A body is read exactly once: either taken by a reader (and then marked
/// consumed once it hit end of stream), drained, or destroyed.
pub struct PartBody {
    stream: Option<ByteStream>,
    tracker: BodyTracker,
    size_limit: Option<u64>,
}

impl PartBody {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream: Some(stream),
            tracker: BodyTracker::default(),
            size_limit: None,
        }
    }

    /// Fail reads once more than `max` bytes came through.
    pub fn with_size_limit(mut self, max: Option<u64>) -> Self {
        self.set_size_limit(max);
        self
    }

    pub fn set_size_limit(&mut self, max: Option<u64>) {
        self.size_limit = max;
    }

    /// In-memory body, replayable by whoever ends up owning it.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let stream = futures_util::stream::once(async move { Ok::<_, std::io::Error>(bytes) });
        Self::new(Box::pin(stream))
    }

    pub fn empty() -> Self {
        Self::new(Box::pin(futures_util::stream::empty::<Result<Bytes, std::io::Error>>()))
    }

    pub fn tracker(&self) -> BodyTracker {
        self.tracker.clone()
    }

    pub fn state(&self) -> BodyState {
        self.tracker.state()
    }

    /// Hand the raw stream to a reader. The reader must call
    /// [`PartBody::mark_consumed`] or [`PartBody::destroy`] when done.
    pub fn take_stream(&mut self, field: &str) -> MultipartResult<ByteStream> {
        let stream = self.stream.take().ok_or_else(|| MultipartError::BodyConsumed {
            field: field.to_string(),
        })?;
        self.tracker.set(BodyState::Taken);
        match self.size_limit {
            Some(max) => Ok(limit_stream(stream, max)),
            None => Ok(stream),
        }
    }

    pub fn mark_consumed(&self) {
        self.tracker.set(BodyState::Consumed);
    }

    /// Read the whole body into memory.
    pub async fn read_to_bytes(&mut self, field: &str) -> MultipartResult<Bytes> {
        let mut stream = self.take_stream(field)?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => buf.extend_from_slice(&chunk),
                Err(e) => {
                    self.tracker.set(BodyState::Destroyed);
                    return Err(MultipartError::from_io(field, e));
                }
            }
        }
        self.mark_consumed();
        Ok(buf.freeze())
    }

    /// End the stream without keeping its bytes.
    ///
    /// Draining an already settled body is a no-op, so a body never
    /// receives more than one end signal.
    pub async fn drain(&mut self, field: &str) -> MultipartResult<u64> {
        if self.tracker.state().is_settled() {
            return Ok(0);
        }
        let mut stream = self.take_stream(field)?;
        let mut discarded = 0u64;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => discarded += chunk.len() as u64,
                Err(e) => {
                    self.tracker.set(BodyState::Destroyed);
                    return Err(MultipartError::from_io(field, e));
                }
            }
        }
        self.tracker.inner.end_signals.fetch_add(1, Ordering::AcqRel);
        self.tracker.set(BodyState::Drained);
        Ok(discarded)
    }

    /// Drop the stream without reading it further.
    pub fn destroy(&mut self) {
        if self.tracker.state().is_settled() {
            return;
        }
        self.stream = None;
        self.tracker.set(BodyState::Destroyed);
    }
}

fn limit_stream(stream: ByteStream, max: u64) -> ByteStream {
    let mut seen = 0u64;
    Box::pin(stream.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > max {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                LimitBreach {
                    limit: Limit::FileSize,
                    max,
                },
            ));
        }
        Ok(chunk)
    }))
}

impl std::fmt::Debug for PartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartBody")
            .field("state", &self.state())
            .finish()
    }
}

/// Headers of a file part, as recorded in the sibling snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeaders {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
}

/// One value recorded under a field name in the sibling snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldEntry {
    File(FileHeaders),
    Text { value: String },
}

struct FieldNode {
    name: String,
    entry: FieldEntry,
    prev: Option<Arc<FieldNode>>,
}

impl Drop for FieldNode {
    // Unlink iteratively so a long chain does not recurse on drop.
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// Cumulative, read-only view of every field the source produced so far
/// in the current request, in arrival order.
///
/// Snapshots of one request share a single append-only chain of entries.
/// Recording links a new entry in front of the current head, so a snapshot
/// handed out earlier keeps seeing exactly what it saw and cloning one is
/// a pointer copy.
#[derive(Clone, Default)]
pub struct FieldsSnapshot {
    head: Option<Arc<FieldNode>>,
    len: usize,
}

impl FieldsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn latest_first(&self) -> impl Iterator<Item = (&str, &FieldEntry)> + '_ {
        std::iter::successors(self.head.as_deref(), |node| node.prev.as_deref())
            .map(|node| (node.name.as_str(), &node.entry))
    }

    /// Every recorded entry, in arrival order.
    pub fn entries(&self) -> Vec<(&str, &FieldEntry)> {
        let mut entries: Vec<_> = self.latest_first().collect();
        entries.reverse();
        entries
    }

    /// Values recorded under `name`, in arrival order.
    pub fn values(&self, name: &str) -> Vec<&FieldEntry> {
        let mut values: Vec<_> = self
            .latest_first()
            .filter(|(key, _)| *key == name)
            .map(|(_, entry)| entry)
            .collect();
        values.reverse();
        values
    }

    pub fn contains(&self, name: &str) -> bool {
        self.latest_first().any(|(key, _)| key == name)
    }

    /// Number of file parts declared under `name` so far.
    pub fn file_count(&self, name: &str) -> usize {
        self.latest_first()
            .filter(|(key, entry)| *key == name && matches!(entry, FieldEntry::File(_)))
            .count()
    }

    /// Value of a non-file field, first occurrence.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.latest_first()
            .filter_map(|(key, entry)| match entry {
                FieldEntry::Text { value } if key == name => Some(value.as_str()),
                _ => None,
            })
            .last()
    }

    /// Distinct field names, in order of first appearance.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in self.entries() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.into_iter()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Sources only; the router never mutates a snapshot it was handed.
    pub(crate) fn record(&mut self, name: &str, entry: FieldEntry) {
        let node = FieldNode {
            name: name.to_string(),
            entry,
            prev: self.head.take(),
        };
        self.head = Some(Arc::new(node));
        self.len += 1;
    }
}

impl Serialize for FieldsSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<&str> = self.names().collect();
        let mut map = serializer.serialize_map(Some(names.len()))?;
        for name in names {
            map.serialize_entry(name, &self.values(name))?;
        }
        map.end()
    }
}

impl std::fmt::Debug for FieldsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.names().map(|name| (name, self.values(name))))
            .finish()
    }
}

/// One file part yielded by a [`PartSource`](crate::PartSource).
#[derive(Debug)]
pub struct MultipartPart {
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    pub body: PartBody,
    /// Fields seen so far in this request, this part included.
    pub fields: FieldsSnapshot,
}

impl MultipartPart {
    pub fn new<F, N, C>(field_name: F, file_name: N, content_type: C, body: PartBody) -> Self
    where
        F: Into<String>,
        N: Into<String>,
        C: Into<String>,
    {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            body,
            fields: FieldsSnapshot::new(),
        }
    }

    pub fn with_fields(mut self, fields: FieldsSnapshot) -> Self {
        self.fields = fields;
        self
    }

    pub fn headers(&self) -> FileHeaders {
        FileHeaders {
            field_name: self.field_name.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
        }
    }

    /// End this part's stream without keeping its bytes.
    pub async fn drain(&mut self) -> MultipartResult<u64> {
        let field = self.field_name.clone();
        self.body.drain(&field).await
    }

    /// Buffer the stream into memory so the source can advance, keeping an
    /// unread copy attached for the caller.
    pub async fn into_memory(mut self) -> MultipartResult<MultipartPart> {
        let field = self.field_name.clone();
        let bytes = self.body.read_to_bytes(&field).await?;
        Ok(MultipartPart {
            body: PartBody::from_bytes(bytes),
            ..self
        })
    }
}
