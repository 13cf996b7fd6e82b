//! Turns a file into an inline `data:` URL, reporting read progress.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::Stream;
use futures::stream;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::common::MessageKind;

use super::error::MediaError;

const CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file selected for upload.
pub struct MediaFile {
    pub name: String,
    /// Declared content type; classification trusts it as-is.
    pub content_type: String,
    /// Total size when known. Without it no progress is reported.
    pub size: Option<u64>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl MediaFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            content_type: content_type_for(&name).to_string(),
            name,
            size: Some(size),
            reader: Box::new(file),
        })
    }

    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let size = bytes.len() as u64;
        Self::from_reader(name, content_type, Some(size), Cursor::new(bytes))
    }

    pub fn from_reader(
        name: impl Into<String>,
        content_type: impl Into<String>,
        size: Option<u64>,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size,
            reader: Box::new(reader),
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::for_content_type(&self.content_type)
    }
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Result of a finished encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMedia {
    pub kind: MessageKind,
    pub data_url: String,
}

#[derive(Debug)]
pub enum EncodeEvent {
    /// Percentage read so far, 0..=100, never decreasing.
    Progress(u8),
    Finished(EncodedMedia),
    Failed(MediaError),
}

impl EncodeEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EncodeEvent::Progress(_))
    }
}

enum Phase {
    Reading,
    Finishing(EncodedMedia),
    Done,
}

struct EncodeState {
    file: MediaFile,
    buffer: Vec<u8>,
    loaded: u64,
    last_percent: Option<u8>,
    phase: Phase,
}

/// Lazily reads `file`, yielding progress events and then exactly one
/// terminal event. Nothing is read until the stream is polled.
pub fn encode(file: MediaFile) -> impl Stream<Item = EncodeEvent> + Send {
    let state = EncodeState {
        buffer: Vec::with_capacity(file.size.unwrap_or(0).min(64 << 20) as usize),
        file,
        loaded: 0,
        last_percent: None,
        phase: Phase::Reading,
    };
    stream::unfold(state, |mut state| async move {
        let event = state.advance().await?;
        Some((event, state))
    })
}

impl EncodeState {
    async fn advance(&mut self) -> Option<EncodeEvent> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Done => None,
            Phase::Finishing(media) => Some(EncodeEvent::Finished(media)),
            Phase::Reading => {
                let event = self.read_until_event().await;
                if !event.is_terminal() && matches!(self.phase, Phase::Done) {
                    self.phase = Phase::Reading;
                }
                Some(event)
            }
        }
    }

    async fn read_until_event(&mut self) -> EncodeEvent {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let read = match self.file.reader.read(&mut chunk).await {
                Ok(read) => read,
                Err(err) => return EncodeEvent::Failed(err.into()),
            };

            if read == 0 {
                return self.finish();
            }

            self.buffer.extend_from_slice(&chunk[..read]);
            self.loaded += read as u64;
            if let Some(event) = self.progress() {
                return event;
            }
        }
    }

    fn progress(&mut self) -> Option<EncodeEvent> {
        let total = self.file.size?;
        let percent = percent(self.loaded, total);
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);
        Some(EncodeEvent::Progress(percent))
    }

    fn finish(&mut self) -> EncodeEvent {
        if let Some(expected) = self.file.size {
            if self.loaded < expected {
                return EncodeEvent::Failed(MediaError::Truncated {
                    read: self.loaded,
                    expected,
                });
            }
        }

        let content_type = if self.file.content_type.is_empty() {
            FALLBACK_CONTENT_TYPE
        } else {
            self.file.content_type.as_str()
        };
        let media = EncodedMedia {
            kind: self.file.kind(),
            data_url: format!(
                "data:{content_type};base64,{}",
                STANDARD.encode(&self.buffer)
            ),
        };
        self.buffer = Vec::new();

        // An empty file with a known size still reports completion.
        if self.file.size.is_some() && self.last_percent != Some(100) {
            self.last_percent = Some(100);
            self.phase = Phase::Finishing(media);
            return EncodeEvent::Progress(100);
        }
        EncodeEvent::Finished(media)
    }
}

/// `round(loaded / total * 100)`, capped at 100.
fn percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let ratio = (loaded as f64 / total as f64) * 100.0;
    ratio.round().min(100.0) as u8
}

/// Extensions [`content_type_for`] classifies as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "bmp", "ico"];
/// Extensions [`content_type_for`] classifies as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "ogg", "ogv", "mov", "mkv", "avi"];

/// Declared content type from a file extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        // Images
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        // Video
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogg" | "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures::StreamExt;
    use tokio::io::ReadBuf;

    use super::*;

    async fn collect(file: MediaFile) -> Vec<EncodeEvent> {
        encode(file).collect().await
    }

    fn progress_values(events: &[EncodeEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                EncodeEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let bytes = vec![7u8; 2 * 1024 * 1024];
        let events = collect(MediaFile::from_bytes("cat.png", "image/png", bytes.clone())).await;

        let progress = progress_values(&events);
        assert!(progress.len() > 1);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));

        let Some(EncodeEvent::Finished(media)) = events.last() else {
            panic!("expected terminal success, got {events:?}");
        };
        assert_eq!(media.kind, MessageKind::Image);
        assert_eq!(
            media.data_url,
            format!("data:image/png;base64,{}", STANDARD.encode(&bytes))
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn unknown_size_reports_no_progress() {
        let reader = Cursor::new(b"frames".to_vec());
        let events = collect(MediaFile::from_reader("clip", "video/mp4", None, reader)).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            EncodeEvent::Finished(EncodedMedia { kind: MessageKind::Video, .. })
        ));
    }

    #[tokio::test]
    async fn empty_file_completes_at_100() {
        let events = collect(MediaFile::from_bytes("empty.gif", "image/gif", Vec::new())).await;
        assert_eq!(progress_values(&events), vec![100]);
        assert!(matches!(events.last(), Some(EncodeEvent::Finished(_))));
    }

    #[tokio::test]
    async fn short_read_is_a_failure() {
        let reader = Cursor::new(vec![1u8; 10]);
        let events =
            collect(MediaFile::from_reader("movie.mp4", "video/mp4", Some(20), reader)).await;

        assert!(matches!(
            events.last(),
            Some(EncodeEvent::Failed(MediaError::Truncated { read: 10, expected: 20 }))
        ));
        assert!(!events.iter().any(|e| matches!(e, EncodeEvent::Finished(_))));
    }

    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn read_error_terminates_the_stream() {
        let events =
            collect(MediaFile::from_reader("a.png", "image/png", Some(5), BrokenReader)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EncodeEvent::Failed(MediaError::Io(_))));
    }

    #[test]
    fn percent_rounds_like_the_browser() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(1, 200), 1);
        assert_eq!(percent(1, 400), 0);
        assert_eq!(percent(50, 100), 50);
        assert_eq!(percent(150, 100), 100);
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("clip.webm"), "video/webm");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }

    #[tokio::test]
    async fn open_reads_size_and_type_from_disk() {
        let path = std::env::temp_dir().join(format!("peer_chat_media_{}.png", std::process::id()));
        tokio::fs::write(&path, vec![0u8; 1000]).await.unwrap();

        let file = MediaFile::open(&path).await.unwrap();
        assert_eq!(file.size, Some(1000));
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.kind(), MessageKind::Image);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn picker_extensions_match_declared_types() {
        for ext in IMAGE_EXTENSIONS {
            assert!(content_type_for(&format!("a.{ext}")).starts_with("image/"), "{ext}");
        }
        for ext in VIDEO_EXTENSIONS {
            assert!(content_type_for(&format!("a.{ext}")).starts_with("video/"), "{ext}");
        }
    }
}
