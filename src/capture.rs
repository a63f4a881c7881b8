use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        OnceLock,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::CaptureError;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// A stream location plus the cookies needed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMedia {
    pub url: String,
    pub cookies: Vec<Cookie>,
}

#[derive(Debug, Clone)]
pub struct MediaPair {
    pub video: CapturedMedia,
    pub audio: CapturedMedia,
}

/// Recognises media stream requests among everything a page loads.
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    pub host: String,
    pub video_marker: String,
    pub audio_marker: String,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            host: "v3-web.douyinvod.com".to_string(),
            video_marker: "media-video-avc1".to_string(),
            audio_marker: "media-audio-und-mp4a".to_string(),
        }
    }
}

impl CaptureFilter {
    pub fn classify(&self, url: &str) -> Option<MediaKind> {
        if !url.contains(&self.host) {
            return None;
        }

        if url.contains(&self.video_marker) {
            Some(MediaKind::Video)
        } else if url.contains(&self.audio_marker) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

/// One write-once slot per media kind, filled by a request listener and
/// awaited by whoever starts the download.
#[derive(Debug, Default)]
pub struct CaptureSlots {
    filter: CaptureFilter,
    video: OnceLock<CapturedMedia>,
    audio: OnceLock<CapturedMedia>,
    closed: AtomicBool,
    changed: Notify,
}

impl CaptureSlots {
    pub fn new(filter: CaptureFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    fn slot(&self, kind: MediaKind) -> &OnceLock<CapturedMedia> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        }
    }

    /// Stores the media for `kind` unless it was already captured. Returns whether it was stored.
    pub fn record(&self, kind: MediaKind, media: CapturedMedia) -> bool {
        let stored = self.slot(kind).set(media).is_ok();
        if stored {
            self.changed.notify_waiters();
        }
        stored
    }

    /// Classifies a request seen by the listener and records it if it is a new stream.
    pub fn observe(&self, url: &str, cookies: &[Cookie]) -> Option<MediaKind> {
        let kind = self.filter.classify(url)?;
        let media = CapturedMedia {
            url: url.to_string(),
            cookies: cookies.to_vec(),
        };

        if self.record(kind, media) {
            info!(%kind, url = %url.chars().take(60).collect::<String>(), "captured stream request");
            Some(kind)
        } else {
            debug!(%kind, "stream already captured, ignoring");
            None
        }
    }

    /// Marks the listener as finished; pending waiters give up instead of timing out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.changed.notify_waiters();
    }

    fn missing(&self) -> Vec<MediaKind> {
        [MediaKind::Video, MediaKind::Audio]
            .into_iter()
            .filter(|kind| self.slot(*kind).get().is_none())
            .collect()
    }

    fn pair(&self) -> Option<MediaPair> {
        Some(MediaPair {
            video: self.video.get()?.clone(),
            audio: self.audio.get()?.clone(),
        })
    }

    /// Waits until both kinds are captured, the slots are closed, or `timeout` elapses.
    pub async fn wait_both(&self, timeout: Duration) -> Result<MediaPair, CaptureError> {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                tokio::pin!(changed);
                changed.as_mut().enable();

                if let Some(pair) = self.pair() {
                    return Ok(pair);
                }
                if self.closed.load(Ordering::Acquire) {
                    return Err(CaptureError::Closed {
                        missing: self.missing(),
                    });
                }

                changed.await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::Timeout {
                missing: self.missing(),
                timeout,
            }),
        }
    }
}
