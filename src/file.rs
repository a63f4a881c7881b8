use std::{path::Path, sync::Arc};

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    capture::{CaptureSlots, Cookie, MediaPair},
    download,
    error::CaptureError,
    merge::Merger,
    options::Options,
};

/// One browsing session as recorded by the page automation: every request
/// the page issued plus the cookies it held.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CapturedSession {
    output: String,
    requests: Vec<String>,
    #[serde(default)]
    cookies: Vec<Cookie>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Replays the request log into fresh capture slots, the way a live request
/// listener would, and waits for both streams.
async fn replay_capture(session: &CapturedSession, options: &Options) -> Result<MediaPair, CaptureError> {
    let slots = Arc::new(CaptureSlots::new(options.capture_filter.clone()));

    let listener = {
        let slots = Arc::clone(&slots);
        let requests = session.requests.clone();
        let cookies = session.cookies.clone();
        tokio::spawn(async move {
            for url in &requests {
                slots.observe(url, &cookies);
            }
            slots.close();
        })
    };

    let pair = slots.wait_both(options.capture_timeout).await;
    listener.abort();

    pair
}

pub async fn download_file(
    file: &str,
    options: &Options,
    merger: &dyn Merger,
) -> Result<BatchSummary, Box<dyn std::error::Error>> {
    let reader = match std::fs::File::open(file) {
        Ok(file) => std::io::BufReader::new(file),
        Err(err) => return Err(format!("could not open {file}: {err}").into()),
    };
    let sessions: Vec<CapturedSession> = match serde_json::from_reader(reader) {
        Ok(sessions) => sessions,
        Err(err) => return Err(format!("could not parse {file}: {err}").into()),
    };

    let mut summary = BatchSummary::default();

    for session in sessions {
        let output = Path::new(&session.output);

        if output.exists() {
            info!(output = %session.output, "file already exists, skipping download");
            summary.skipped += 1;
            continue;
        }

        let pair = match replay_capture(&session, options).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(output = %session.output, error = %err, "no complete media capture");
                summary.failed += 1;
                continue;
            }
        };

        match download::download(&pair, output, options, merger).await {
            Ok(path) => {
                info!(output = %path.display(), "finished");
                summary.completed += 1;
            }
            Err(err) => {
                error!(output = %session.output, error = %err, "download failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
