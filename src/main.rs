mod capture;
mod download;
mod error;
mod file;
mod merge;
mod options;

use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use capture::{CapturedMedia, Cookie, MediaPair};
use merge::Ffmpeg;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(subcommand)]
    subcmd: SubCmd,

    #[clap(short, long, default_value = "4")]
    /// set the maximum number of parallel chunk downloads
    parallel: NonZeroUsize,

    #[clap(short, long, default_value = "3")]
    /// set the number of retries per chunk after the first attempt
    retries: u32,

    #[clap(short, long, default_value = "10")]
    /// set the block size in mega bytes
    block_size: NonZeroU64,

    #[clap(short, long, default_value = "30")]
    /// set the timeout of a single chunk request in seconds
    timeout: NonZeroU64,

    #[clap(long, default_value = options::DEFAULT_REFERER)]
    /// set the referer sent with every request
    referer: String,

    #[clap(long, default_value = "ffmpeg")]
    /// set the ffmpeg binary used to merge video and audio
    ffmpeg: PathBuf,
}

#[derive(Subcommand, Debug)]
#[command(version, about)]
enum SubCmd {
    /// Download every captured session listed in a json file
    File {
        #[clap(default_value = "download.json")]
        /// provide a json file with the captured requests and cookies
        file: String,
    },
    /// Download a video stream and an audio stream and merge them
    Download {
        #[clap(long, value_parser = url_parser)]
        /// provide the video stream link
        video: String,

        #[clap(long, value_parser = url_parser)]
        /// provide the audio stream link
        audio: String,

        /// provide a output file name
        output: String,

        #[clap(short, long = "cookie", value_parser = cookie_parser)]
        /// cookie to replay, as name=value (repeatable)
        cookies: Vec<Cookie>,
    },
}

fn url_parser(url: &str) -> Result<String, String> {
    if url.starts_with("http") {
        Ok(url.to_string())
    } else {
        Err("URL must start with http or https".to_string())
    }
}

fn cookie_parser(cookie: &str) -> Result<Cookie, String> {
    match cookie.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok(Cookie::new(name.trim(), value)),
        _ => Err("cookie must look like name=value".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let options = options::Options {
        chunk_size: options::Options::chunk_size_from_mib(args.block_size),
        max_workers: args.parallel,
        retries_per_chunk: args.retries,
        per_attempt_timeout: Duration::from_secs(args.timeout.get()),
        referer: args.referer,
        ..options::Options::default()
    };

    info!(?options, "options");

    let merger = Ffmpeg::with_program(args.ffmpeg);

    match args.subcmd {
        SubCmd::File { file } => {
            let summary = file::download_file(&file, &options, &merger).await?;
            info!(
                file = %file,
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                "finished reading file"
            );
        }
        SubCmd::Download { video, audio, output, cookies } => {
            let pair = MediaPair {
                video: CapturedMedia { url: video, cookies: cookies.clone() },
                audio: CapturedMedia { url: audio, cookies },
            };

            let path = download::download(&pair, Path::new(&output), &options, &merger).await?;
            info!(output = %path.display(), "finished downloading");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_options() {
        let args = Args::parse_from(["segdl", "file"]);
        assert_eq!(args.parallel.get(), 4);
        assert_eq!(args.retries, 3);
        assert_eq!(args.block_size.get(), 10);
        assert_eq!(args.timeout.get(), 30);
        assert_eq!(args.referer, options::DEFAULT_REFERER);
        assert_eq!(args.ffmpeg, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn download_subcommand_collects_cookies() {
        let args = Args::parse_from([
            "segdl",
            "--parallel",
            "8",
            "download",
            "--video",
            "https://example.com/v",
            "--audio",
            "https://example.com/a",
            "out.mp4",
            "-c",
            "sid=1",
            "--cookie",
            "token=a=b",
        ]);

        assert_eq!(args.parallel.get(), 8);
        match args.subcmd {
            SubCmd::Download { cookies, output, .. } => {
                assert_eq!(output, "out.mp4");
                assert_eq!(cookies, vec![Cookie::new("sid", "1"), Cookie::new("token", "a=b")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        assert!(Args::try_parse_from(["segdl", "--parallel", "0", "file"]).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Args::try_parse_from(["segdl", "--timeout", "0", "file"]).is_err());
        let args = Args::parse_from(["segdl", "--timeout", "5", "--ffmpeg", "/opt/ffmpeg", "file"]);
        assert_eq!(args.timeout.get(), 5);
        assert_eq!(args.ffmpeg, PathBuf::from("/opt/ffmpeg"));
    }

    #[test]
    fn cookie_parser_requires_a_name() {
        assert!(cookie_parser("=value").is_err());
        assert!(cookie_parser("novalue").is_err());
        assert_eq!(cookie_parser("a=").unwrap(), Cookie::new("a", ""));
    }
}
