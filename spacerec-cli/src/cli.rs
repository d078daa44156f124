use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use spacerec_engine::{
    CredentialOptions, ProxyAuth, ProxyConfig, ProxyType, RecorderConfig, VariantPolicy,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory captured audio is written to
    #[arg(short = 'o', long, env = "SPACEREC_MEDIA_DIR", default_value = "media")]
    pub media_dir: PathBuf,

    /// Directory under the media directory
    #[arg(long, global = true)]
    pub sub_dir: Option<String>,

    /// Primary auth token (the `auth_token` cookie)
    #[arg(long, env = "SPACEREC_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// CSRF token (the `ct0` cookie)
    #[arg(long, env = "SPACEREC_CSRF_TOKEN", hide_env_values = true)]
    pub csrf_token: Option<String>,

    /// JSON file holding `authToken` / `csrfToken`, reloaded when it changes
    #[arg(long, env = "SPACEREC_TOKENS_FILE")]
    pub tokens_file: Option<PathBuf>,

    /// Proxy server URL
    #[arg(long)]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value_t = ProxyType::Http, requires = "proxy")]
    pub proxy_type: ProxyType,

    #[arg(long, requires = "proxy_password")]
    pub proxy_username: Option<String>,

    #[arg(long, requires = "proxy_username")]
    pub proxy_password: Option<String>,

    /// Chunk downloads in flight per capture
    #[arg(short = 'c', long, default_value_t = 4)]
    pub concurrency: usize,

    /// Retries per chunk before a capture fails
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Pick the lowest bitrate variant instead of the highest
    #[arg(long)]
    pub lowest_bitrate: bool,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, env = "SPACEREC_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch spaces until they go live, then record them
    Watch {
        /// Space URLs or IDs
        #[arg(required = true)]
        targets: Vec<String>,

        /// Seconds between polls while a space is scheduled
        #[arg(long, default_value_t = 30)]
        poll_interval: u64,

        /// Do not record spaces that have already ended
        #[arg(long)]
        no_replays: bool,
    },
    /// Record a playlist URL directly
    Capture {
        /// Master or media playlist URL
        playlist_url: String,

        /// Output file name without extension
        #[arg(short, long)]
        filename: Option<String>,

        /// Attach credentials to playlist and chunk requests
        #[arg(long)]
        with_credentials: bool,
    },
}

impl Args {
    pub fn recorder_config(&self) -> RecorderConfig {
        let mut config = RecorderConfig {
            media_root: self.media_dir.clone(),
            credentials: CredentialOptions {
                primary: self.auth_token.clone(),
                secondary: self.csrf_token.clone(),
                file: self.tokens_file.clone(),
                env_fallback: true,
                ..Default::default()
            },
            ..Default::default()
        };

        config.http.proxy = self.proxy.clone().map(|url| ProxyConfig {
            url,
            proxy_type: self.proxy_type,
            auth: self
                .proxy_username
                .clone()
                .zip(self.proxy_password.clone())
                .map(|(username, password)| ProxyAuth { username, password }),
        });

        config.capture.concurrency = self.concurrency;
        config.capture.retry.max_retries = self.max_retries;
        if self.lowest_bitrate {
            config.capture.variant_policy = VariantPolicy::LowestBitrate;
        }

        match &self.command {
            Command::Watch {
                poll_interval,
                no_replays,
                ..
            } => {
                config.watcher.scheduled_interval = Duration::from_secs((*poll_interval).max(1));
                config.watcher.capture_replays = !no_replays;
            }
            Command::Capture {
                with_credentials, ..
            } => {
                config.capture.send_credentials = *with_credentials;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_args_map_to_config() {
        let args = Args::try_parse_from([
            "spacerec",
            "--media-dir",
            "/tmp/spaces",
            "--auth-token",
            "a",
            "--proxy",
            "socks5://127.0.0.1:1080",
            "--proxy-type",
            "socks5",
            "-c",
            "8",
            "watch",
            "--poll-interval",
            "10",
            "--no-replays",
            "https://x.com/i/spaces/1OyKAjPPAPbGb",
        ])
        .unwrap();

        let config = args.recorder_config();
        assert_eq!(config.media_root, PathBuf::from("/tmp/spaces"));
        assert_eq!(config.credentials.primary.as_deref(), Some("a"));
        assert_eq!(config.capture.concurrency, 8);
        assert_eq!(config.watcher.scheduled_interval, Duration::from_secs(10));
        assert!(!config.watcher.capture_replays);
        let proxy = config.http.proxy.unwrap();
        assert_eq!(proxy.proxy_type, ProxyType::Socks5);
        assert!(proxy.auth.is_none());
    }

    #[test]
    fn capture_args() {
        let args = Args::try_parse_from([
            "spacerec",
            "capture",
            "https://cdn.example.com/playlist.m3u8",
            "-f",
            "room",
            "--with-credentials",
        ])
        .unwrap();

        let Command::Capture { filename, .. } = &args.command else {
            panic!("expected capture command");
        };
        assert_eq!(filename.as_deref(), Some("room"));
        assert!(args.recorder_config().capture.send_credentials);
    }

    #[test]
    fn watch_requires_targets() {
        assert!(Args::try_parse_from(["spacerec", "watch"]).is_err());
    }
}
