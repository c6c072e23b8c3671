//! zvuk-dl command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use zvuk_dl::{Config, Error, QualityTier, ZvukDownloader, run_with_shutdown};

/// Exit code for configuration and credential setup failures
const EXIT_SETUP: u8 = 2;

/// Download tracks, releases, artists, playlists, selections, podcasts and audiobooks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Content URLs, e.g. https://zvuk.com/release/29015282
    #[arg(required_unless_present = "check_auth")]
    urls: Vec<String>,

    /// TOML configuration file
    #[arg(short, long, env = "ZVUK_CONFIG")]
    config: Option<PathBuf>,

    /// Netscape-format cookie file holding the auth token
    #[arg(long, env = "ZVUK_COOKIES")]
    cookies: Option<PathBuf>,

    /// Auth token, overriding the cookie file
    #[arg(long, env = "ZVUK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Concurrent downloads
    #[arg(long)]
    threads: Option<usize>,

    /// Output directory
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Quality: 1 = mp3 128, 2 = mp3 320, 3 = flac
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    format: Option<u8>,

    /// Ignore cached catalog responses
    #[arg(long)]
    no_cache: bool,

    /// Only verify the token and subscription
    #[arg(long)]
    check_auth: bool,
}

impl Cli {
    /// Layer command-line overrides on top of the file configuration
    fn into_config(self) -> zvuk_dl::Result<(Config, Vec<String>, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };
        if let Some(cookies) = self.cookies {
            config.session.cookie_file = cookies;
        }
        if self.token.is_some() {
            config.session.token = self.token;
        }
        if let Some(threads) = self.threads {
            config.download.concurrency = threads;
        }
        if let Some(output) = self.output_path {
            config.download.output_dir = output;
        }
        if let Some(quality) = self.format.and_then(QualityTier::from_format_flag) {
            config.download.quality = quality;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        config.validate()?;
        Ok((config, self.urls, self.check_auth))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, urls, check_auth) = match Cli::parse().into_config() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };

    let downloader = match ZvukDownloader::new(config).await {
        Ok(downloader) => downloader,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };

    if check_auth {
        let code = match downloader.check_auth().await {
            Ok(true) => {
                println!("[OK] Authentication succeeded, subscription active");
                ExitCode::SUCCESS
            }
            Ok(false) => {
                println!("[WARN] Authentication succeeded, but the subscription is not active");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("[ERROR] {}", e);
                ExitCode::from(EXIT_SETUP)
            }
        };
        downloader.shutdown().await;
        return code;
    }

    match run_with_shutdown(&downloader, &urls).await {
        Ok(report) => {
            for line in report.summary_lines() {
                println!("{}", line);
            }
            if report.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e @ Error::AuthExpired { .. }) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::from(EXIT_SETUP)
        }
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "zvuk-dl",
            "--threads",
            "2",
            "--format",
            "2",
            "--output-path",
            "/tmp/music",
            "--no-cache",
            "https://zvuk.com/track/1",
        ])
        .unwrap_or_else(|e| panic!("{}", e));
        let (config, urls, check_auth) = cli.into_config().unwrap_or_else(|e| panic!("{}", e));
        assert_eq!(config.download.concurrency, 2);
        assert_eq!(config.download.quality, QualityTier::CompressedHigh);
        assert_eq!(config.download.output_dir, PathBuf::from("/tmp/music"));
        assert!(!config.cache.enabled);
        assert_eq!(urls, vec!["https://zvuk.com/track/1"]);
        assert!(!check_auth);
    }

    #[test]
    fn test_format_out_of_range_rejected() {
        assert!(Cli::try_parse_from(["zvuk-dl", "--format", "4", "x"]).is_err());
        assert!(Cli::try_parse_from(["zvuk-dl", "--check-auth"]).is_ok());
        assert!(Cli::try_parse_from(["zvuk-dl"]).is_err());
    }
}
