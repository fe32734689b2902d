//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use esa_export::api::{
    DEFAULT_MAX_RATE_LIMIT_ATTEMPTS, DEFAULT_MAX_TRANSIENT_ATTEMPTS, READ_TIMEOUT_SECS, SortKey,
    SortOrder,
};
use esa_export::config::{DEFAULT_REQUEST_INTERVAL_MS, ExportConfig};
use esa_export::images::DEFAULT_IMAGE_CONCURRENCY;
use esa_export::pipeline::DEFAULT_OUTPUT_DIR;
use esa_export::{AccessToken, TOKEN_ENV_VAR};

/// Export esa.io posts and their images into a local file tree.
///
/// Posts are written as `{category}/{number}_{title}.md` with YAML front
/// matter; embedded images are downloaded next to them and relinked.
#[derive(Parser, Debug)]
#[command(name = "esa-export")]
#[command(author, version, about)]
pub struct Args {
    /// Team name (the subdomain of <team>.esa.io)
    #[arg(short, long)]
    pub team: String,

    /// esa search query, e.g. "in:dev/specs tag:api" (empty exports everything)
    #[arg(short, long, default_value = "")]
    pub query: String,

    /// Output directory
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// List the files that would be written without fetching bodies or writing
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of posts to export
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Store images in an `images/` directory next to each post
    #[arg(long)]
    pub images_dir: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long)]
    pub quiet: bool,

    /// Search results per page (1-100)
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub per_page: u8,

    /// Sort key: updated, created, number, stars, watches, comments, best_match
    #[arg(long, default_value = "updated")]
    pub sort: SortKey,

    /// Sort order: asc or desc
    #[arg(long, default_value = "desc")]
    pub order: SortOrder,

    /// API access token
    #[arg(long, env = TOKEN_ENV_VAR, hide_env_values = true)]
    pub token: Option<String>,

    /// API base URL
    #[arg(long, default_value = esa_export::api::DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Image host to download from (repeatable; replaces the defaults)
    #[arg(long = "asset-host", value_name = "HOST")]
    pub asset_hosts: Vec<String>,

    /// Concurrent image downloads per post (1-32)
    #[arg(long, default_value_t = DEFAULT_IMAGE_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub image_concurrency: u8,

    /// Attempts for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_TRANSIENT_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Attempts for rate-limited (429) responses (1-10)
    #[arg(long, default_value_t = DEFAULT_MAX_RATE_LIMIT_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub rate_limit_retries: u8,

    /// Minimum delay between requests to the same host in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = DEFAULT_REQUEST_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub request_interval: u64,

    /// Network timeout per request in seconds (1-3600)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,
}

impl Args {
    /// Converts parsed arguments into a run configuration (not yet validated).
    pub fn to_config(&self) -> ExportConfig {
        let token = AccessToken::new(self.token.clone().unwrap_or_default());
        let mut config = ExportConfig::new(self.team.trim(), token);
        config.api_base_url.clone_from(&self.api_base_url);
        config.output_root.clone_from(&self.output);
        config.query.clone_from(&self.query);
        config.per_page = self.per_page;
        config.sort = self.sort;
        config.order = self.order;
        config.limit = self.limit.map(|n| usize::try_from(n).unwrap_or(usize::MAX));
        config.dry_run = self.dry_run;
        config.use_images_subdir = self.images_dir;
        config.image_concurrency = usize::from(self.image_concurrency);
        if !self.asset_hosts.is_empty() {
            config.asset_hosts.clone_from(&self.asset_hosts);
        }
        config.timeout_secs = self.timeout;
        config.max_retries = u32::from(self.max_retries);
        config.rate_limit_retries = u32::from(self.rate_limit_retries);
        config.request_interval_ms = self.request_interval;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec!["esa-export", "--token", "tkn", "-t", "docs"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.team, "docs");
        assert_eq!(args.query, "");
        assert_eq!(args.output, PathBuf::from("./esa_posts"));
        assert!(!args.dry_run);
        assert_eq!(args.limit, None);
        assert_eq!(args.per_page, 100);
        assert_eq!(args.sort, SortKey::Updated);
        assert_eq!(args.order, SortOrder::Desc);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.rate_limit_retries, 5);
        assert_eq!(args.request_interval, 500);
    }

    #[test]
    fn test_cli_team_is_required() {
        let err = Args::try_parse_from(["esa-export", "--token", "t"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        assert_eq!(parse(&["-v"]).unwrap().verbose, 1);
        assert_eq!(parse(&["-vv"]).unwrap().verbose, 2);
        assert_eq!(parse(&["--verbose", "--verbose"]).unwrap().verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        assert!(parse(&["--quiet"]).unwrap().quiet);
        assert!(!parse(&["-q", "x"]).unwrap().quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["esa-export", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["esa-export", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = parse(&["--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_query_and_output() {
        let args = parse(&["-q", "in:dev tag:api", "-o", "/tmp/out"]).unwrap();
        assert_eq!(args.query, "in:dev tag:api");
        assert_eq!(args.output, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_cli_sort_and_order_parse() {
        let args = parse(&["--sort", "best_match", "--order", "asc"]).unwrap();
        assert_eq!(args.sort, SortKey::BestMatch);
        assert_eq!(args.order, SortOrder::Asc);
    }

    #[test]
    fn test_cli_unknown_sort_rejected() {
        let err = parse(&["--sort", "random"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_per_page_range() {
        assert_eq!(parse(&["--per-page", "1"]).unwrap().per_page, 1);
        assert_eq!(
            parse(&["--per-page", "0"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
        assert_eq!(
            parse(&["--per-page", "101"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_limit_zero_rejected() {
        assert_eq!(
            parse(&["--limit", "0"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
        assert_eq!(parse(&["--limit", "25"]).unwrap().limit, Some(25));
    }

    #[test]
    fn test_cli_request_interval_zero_disables() {
        assert_eq!(parse(&["-l", "0"]).unwrap().request_interval, 0);
        assert_eq!(
            parse(&["-l", "60001"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_max_retries_over_max_rejected() {
        assert_eq!(parse(&["-r", "10"]).unwrap().max_retries, 10);
        assert_eq!(
            parse(&["-r", "11"]).unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_asset_host_repeatable() {
        let args = parse(&["--asset-host", "a.example", "--asset-host", "b.example"]).unwrap();
        assert_eq!(args.asset_hosts, vec!["a.example", "b.example"]);
    }

    #[test]
    fn test_to_config_maps_every_option() {
        let args = parse(&[
            "-q",
            "tag:x",
            "--limit",
            "7",
            "--dry-run",
            "--images-dir",
            "--image-concurrency",
            "2",
            "--asset-host",
            "cdn.example",
            "-l",
            "0",
        ])
        .unwrap();

        let config = args.to_config();

        assert_eq!(config.team, "docs");
        assert_eq!(config.query, "tag:x");
        assert_eq!(config.limit, Some(7));
        assert!(config.dry_run);
        assert!(config.use_images_subdir);
        assert_eq!(config.image_concurrency, 2);
        assert_eq!(config.asset_hosts, vec!["cdn.example"]);
        assert_eq!(config.request_interval_ms, 0);
        config.validate().unwrap();
    }

    #[test]
    fn test_to_config_keeps_default_asset_hosts() {
        let config = parse(&[]).unwrap().to_config();
        assert_eq!(config.asset_hosts, vec!["img.esa.io", "files.esa.io"]);
    }
}
