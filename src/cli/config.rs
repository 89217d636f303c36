//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::config::{OutputFormat, PipelineConfig, RemovalConfig, ServiceConfig};
use anyhow::{Context, Result};
use std::time::Duration;

/// Convert CLI arguments to library configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the removal settings, keeping defaults for unset knobs
    pub(crate) fn removal_from_cli(cli: &Cli) -> Result<RemovalConfig> {
        let defaults = RemovalConfig::default();
        RemovalConfig::builder()
            .threshold_low(cli.threshold.unwrap_or(defaults.threshold_low))
            .feather_width(cli.feather.unwrap_or(defaults.feather_width))
            .output_format(Self::output_format(cli.format))
            .build()
            .context("Invalid background removal settings")
    }

    /// Build the pipeline settings
    pub(crate) fn pipeline_from_cli(cli: &Cli) -> Result<PipelineConfig> {
        Ok(PipelineConfig::default()
            .with_removal(Self::removal_from_cli(cli)?)
            .with_request_timeout(Some(Duration::from_secs(cli.timeout)))
            .with_max_concurrency(cli.concurrency))
    }

    /// Build the service settings from the environment, then apply CLI overrides
    pub(crate) fn service_from_cli(cli: &Cli) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::from_env().context("Invalid service environment")?;
        if let Some(url) = &cli.proxy_url {
            config = config.with_base_url(url.as_str());
        }
        Ok(config.with_request_timeout(Duration::from_secs(cli.timeout)))
    }

    /// Validate CLI arguments before anything runs
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.remove_background_only && cli.stickers {
            anyhow::bail!("--stickers needs the analysis pipeline and cannot be combined with --remove-background-only");
        }
        if cli.concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }
        if cli.timeout == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid file pattern: {}", pattern))?;
        }
        if let Some(url) = &cli.proxy_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("--proxy-url must be an http(s) URL, got '{}'", url);
            }
        }
        Self::removal_from_cli(cli).map(|_| ())
    }

    pub(crate) fn output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Rgba8 => OutputFormat::Rgba8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("remuse").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_map_to_library_defaults() {
        let cli = parse(&["photo.jpg"]);
        let removal = CliConfigBuilder::removal_from_cli(&cli).unwrap();
        assert_eq!(removal, RemovalConfig::default());

        let pipeline = CliConfigBuilder::pipeline_from_cli(&cli).unwrap();
        assert_eq!(pipeline.max_concurrency, 1);
        assert_eq!(pipeline.request_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_knobs_are_applied() {
        let cli = parse(&[
            "--threshold",
            "45",
            "--feather",
            "10",
            "--concurrency",
            "4",
            "--format",
            "webp",
            "photo.jpg",
        ]);
        let pipeline = CliConfigBuilder::pipeline_from_cli(&cli).unwrap();
        assert!((pipeline.removal.threshold_low - 45.0).abs() < f32::EPSILON);
        assert!((pipeline.removal.feather_width - 10.0).abs() < f32::EPSILON);
        assert_eq!(pipeline.removal.output_format, OutputFormat::WebP);
        assert_eq!(pipeline.max_concurrency, 4);
    }

    #[test]
    fn test_validation_rejects_bad_combinations() {
        let cli = parse(&["--remove-background-only", "--stickers", "a.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--concurrency", "0", "a.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--proxy-url", "ftp://proxy", "a.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--threshold", "500", "a.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--pattern", "*.jpg", "a.jpg"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());
    }
}
