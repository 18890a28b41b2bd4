use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mirror live HLS streams from a media server into a cache service"
)]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(
        short,
        long,
        env = "HLS_MIRROR_CONFIG",
        default_value = "./config.json"
    )]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_to_local_config() {
        let args = Args::try_parse_from(["hls-mirror"]).unwrap();
        assert_eq!(args.config, PathBuf::from("./config.json"));
        assert!(!args.verbose);
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "hls-mirror",
            "--config",
            "/etc/mirror.json",
            "-v",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/mirror.json"));
        assert!(args.verbose);
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
