use clap::Parser;
use std::path::PathBuf;

/// Stride - multi-agent workflow orchestration engine
#[derive(Parser, Debug, Clone)]
#[command(name = "stride", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "STRIDE_CONFIG", default_value = "stride.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "STRIDE_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "STRIDE_PORT")]
    pub port: Option<u16>,

    /// Start with an empty directory instead of the built-in catalog
    #[arg(long, env = "STRIDE_NO_BUILTIN_CATALOG")]
    pub no_builtin_catalog: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["stride"]);
        assert_eq!(cli.config, PathBuf::from("stride.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.no_builtin_catalog);
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "stride",
            "--config",
            "custom.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--no-builtin-catalog",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.host, Some("0.0.0.0".to_string()));
        assert_eq!(cli.port, Some(8080));
        assert!(cli.no_builtin_catalog);
    }
}
