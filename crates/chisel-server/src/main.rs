mod commands;
mod config;
mod hooks;
mod modules;
mod network;
mod player;
mod server;
mod tasks;
#[cfg(test)]
mod testutil;
mod worlds;

use std::path::PathBuf;

use config::ServerConfig;
use server::Server;
use tracing::info;

const USAGE: &str = "\
usage: chisel [options]

options:
  --address <addr>   bind address (overrides config)
  --port <port>      bind port (overrides config)
  --config <path>    config file path (default: server.json)
  --debug            debug-level logging
  --verbose          trace-level logging
  --help             show this help";

#[derive(Debug, Default)]
struct CliArgs {
    address: Option<String>,
    port: Option<u16>,
    config: Option<PathBuf>,
    debug: bool,
    verbose: bool,
}

fn parse_cli(args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--address" => {
                parsed.address = Some(args.next().ok_or("--address needs a value")?);
            }
            "--port" => {
                let raw = args.next().ok_or("--port needs a value")?;
                parsed.port = Some(raw.parse().map_err(|_| format!("bad port '{raw}'"))?);
            }
            "--config" => {
                parsed.config = Some(PathBuf::from(args.next().ok_or("--config needs a value")?));
            }
            "--debug" => parsed.debug = true,
            "--verbose" => parsed.verbose = true,
            "--help" | "-h" => return Err(String::new()),
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_cli(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("error: {message}");
            }
            eprintln!("{USAGE}");
            std::process::exit(if message.is_empty() { 0 } else { 2 });
        }
    };

    let default_level = if args.verbose {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!("starting chisel {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(|| PathBuf::from("server.json"));
    let mut config = ServerConfig::load(&config_path)?;
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = Server::bootstrap(config, config_path)?;
    server.run().await?;
    info!("server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: &[&str]) -> Result<CliArgs, String> {
        parse_cli(tokens.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_cli_overrides() {
        let args = parse(&["--address", "127.0.0.1", "--port", "4000", "--debug"]).unwrap();
        assert_eq!(args.address.as_deref(), Some("127.0.0.1"));
        assert_eq!(args.port, Some(4000));
        assert!(args.debug);
        assert!(!args.verbose);
    }

    #[test]
    fn test_parse_cli_rejects_unknown() {
        assert!(parse(&["--nope"]).is_err());
        assert!(parse(&["--port", "seventy"]).is_err());
        assert!(parse(&["--port"]).is_err());
    }
}
