//! Rampart - edge request pipeline server.

use std::path::PathBuf;

use tracing::{error, info};

use rampart_server::{build_server, load_config, ENV_PREFIX, VERSION};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let Some(path) = args.next() else {
                        eprintln!("--config requires a path");
                        std::process::exit(1);
                    };
                    config = Some(PathBuf::from(path));
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("rampart {VERSION}");
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Rampart - edge request pipeline

USAGE:
    rampart [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

Without --config, ./rampart.toml is loaded when present.

ENVIRONMENT VARIABLES:
    {ENV_PREFIX}__<SECTION>__<KEY>    Override any configuration value
    {ENV_PREFIX}__SERVER__PORT        Listen port (default: 8080)
    {ENV_PREFIX}__AUTH__MODE          local or remote
    {ENV_PREFIX}__AUTH__LOCAL__SECRET JWT signing secret (local mode)
    RUST_LOG                      Overrides logging.level

EXAMPLES:
    rampart --config /etc/rampart/rampart.toml
    {ENV_PREFIX}__AUTH__LOCAL__SECRET=s3cr3t rampart
"
    );
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logging is configured from the file, so load errors go to stderr.
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rampart: {e}");
            std::process::exit(1);
        }
    };

    let telemetry = match rampart_telemetry::init_telemetry(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("rampart: {e}");
            std::process::exit(1);
        }
    };

    info!(version = VERSION, addr = %config.server.bind_addr(), "starting rampart");

    let server = match build_server(&config, None) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to create server");
            drop(telemetry);
            std::process::exit(1);
        }
    };

    let result = server.run().await;
    if let Err(e) = &result {
        error!(error = %e, "server error");
    }
    drop(telemetry);
    if result.is_err() {
        std::process::exit(1);
    }
}
