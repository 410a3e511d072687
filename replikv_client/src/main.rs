//! replikv client side executable.

use std::process::ExitCode;

use clap::Parser;

use env_logger::Env;

use rand::Rng;

use tokio::runtime::Builder;

use replikv::{pf_error, pf_warn, ClientId, ClusterConfig, ReplikvError};

mod clients;
mod drivers;

use crate::clients::{ClientBench, ClientMode, ClientRepl};
use crate::drivers::{DriverClosedLoop, DriverReply};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the cluster configuration file.
    #[arg(short, long)]
    config: String,

    /// Stable client ID; randomly drawn if not given. The blocking
    /// protocol uses this as the lock owner identity at every replica.
    #[arg(short, long)]
    id: Option<ClientId>,

    /// Client utility mode to run if no commands are given: repl|bench.
    #[arg(short, long, default_value_t = String::from("repl"))]
    utility: String,

    /// Protocol-specific client configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config_str: String,

    /// Mode-specific client parameters TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    params: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// One-shot operations to run instead of a utility mode, as a flat
    /// list of `read <key>` and `write <key> <value>` commands.
    #[arg(trailing_var_arg = true)]
    commands: Vec<String>,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(mode)` on success or
    /// `Err(ReplikvError)` on any error.
    fn sanitize(&self) -> Result<ClientMode, ReplikvError> {
        if self.threads < 2 {
            Err(ReplikvError(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            ClientMode::parse_name(&self.utility).ok_or(ReplikvError(format!(
                "utility mode '{}' unrecognized",
                self.utility
            )))
        }
    }
}

/// Runs the one-shot command list; errors out on the first failed
/// operation so the process exits non-zero.
async fn run_commands(
    driver: &mut DriverClosedLoop,
    commands: &[String],
) -> Result<(), ReplikvError> {
    let mut tokens = commands.iter();
    while let Some(op) = tokens.next() {
        match &op.to_lowercase()[..] {
            "read" => {
                let key = tokens
                    .next()
                    .ok_or_else(|| ReplikvError::msg("read missing <key>"))?;
                match driver.read(key).await? {
                    DriverReply::Success { value, .. } => {
                        println!(
                            "{}",
                            String::from_utf8_lossy(&value.unwrap_or_default())
                        );
                    }
                    DriverReply::Failed => {
                        return Err(ReplikvError(format!(
                            "read '{}' failed",
                            key
                        )));
                    }
                }
            }

            "write" => {
                let key = tokens
                    .next()
                    .ok_or_else(|| ReplikvError::msg("write missing <key>"))?;
                let value = tokens.next().ok_or_else(|| {
                    ReplikvError::msg("write missing <value>")
                })?;
                match driver.write(key, value.clone().into_bytes()).await? {
                    DriverReply::Success { .. } => {}
                    DriverReply::Failed => {
                        return Err(ReplikvError(format!(
                            "write '{}' failed",
                            key
                        )));
                    }
                }
            }

            op => {
                return Err(ReplikvError(format!(
                    "unrecognized command: {}",
                    op
                )));
            }
        }
    }
    Ok(())
}

// Client side executable main entrance.
fn client_main() -> Result<(), ReplikvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    let mode = args.sanitize()?;

    // parse optional config string if given
    let config_str = if args.config_str.is_empty() {
        None
    } else {
        args.config_str = args.config_str.replace('+', "\n");
        Some(&args.config_str[..])
    };

    // parse optional params string if given
    let params_str = if args.params.is_empty() {
        None
    } else {
        args.params = args.params.replace('+', "\n");
        Some(&args.params[..])
    };

    // load the cluster configuration shared with the servers
    let cluster = ClusterConfig::load(&args.config)?;
    let protocol = cluster.protocol;
    let id: ClientId = args.id.unwrap_or_else(|| rand::thread_rng().gen());

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime, connect to the service, and do work
    runtime.block_on(async move {
        let endpoint = protocol
            .new_client_endpoint(id, cluster, config_str)
            .await?;
        let mut driver = DriverClosedLoop::new(endpoint);

        if !args.commands.is_empty() {
            // run one-shot command list
            driver.connect().await?;
            let result = run_commands(&mut driver, &args.commands).await;
            driver.leave().await?;
            result?;
        } else {
            match mode {
                ClientMode::Repl => {
                    // run interactive REPL loop
                    let mut repl = ClientRepl::new(driver);
                    repl.run().await?;
                }
                ClientMode::Bench => {
                    // run benchmarking client
                    let mut bench = ClientBench::new(driver, params_str)?;
                    bench.run().await?;
                }
            }
        }

        Ok::<(), ReplikvError>(()) // give type hint for this async closure
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client_main exitted: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("c"; "client_main exitted successfully");
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod client_args_tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            config: "cluster.toml".into(),
            id: Some(7),
            utility: "repl".into(),
            config_str: "".into(),
            params: "".into(),
            threads: 2,
            commands: vec![],
        }
    }

    #[test]
    fn sanitize_valid() {
        assert_eq!(base_args().sanitize().ok(), Some(ClientMode::Repl));
    }

    #[test]
    fn sanitize_invalid_utility() {
        let mut args = base_args();
        args.utility = "invalid_mode".into();
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let mut args = base_args();
        args.threads = 1;
        assert!(args.sanitize().is_err());
    }
}
