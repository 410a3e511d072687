//! replikv server node executable.

use std::net::{SocketAddr, ToSocketAddrs};
use std::process::ExitCode;

use clap::Parser;

use env_logger::Env;

use tokio::runtime::Builder;
use tokio::sync::watch;

use replikv::{pf_error, pf_info, pf_warn, ClusterConfig, ReplicaId, ReplikvError, ServerInfo};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the cluster configuration file.
    #[arg(short, long)]
    config: String,

    /// Replica ID of myself; must appear in the configured server list.
    #[arg(short, long)]
    server_id: ReplicaId,

    /// Bind host override; defaults to all interfaces.
    #[arg(long, default_value_t = String::from("0.0.0.0"))]
    host: String,

    /// Bind port override; defaults to this server's configured port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Protocol-specific server configuration TOML string.
    /// Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config_str: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, returning `Ok(())` on success or
    /// `Err(ReplikvError)` on any error.
    fn sanitize(&self) -> Result<(), ReplikvError> {
        if self.threads < 2 {
            Err(ReplikvError(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok(())
        }
    }

    /// Derives the address to bind the client-facing API listener to.
    fn api_bind_addr(
        &self,
        entry: &ServerInfo,
    ) -> Result<SocketAddr, ReplikvError> {
        let port = self.port.unwrap_or(entry.port);
        (self.host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ReplikvError(format!(
                    "bind address '{}:{}' did not resolve",
                    self.host, port
                ))
            })
    }
}

// Server node executable main entrance.
fn server_main() -> Result<(), ReplikvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;

    // parse optional protocol config string if given
    let config_str = if args.config_str.is_empty() {
        None
    } else {
        args.config_str = args.config_str.replace('+', "\n");
        Some(&args.config_str[..])
    };

    // load the cluster configuration and locate myself in it
    let cluster = ClusterConfig::load(&args.config)?;
    let entry = cluster.server(args.server_id).cloned().ok_or_else(|| {
        ReplikvError(format!(
            "server ID {} not found in config '{}'",
            args.server_id, args.config
        ))
    })?;
    let api_addr = args.api_bind_addr(&entry)?;
    let protocol = cluster.protocol;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name(format!("tokio-worker-replica{}", args.server_id))
        .build()?;

    // enter tokio runtime, set up the server replica, and start the main
    // event loop logic
    runtime.block_on(async move {
        let mut replica = protocol
            .new_server_replica(args.server_id, api_addr, config_str)
            .await?;
        pf_info!(args.server_id; "{} replica listening on '{}'",
                                 protocol, api_addr);

        // terminate on ctrl-c
        let (tx_term, rx_term) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx_term.send(true);
            }
        });

        replica.run(rx_term).await?;

        Ok::<(), ReplikvError>(()) // give type hint for this async closure
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .init();

    if let Err(ref e) = server_main() {
        pf_error!("s"; "server_main exitted: {}", e);
        ExitCode::FAILURE
    } else {
        pf_warn!("s"; "server_main exitted successfully");
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod server_args_tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            config: "cluster.toml".into(),
            server_id: 0,
            host: "0.0.0.0".into(),
            port: None,
            config_str: "".into(),
            threads: 2,
        }
    }

    #[test]
    fn sanitize_valid() {
        assert!(base_args().sanitize().is_ok());
    }

    #[test]
    fn sanitize_invalid_threads() {
        let mut args = base_args();
        args.threads = 1;
        assert!(args.sanitize().is_err());
    }

    #[test]
    fn bind_addr_defaults_to_config_port() -> Result<(), ReplikvError> {
        let entry = ServerInfo {
            id: 0,
            host: "10.0.0.9".into(),
            port: 52700,
        };
        let addr = base_args().api_bind_addr(&entry)?;
        assert_eq!(addr, "0.0.0.0:52700".parse()?);
        Ok(())
    }

    #[test]
    fn bind_addr_overrides() -> Result<(), ReplikvError> {
        let mut args = base_args();
        args.host = "127.0.0.1".into();
        args.port = Some(53000);
        let entry = ServerInfo {
            id: 0,
            host: "10.0.0.9".into(),
            port: 52700,
        };
        let addr = args.api_bind_addr(&entry)?;
        assert_eq!(addr, "127.0.0.1:53000".parse()?);
        Ok(())
    }
}
