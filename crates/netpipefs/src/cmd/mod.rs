use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use netpipefs_core::{Dispatcher, NetpipeFs, PeerLink, Registry};
use netpipefs_transport::{establish, LinkConfig};

use crate::exit::{transport_error, CliError, CliResult, USAGE};

pub mod read;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Feed stdin into a pipe on the peer.
    Write(WriteArgs),
    /// Drain a pipe from the peer to stdout.
    Read(ReadArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Write(args) => write::run(args),
        Command::Read(args) => read::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Port this peer listens on.
    #[arg(long)]
    pub port: u16,

    /// IPv4 address of the remote peer.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the remote peer listens on.
    #[arg(long)]
    pub host_port: u16,

    /// Per-pipe buffer capacity in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub capacity: usize,

    /// How long to wait for the peer (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Pipe path, e.g. /jobs.
    pub path: String,

    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Pipe path, e.g. /jobs.
    pub path: String,

    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// One connected peer: mount surface, registry, and the dispatcher thread.
pub(crate) struct Mount {
    pub fs: NetpipeFs,
    pub dispatcher: Dispatcher,
}

pub(crate) fn mount(args: &LinkArgs) -> CliResult<Mount> {
    let timeout = parse_duration(&args.timeout)?;
    let config = LinkConfig {
        local_port: args.port,
        remote_host: args.host.clone(),
        remote_port: args.host_port,
        timeout,
        pipe_capacity: args.capacity,
    };

    let session =
        establish(&config).map_err(|err| transport_error("failed to establish peer link", err))?;
    let (link, reader) =
        PeerLink::split(session).map_err(|err| transport_error("failed to split link", err))?;
    let registry = Arc::new(Registry::new(link, config.pipe_capacity));
    let dispatcher = Dispatcher::spawn(reader, Arc::clone(&registry))
        .map_err(|err| transport_error("failed to start dispatcher", err))?;

    Ok(Mount {
        fs: NetpipeFs::new(registry),
        dispatcher,
    })
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
