use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use netpipefs_core::OpenMode;

use crate::cmd::{mount, WriteArgs};
use crate::exit::{io_error, pipe_error, CliError, CliResult, SUCCESS};

const CHUNK_SIZE: usize = 8 * 1024;

pub fn run(args: WriteArgs) -> CliResult<i32> {
    let mount = mount(&args.link)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let pipe = mount
        .fs
        .open(&args.path, OpenMode::Write, false)
        .map_err(|err| pipe_error("open failed", err))?;

    let mut stdin = std::io::stdin().lock();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;

    while running.load(Ordering::SeqCst) {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("stdin read failed", err)),
        };

        let mut offset = 0usize;
        while offset < n {
            let written = mount
                .fs
                .write(&pipe, &chunk[offset..n], false)
                .map_err(|err| pipe_error("write failed", err))?;
            offset += written;
            total += written;
        }
    }

    debug!(path = %args.path, total, "write side done");

    mount
        .fs
        .release(&pipe, OpenMode::Write)
        .map_err(|err| pipe_error("close failed", err))?;

    mount.dispatcher.stop();
    mount.dispatcher.join();

    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
