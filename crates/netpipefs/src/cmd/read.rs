use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use netpipefs_core::{OpenMode, PipeError};

use crate::cmd::{mount, ReadArgs};
use crate::exit::{io_error, pipe_error, CliError, CliResult, SUCCESS};

const CHUNK_SIZE: usize = 8 * 1024;

pub fn run(args: ReadArgs) -> CliResult<i32> {
    let mount = mount(&args.link)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let pipe = mount
        .fs
        .open(&args.path, OpenMode::Read, false)
        .map_err(|err| pipe_error("open failed", err))?;

    let mut stdout = std::io::stdout().lock();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut total = 0usize;

    while running.load(Ordering::SeqCst) {
        // drain whatever is buffered without parking for a full chunk
        let n = match mount.fs.read(&pipe, &mut chunk, true) {
            Ok(0) => break,
            Ok(n) => n,
            Err(PipeError::WouldBlock) => match mount.fs.read(&pipe, &mut chunk[..1], false) {
                Ok(0) => break,
                Ok(n) => n,
                Err(PipeError::BrokenPipe) => {
                    warn!(path = %args.path, "link torn down mid-read");
                    break;
                }
                Err(err) => return Err(pipe_error("read failed", err)),
            },
            Err(PipeError::BrokenPipe) => {
                warn!(path = %args.path, "link torn down mid-read");
                break;
            }
            Err(err) => return Err(pipe_error("read failed", err)),
        };

        stdout
            .write_all(&chunk[..n])
            .map_err(|err| io_error("stdout write failed", err))?;
        stdout
            .flush()
            .map_err(|err| io_error("stdout flush failed", err))?;
        total += n;
    }

    debug!(path = %args.path, total, "read side done");

    mount
        .fs
        .release(&pipe, OpenMode::Read)
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
