use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{trace, warn};

use netpipefs_wire::Mode;

use crate::error::{PipeError, Result};
use crate::link::PeerLink;
use crate::poll::{PollHandle, POLL_ERR, POLL_HUP, POLL_IN, POLL_OUT};
use crate::registry::Registry;
use crate::ring::{read_exact_retrying, RingBuffer};

type ReqId = u64;

/// An in-flight read or write suspended on this pipe.
///
/// The caller owns the record conceptually: it lives in the queue (or the
/// completion map) only while the calling thread is parked, and the caller
/// reclaims it before returning. For writes `buf` holds the bytes still to
/// deliver; for reads it is the landing area the dispatcher fills.
#[derive(Debug)]
struct IoRequest {
    id: ReqId,
    buf: Vec<u8>,
    filled: usize,
    error: Option<PipeError>,
}

impl IoRequest {
    fn new(id: ReqId, buf: Vec<u8>) -> Self {
        Self {
            id,
            buf,
            filled: 0,
            error: None,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.filled
    }

    fn is_complete(&self) -> bool {
        self.filled == self.buf.len()
    }
}

/// Snapshot of a pipe's bookkeeping, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub readers: usize,
    pub writers: usize,
    pub buffered: usize,
    pub remote_max: usize,
    pub remote_size: usize,
    pub pending_reads: usize,
    pub pending_writes: usize,
    pub force_exit: bool,
}

struct PipeState {
    buffer: RingBuffer,
    /// Credit ceiling: baseline capacity plus outstanding read-request grants.
    remote_max: usize,
    /// Bytes sent that the peer has not yet drained.
    remote_size: usize,
    /// The peer's advertised capacity; `remote_max` never deflates below it.
    baseline: usize,
    readers: usize,
    writers: usize,
    /// A reader has existed at some point; a zero reader count now means the
    /// read side *closed*, which is what makes writes fail EPIPE.
    saw_reader: bool,
    /// Mode this side opened the pipe in; the opposite mode is rejected.
    open_mode: Option<Mode>,
    force_exit: bool,
    rd_req: VecDeque<IoRequest>,
    wr_req: VecDeque<IoRequest>,
    /// Requests that completed or failed, keyed by id, waiting for their
    /// caller to wake up and reclaim them.
    done: HashMap<ReqId, IoRequest>,
    poll_handles: Vec<PollHandle>,
}

impl PipeState {
    fn remote_avail(&self) -> usize {
        self.remote_max - self.remote_size
    }

    fn count(&self, mode: Mode) -> usize {
        match mode {
            Mode::Read => self.readers,
            Mode::Write => self.writers,
        }
    }

    fn bump(&mut self, mode: Mode) {
        match mode {
            Mode::Read => {
                self.readers += 1;
                self.saw_reader = true;
            }
            Mode::Write => self.writers += 1,
        }
    }

    fn drop_count(&mut self, mode: Mode) {
        match mode {
            Mode::Read => self.readers = self.readers.saturating_sub(1),
            Mode::Write => self.writers = self.writers.saturating_sub(1),
        }
    }

    fn notify_poll_handles(&mut self) {
        for handle in self.poll_handles.drain(..) {
            handle.fire();
        }
    }

    fn check_invariants(&self) {
        debug_assert!(self.remote_size <= self.remote_max);
        debug_assert!(self.remote_max >= self.baseline);
        debug_assert!(self.buffer.len() <= self.buffer.capacity());
    }
}

/// Per-path pipe engine instance.
///
/// All public operations take the pipe's mutex on entry and release it on
/// every exit path; blocking happens only on the three condition variables
/// while that mutex is released by the wait. Frame emission briefly takes
/// the link's send lock under the pipe mutex, never the reverse.
pub struct Pipe {
    path: String,
    link: Arc<PeerLink>,
    state: Mutex<PipeState>,
    canopen: Condvar,
    rd: Condvar,
    wr: Condvar,
    next_req_id: AtomicU64,
}

impl Pipe {
    pub(crate) fn new(path: &str, capacity: usize, link: Arc<PeerLink>) -> Self {
        let baseline = link.remote_capacity();
        Self {
            path: path.to_string(),
            link,
            state: Mutex::new(PipeState {
                buffer: RingBuffer::new(capacity),
                remote_max: baseline,
                remote_size: 0,
                baseline,
                readers: 0,
                writers: 0,
                saw_reader: false,
                open_mode: None,
                force_exit: false,
                rd_req: VecDeque::new(),
                wr_req: VecDeque::new(),
                done: HashMap::new(),
                poll_handles: Vec::new(),
            }),
            canopen: Condvar::new(),
            rd: Condvar::new(),
            wr: Condvar::new(),
            next_req_id: AtomicU64::new(1),
        }
    }

    /// The path this pipe is keyed by, also its wire identity.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot the current bookkeeping.
    pub fn stats(&self) -> PipeStats {
        let st = self.lock();
        PipeStats {
            readers: st.readers,
            writers: st.writers,
            buffered: st.buffer.len(),
            remote_max: st.remote_max,
            remote_size: st.remote_size,
            pending_reads: st.rd_req.len(),
            pending_writes: st.wr_req.len(),
            force_exit: st.force_exit,
        }
    }

    /// Register one local handle in `mode`. Called by `Registry::open`.
    ///
    /// A writer returns as soon as the OPEN frame is out; data written before
    /// a reader shows up is held by credit and writeahead. A blocking reader
    /// waits until a writer exists or buffered bytes are already waiting.
    pub(crate) fn open_local(&self, mode: Mode, nonblock: bool) -> Result<()> {
        let mut st = self.lock();

        if st.force_exit {
            return Err(PipeError::NotFound);
        }
        if let Some(current) = st.open_mode {
            if current != mode {
                return Err(PipeError::NotPermitted);
            }
        }

        st.bump(mode);
        st.open_mode = Some(mode);

        // The counterpart check runs before the OPEN frame is emitted, so a
        // failed non-blocking open leaves no phantom handle on the peer.
        if nonblock {
            let absent = match mode {
                Mode::Write => st.readers == 0,
                Mode::Read => st.writers == 0 && st.buffer.is_empty(),
            };
            if absent {
                Self::undo_open(&mut st, mode);
                return Err(PipeError::WouldBlock);
            }
        }

        self.canopen.notify_all();

        if self.link.send_open(&self.path, mode).is_err() {
            Self::undo_open(&mut st, mode);
            return Err(PipeError::ConnectionReset);
        }

        if mode == Mode::Read {
            while !st.force_exit && st.writers == 0 && st.buffer.is_empty() {
                st = self.wait_on(&self.canopen, st);
            }
            if st.force_exit {
                Self::undo_open(&mut st, mode);
                return Err(PipeError::NotFound);
            }
        }

        st.check_invariants();
        Ok(())
    }

    /// Dispatcher entry point for the peer's OPEN frame.
    pub fn open_update(&self, mode: Mode) {
        let mut st = self.lock();
        st.bump(mode);
        trace!(path = %self.path, %mode, "peer opened");
        self.canopen.notify_all();
    }

    /// Write `buf` into the pipe. Returns the number of bytes accepted:
    /// on the wire, or buffered ahead of any later call's bytes.
    pub fn send(&self, buf: &[u8], nonblock: bool) -> Result<usize> {
        let mut st = self.lock();

        if st.force_exit || (st.saw_reader && st.readers == 0) {
            return Err(PipeError::BrokenPipe);
        }

        // Buffered bytes go first so they stay ahead of this call's bytes.
        if self.flush_buffer(&mut st)? > 0 {
            self.wr.notify_all();
        }

        let mut sent = 0usize;
        if st.buffer.is_empty() {
            sent += self.send_direct(&mut st, buf)?;
        }

        if sent < buf.len() {
            let ahead = st.buffer.put(&buf[sent..]);
            if ahead > 0 {
                trace!(path = %self.path, bytes = ahead, "writeahead");
            }
            sent += ahead;
        }

        if sent == buf.len() {
            st.check_invariants();
            return Ok(sent);
        }
        if nonblock {
            if sent == 0 {
                return Err(PipeError::WouldBlock);
            }
            return Ok(sent);
        }

        let id = self.next_id();
        st.wr_req
            .push_back(IoRequest::new(id, buf[sent..].to_vec()));

        while !st.force_exit && !st.done.contains_key(&id) {
            st = self.wait_on(&self.wr, st);
        }

        let req = Self::claim_request(&mut st, false, id);
        st.check_invariants();
        if req.filled == 0 && (st.force_exit || req.error.is_some()) {
            if sent > 0 {
                return Ok(sent);
            }
            return Err(req.error.unwrap_or(PipeError::BrokenPipe));
        }
        Ok(sent + req.filled)
    }

    /// Read up to `buf.len()` bytes. Returns 0 at EOF (write side gone and
    /// nothing buffered).
    pub fn read(&self, buf: &mut [u8], nonblock: bool) -> Result<usize> {
        let mut st = self.lock();

        if st.force_exit {
            return Err(PipeError::BrokenPipe);
        }

        let filled = st.buffer.get(buf);
        if filled > 0 {
            // every byte drained returns credit to the peer
            self.link
                .send_read(&self.path, filled)
                .map_err(|_| PipeError::ConnectionReset)?;
            trace!(path = %self.path, bytes = filled, "buffered read");
        }

        if filled == buf.len() {
            st.check_invariants();
            return Ok(filled);
        }
        if nonblock {
            if filled == 0 && st.writers > 0 {
                return Err(PipeError::WouldBlock);
            }
            return Ok(filled);
        }
        if st.writers == 0 {
            // EOF, or whatever the buffer still held before the write side left
            return Ok(filled);
        }

        let remaining = buf.len() - filled;
        let id = self.next_id();
        st.rd_req.push_back(IoRequest::new(id, vec![0u8; remaining]));
        if self
            .link
            .send_read_request(&self.path, remaining)
            .is_err()
        {
            Self::claim_request(&mut st, true, id);
            return Err(PipeError::ConnectionReset);
        }

        while !st.force_exit && !st.done.contains_key(&id) {
            st = self.wait_on(&self.rd, st);
        }

        let req = Self::claim_request(&mut st, true, id);
        st.check_invariants();
        if req.filled == 0 && (st.force_exit || req.error.is_some()) {
            if filled > 0 {
                return Ok(filled);
            }
            return match req.error {
                // the writer closed while we waited: clean EOF
                Some(PipeError::BrokenPipe) => Ok(0),
                Some(err) => Err(err),
                None => Err(PipeError::BrokenPipe),
            };
        }
        buf[filled..filled + req.filled].copy_from_slice(&req.buf[..req.filled]);
        Ok(filled + req.filled)
    }

    /// Dispatcher entry point for a WRITE / FLUSH frame: `size` payload bytes
    /// are on `stream` and must be delivered without blocking the dispatcher
    /// on user threads.
    pub fn recv<R: Read>(&self, size: usize, stream: &mut R) -> Result<()> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let mut wakeup = false;
        let mut remaining = size;

        // 1. already-buffered bytes feed pending readers first, preserving
        //    FIFO between them and the bytes arriving now
        loop {
            let (drained, completed) = {
                let Some(req) = st.rd_req.front_mut() else { break };
                if st.buffer.is_empty() {
                    break;
                }
                let filled = req.filled;
                let n = st.buffer.get(&mut req.buf[filled..]);
                req.filled += n;
                (n, req.is_complete())
            };
            if drained > 0 {
                self.link
                    .send_read(&self.path, drained)
                    .map_err(|_| PipeError::ConnectionReset)?;
                trace!(path = %self.path, bytes = drained, "buffered read into pending request");
            }
            if completed {
                if let Some(req) = st.rd_req.pop_front() {
                    st.done.insert(req.id, req);
                }
                wakeup = true;
            } else {
                break;
            }
        }

        // 2. arriving bytes go straight from the transport into the head
        //    request while the buffer stays empty
        while remaining > 0 {
            let (moved, completed) = {
                let Some(req) = st.rd_req.front_mut() else { break };
                debug_assert!(st.buffer.is_empty());
                let want = req.remaining().min(remaining);
                let filled = req.filled;
                read_exact_retrying(stream, &mut req.buf[filled..filled + want])
                    .map_err(|_| PipeError::ConnectionReset)?;
                req.filled += want;
                (want, req.is_complete())
            };
            self.link
                .send_read(&self.path, moved)
                .map_err(|_| PipeError::ConnectionReset)?;
            trace!(path = %self.path, bytes = moved, "direct read");
            remaining -= moved;
            if completed {
                if let Some(req) = st.rd_req.pop_front() {
                    st.done.insert(req.id, req);
                }
                wakeup = true;
            }
        }

        // 3. whatever is left is readahead
        if remaining > 0 {
            if remaining > st.buffer.free() {
                warn!(
                    path = %self.path,
                    remaining,
                    free = st.buffer.free(),
                    "peer overran the receive buffer; failing the frame"
                );
                return Err(PipeError::ConnectionReset);
            }
            let n = st
                .buffer
                .fill_from(stream, remaining)
                .map_err(|_| PipeError::ConnectionReset)?;
            trace!(path = %self.path, bytes = n, "readahead");
        }

        if wakeup {
            self.rd.notify_all();
        }
        st.notify_poll_handles();
        st.check_invariants();
        Ok(())
    }

    /// Dispatcher entry point for a READ-REQUEST frame: the peer will accept
    /// `size` more bytes delivered straight to its waiting reader.
    pub fn read_request(&self, size: usize) -> Result<()> {
        let mut st = self.lock();
        st.remote_max += size;
        let moved = self.send_data(&mut st)?;
        if moved > 0 {
            self.wr.notify_all();
        }
        st.check_invariants();
        Ok(())
    }

    /// Dispatcher entry point for a READ frame: the peer consumed `size`
    /// bytes. Grants deflate back toward the baseline; plain buffer drains
    /// reclaim availability.
    pub fn read_update(&self, size: usize) -> Result<()> {
        let mut st = self.lock();
        st.remote_size = st.remote_size.saturating_sub(size);
        let baseline = st.baseline;
        st.remote_max = st.remote_max.saturating_sub(size).max(baseline);
        let moved = self.send_data(&mut st)?;
        if moved > 0 {
            self.wr.notify_all();
        }
        st.check_invariants();
        Ok(())
    }

    /// Push everything currently buffered to the peer. Blocks until credit
    /// allows it unless `nonblock`.
    pub fn flush(&self, nonblock: bool) -> Result<usize> {
        let mut st = self.lock();

        if st.force_exit || (st.saw_reader && st.readers == 0) {
            return Err(PipeError::BrokenPipe);
        }

        let sent = self.flush_buffer(&mut st)?;
        if sent > 0 {
            self.wr.notify_all();
        }

        if st.buffer.is_empty() {
            return Ok(sent);
        }
        if nonblock {
            if sent == 0 {
                return Err(PipeError::WouldBlock);
            }
            return Ok(sent);
        }

        // Out of credit with bytes still buffered: drain the remainder into
        // a staging request and wait for credit to move it.
        let remaining = st.buffer.len();
        let mut staging = vec![0u8; remaining];
        let drained = st.buffer.get(&mut staging);
        debug_assert_eq!(drained, remaining);

        let id = self.next_id();
        st.wr_req.push_back(IoRequest::new(id, staging));

        while !st.force_exit && !st.done.contains_key(&id) {
            st = self.wait_on(&self.wr, st);
        }

        let req = Self::claim_request(&mut st, false, id);
        st.check_invariants();
        if req.filled == 0 && (st.force_exit || req.error.is_some()) {
            if sent > 0 {
                return Ok(sent);
            }
            return Err(req.error.unwrap_or(PipeError::BrokenPipe));
        }
        Ok(sent + req.filled)
    }

    /// Register a poll handle and report the immediately-known events.
    pub fn poll(&self, handle: PollHandle) -> u16 {
        let mut st = self.lock();
        st.poll_handles.push(handle);

        let mut revents = 0u16;
        match st.open_mode {
            Some(Mode::Read) => {
                if !st.buffer.is_empty() || st.writers > 0 {
                    revents |= POLL_IN;
                } else if st.writers == 0 {
                    revents |= POLL_HUP;
                }
            }
            _ => {
                if st.readers == 0 {
                    revents |= POLL_ERR;
                } else if st.remote_avail() + st.buffer.free() > 0 {
                    revents |= POLL_OUT;
                }
            }
        }
        revents
    }

    /// Close one local handle. The last writer flushes before the CLOSE
    /// frame goes out; the last handle overall removes the pipe from the
    /// registry (unless buffered bytes are still waiting for a late reader).
    pub fn close(&self, registry: &Registry, mode: Mode) -> Result<usize> {
        let flush_needed = {
            let mut st = self.lock();
            st.drop_count(mode);
            mode == Mode::Write && st.writers == 0 && !st.buffer.is_empty()
        };

        let mut flushed = 0usize;
        let mut flush_error = None;
        if flush_needed {
            match self.flush(false) {
                Ok(n) => flushed = n,
                // no reader or forced exit: the buffered bytes are undeliverable
                Err(PipeError::BrokenPipe) => {}
                Err(err) => flush_error = Some(err),
            }
        }

        let send_result = self.link.send_close(&self.path, mode);

        let (remove, forced) = {
            let mut st = self.lock();
            let gone = st.readers == 0 && st.writers == 0;
            if gone {
                st.open_mode = None;
            }
            ((gone && st.buffer.is_empty()) || st.force_exit, st.force_exit)
        };
        if remove {
            registry.remove(&self.path);
        }

        if let Some(err) = flush_error {
            return Err(err);
        }
        if send_result.is_err() && !forced {
            return Err(PipeError::ConnectionReset);
        }
        Ok(flushed)
    }

    /// Dispatcher entry point for the peer's CLOSE frame.
    pub fn close_update(&self, registry: &Registry, mode: Mode) {
        let remove = {
            let mut st = self.lock();
            st.drop_count(mode);

            match mode {
                Mode::Write => {
                    if st.writers == 0 {
                        // write side gone: pending reads end with a clean EOF
                        Self::fail_all(&mut st, true, PipeError::BrokenPipe);
                        self.rd.notify_all();
                    }
                }
                Mode::Read => {
                    if st.readers == 0 {
                        Self::fail_all(&mut st, false, PipeError::BrokenPipe);
                        self.wr.notify_all();
                    }
                }
            }
            trace!(path = %self.path, %mode, "peer closed");

            st.notify_poll_handles();
            let gone = st.readers == 0 && st.writers == 0;
            if gone {
                st.open_mode = None;
            }
            gone && st.buffer.is_empty()
        };
        if remove {
            registry.remove(&self.path);
        }
    }

    /// Sticky teardown: every waiter unblocks and reports an error.
    /// Idempotent.
    pub fn force_exit(&self) {
        let mut st = self.lock();
        st.force_exit = true;
        self.canopen.notify_all();
        self.rd.notify_all();
        self.wr.notify_all();
    }

    /// Flush buffered bytes up to the available credit. Caller broadcasts
    /// `wr` if this made progress.
    fn flush_buffer(&self, st: &mut PipeState) -> Result<usize> {
        let n = st.buffer.len().min(st.remote_avail());
        if n == 0 {
            return Ok(0);
        }

        {
            let (head, tail) = st.buffer.head_slices(n);
            self.link
                .send_flush(&self.path, head, tail)
                .map_err(|_| PipeError::ConnectionReset)?;
        }
        st.buffer.consume(n);
        st.remote_size += n;
        trace!(path = %self.path, bytes = n, "flush");
        Ok(n)
    }

    /// Emit a WRITE frame straight from `data`, up to the available credit.
    fn send_direct(&self, st: &mut PipeState, data: &[u8]) -> Result<usize> {
        let n = data.len().min(st.remote_avail());
        if n == 0 {
            return Ok(0);
        }

        self.link
            .send_write(&self.path, &data[..n])
            .map_err(|_| PipeError::ConnectionReset)?;
        st.remote_size += n;
        trace!(path = %self.path, bytes = n, "send");
        Ok(n)
    }

    /// Opportunistic drain after a credit change: flush the buffer, feed
    /// pending write requests to the wire, then writeahead what is left.
    fn send_data(&self, guard: &mut PipeState) -> Result<usize> {
        let st = guard;
        let mut moved = self.flush_buffer(st)?;

        loop {
            let avail = st.remote_avail();
            if avail == 0 {
                break;
            }
            let outcome = {
                let Some(req) = st.wr_req.front_mut() else { break };
                let filled = req.filled;
                let n = req.remaining().min(avail);
                match self.link.send_write(&self.path, &req.buf[filled..filled + n]) {
                    Ok(_) => {
                        req.filled += n;
                        Some((n, req.is_complete()))
                    }
                    Err(_) => {
                        req.error = Some(PipeError::ConnectionReset);
                        None
                    }
                }
            };
            match outcome {
                Some((n, completed)) => {
                    st.remote_size += n;
                    moved += n;
                    trace!(path = %self.path, bytes = n, "send");
                    if completed {
                        if let Some(req) = st.wr_req.pop_front() {
                            st.done.insert(req.id, req);
                        }
                    }
                }
                None => {
                    if let Some(req) = st.wr_req.pop_front() {
                        st.done.insert(req.id, req);
                    }
                    self.wr.notify_all();
                    return Err(PipeError::ConnectionReset);
                }
            }
        }

        loop {
            if st.buffer.is_full() {
                break;
            }
            let (n, completed) = {
                let Some(req) = st.wr_req.front_mut() else { break };
                let filled = req.filled;
                let n = st.buffer.put(&req.buf[filled..]);
                req.filled += n;
                (n, req.is_complete())
            };
            if n > 0 {
                trace!(path = %self.path, bytes = n, "writeahead");
            }
            moved += n;
            if completed {
                if let Some(req) = st.wr_req.pop_front() {
                    st.done.insert(req.id, req);
                }
            } else {
                break;
            }
        }

        if moved > 0 {
            st.notify_poll_handles();
        }
        Ok(moved)
    }

    fn undo_open(st: &mut PipeState, mode: Mode) {
        st.drop_count(mode);
        if st.count(mode) == 0 {
            st.open_mode = None;
        }
    }

    /// Move every request of one queue to the completion map with `error`.
    fn fail_all(st: &mut PipeState, reads: bool, error: PipeError) {
        let queue = if reads { &mut st.rd_req } else { &mut st.wr_req };
        for mut req in queue.drain(..) {
            req.error = Some(error);
            st.done.insert(req.id, req);
        }
    }

    /// Reclaim the caller's request: from the completion map if it finished,
    /// otherwise out of the queue (forced exit leaves it there).
    fn claim_request(st: &mut PipeState, reads: bool, id: ReqId) -> IoRequest {
        if let Some(req) = st.done.remove(&id) {
            return req;
        }
        let queue = if reads { &mut st.rd_req } else { &mut st.wr_req };
        match queue.iter().position(|req| req.id == id) {
            Some(pos) => queue.remove(pos).unwrap_or_else(|| IoRequest::new(id, Vec::new())),
            None => IoRequest::new(id, Vec::new()),
        }
    }

    fn next_id(&self) -> ReqId {
        self.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_on<'a>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, PipeState>,
    ) -> MutexGuard<'a, PipeState> {
        cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// True when no handle holds this pipe and nothing is queued; used to
    /// decide whether a failed creating open may remove it again.
    pub(crate) fn is_unused(&self) -> bool {
        let st = self.lock();
        st.readers == 0
            && st.writers == 0
            && st.rd_req.is_empty()
            && st.wr_req.is_empty()
            && st.buffer.is_empty()
    }
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
