//! The server loop: one listener, one request-consuming worker, one
//! reader thread per connected client.
//!
//! All mutable state lives in the `Service` owned by the worker thread, so
//! operations execute serially without locking the state itself. The
//! request queue is the only cross-thread shared object. Signal handlers
//! do nothing but set an atomic flag; the accept loop notices it (the
//! handlers are installed without `SA_RESTART`, so a pending signal makes
//! `accept` fail with `EINTR`), stops, joins the worker to take the
//! service back, and writes the final snapshot.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde_json::json;

use crate::config::Config;
use crate::error::{Result, DISPATCH_FAULT};
use crate::io::Container;
use crate::proto::{self, Request};
use crate::service::Service;

/// Backpressure bound: producers block once this many requests are
/// pending.
const QUEUE_CAPACITY: usize = 1024;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_shutdown_signal(_signal: libc::c_int) {
    // async-signal-safe: nothing but the flag store happens here
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> io::Result<()> {
    unsafe {
        let handler = handle_shutdown_signal as extern "C" fn(libc::c_int);
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        libc::sigemptyset(&mut action.sa_mask);
        // no SA_RESTART, so a blocking accept() returns EINTR
        action.sa_flags = 0;
        for &signal in &[libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// A parsed request paired with the socket to answer on. The stream is
/// shared between the reader thread and the worker, so neither can close
/// it under the other.
pub struct QueuedRequest {
    pub request: Request,
    pub client: Arc<TcpStream>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded single-consumer FIFO guarded by a mutex and two condvars.
/// `push` blocks while the queue is full; `pop` blocks while it is empty
/// and keeps draining after `close` until nothing is left.
pub struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

fn relock<T>(result: std::sync::LockResult<T>) -> T {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl<T> RequestQueue<T> {
    pub fn new(capacity: usize) -> RequestQueue<T> {
        RequestQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocking enqueue. Returns false once the queue is closed.
    pub fn push(&self, item: T) -> bool {
        let mut state: MutexGuard<QueueState<T>> = relock(self.state.lock());
        while state.items.len() >= self.capacity && !state.closed {
            state = relock(self.not_full.wait(state));
        }
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Blocking dequeue. Returns `None` only after `close` once the queue
    /// has drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = relock(self.state.lock());
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = relock(self.not_empty.wait(state));
        }
    }

    pub fn close(&self) {
        let mut state = relock(self.state.lock());
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Loads (or formats) the container, binds the listener, and serves until
/// a shutdown signal arrives. The final snapshot is written before
/// returning.
pub fn run(config: Config, container_path: &Path) -> Result<()> {
    install_signal_handlers()?;
    let container = Container::new(container_path);
    let service = container.open_or_format(&config)?;
    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    info!("listening on 0.0.0.0:{}", config.port);
    serve(listener, service, &container);
    Ok(())
}

/// The accept loop. Takes ownership of the service, hands it to the
/// worker, and recovers it on shutdown for the final save.
pub fn serve(listener: TcpListener, service: Service, container: &Container) {
    let queue: Arc<RequestQueue<QueuedRequest>> = Arc::new(RequestQueue::new(QUEUE_CAPACITY));
    let worker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || worker_loop(service, queue))
    };

    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("client connected from {}", addr);
                let stream = Arc::new(stream);
                let queue = Arc::clone(&queue);
                thread::spawn(move || client_loop(stream, queue));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!("accept failed: {}", e);
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    info!("shutdown requested; draining the request queue");
    queue.close();
    match worker.join() {
        Ok(mut service) => {
            if let Err(e) = container.save(&mut service) {
                error!(
                    "failed to save container {}: {}",
                    container.path().display(),
                    e
                );
            }
        }
        Err(_) => error!("worker thread panicked; state not saved"),
    }
}

/// Serially dispatches queued requests and writes each response back on
/// the originating socket. A response that fails to send (client gone) is
/// dropped; the worker keeps going.
fn worker_loop(mut service: Service, queue: Arc<RequestQueue<QueuedRequest>>) -> Service {
    while let Some(queued) = queue.pop() {
        let line = dispatch_frame(&mut service, &queued.request);
        if let Err(e) = write_frame(&queued.client, &line) {
            warn!("dropping response for a disconnected client: {}", e);
        }
    }
    service
}

/// Produces the response line for one request. A fault inside the
/// dispatcher (panic or unserializable response) is reported out-of-band
/// instead of killing the worker.
fn dispatch_frame(service: &mut Service, request: &Request) -> String {
    let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        proto::dispatch(service, request)
    }));
    match caught {
        Ok(response) => match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => fault_line(request, &e.to_string()),
        },
        Err(_) => {
            error!("dispatch panicked on operation {:?}", request.operation);
            fault_line(request, "internal dispatch fault")
        }
    }
}

fn fault_line(request: &Request, message: &str) -> String {
    json!({
        "status": "error",
        "message": message,
        "code": DISPATCH_FAULT,
        "operation": request.operation.clone(),
        "request_id": request.request_id.clone(),
    })
    .to_string()
}

fn write_frame(stream: &TcpStream, line: &str) -> io::Result<()> {
    let mut writer = stream;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Per-client reader: accumulates bytes, splits complete newline frames,
/// parses each as JSON, and enqueues it with a handle to this socket.
/// Invalid JSON is logged and skipped without a response.
fn client_loop(stream: Arc<TcpStream>, queue: Arc<RequestQueue<QueuedRequest>>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut reader = &*stream;
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("client {}: read failed: {}", peer, e);
                break;
            }
        };
        pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let frame: Vec<u8> = pending.drain(..=pos).collect();
            let frame = &frame[..frame.len() - 1];
            if frame.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            match serde_json::from_slice::<Request>(frame) {
                Ok(request) => {
                    let queued = QueuedRequest {
                        request,
                        client: Arc::clone(&stream),
                    };
                    if !queue.push(queued) {
                        return;
                    }
                }
                Err(e) => warn!("client {}: invalid JSON frame skipped: {}", peer, e),
            }
        }
    }
    debug!("client {} disconnected", peer);
}
