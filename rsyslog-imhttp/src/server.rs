use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flate2::write::GzDecoder;
use tracing::{debug, warn};

use rsyslog_core::{
    Counter, Error, FlowControl, Message, MessageSubmitter, MultiSubmit, RateLimiter, Result,
    StatsBlock, StatsRegistry,
};

use crate::auth;
use crate::config::{ListenerConfig, ServerConfig};
use crate::framing::{FrameParser, FramingFlags, MAX_LINE};
use crate::metadata;

/// Initial (and minimum) read-buffer size; grown when the request
/// announces a larger body.
const MAX_READ_BUFFER_SIZE: usize = 16_384;

struct Listener {
    cfg: ListenerConfig,
    flags: FramingFlags,
    limiter: RateLimiter,
}

#[derive(Clone)]
struct ReceiverStats {
    submitted: Counter,
    failed: Counter,
    discarded: Counter,
}

/// The HTTP input module: embedded server, listener table, worker pool.
pub struct HttpInput {
    server: Arc<tiny_http::Server>,
    listeners: Arc<Vec<Listener>>,
    pending_listeners: Vec<Listener>,
    submitter: Arc<dyn MessageSubmitter>,
    stats: ReceiverStats,
    stats_block: Arc<StatsBlock>,
    registry: Arc<StatsRegistry>,
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
    worker_threads: usize,
}

impl HttpInput {
    /// Bind the server socket and register the statistics block. Listeners
    /// are added afterwards, before [`HttpInput::start`].
    pub fn build(
        cfg: &ServerConfig,
        submitter: Arc<dyn MessageSubmitter>,
        registry: &Arc<StatsRegistry>,
    ) -> Result<HttpInput> {
        let server = tiny_http::Server::http(&cfg.listen_addr)
            .map_err(|e| Error::Param(format!("cannot bind '{}': {e}", cfg.listen_addr)))?;

        let mut builder = StatsBlock::builder("imhttp", "imhttp");
        let stats = ReceiverStats {
            submitted: builder.counter("submitted"),
            failed: builder.counter("failed"),
            discarded: builder.counter("discarded"),
        };
        let stats_block = registry.register(builder.build());

        Ok(HttpInput {
            server: Arc::new(server),
            listeners: Arc::new(Vec::new()),
            pending_listeners: Vec::new(),
            submitter,
            stats,
            stats_block,
            registry: registry.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            worker_threads: cfg.worker_threads.max(1),
        })
    }

    /// Register one endpoint. Must happen before [`HttpInput::start`].
    pub fn add_listener(&mut self, cfg: ListenerConfig) -> Result<()> {
        if !self.workers.is_empty() {
            return Err(Error::Param(
                "listeners cannot be added while the server is running".to_string(),
            ));
        }
        let flags = FramingFlags {
            disable_lf_delim: cfg.disable_lf_delim,
            support_octet_framing: cfg.support_octet_framing,
        };
        let limiter = RateLimiter::new(
            format!("imhttp{}", cfg.endpoint),
            cfg.ratelimit_interval,
            cfg.ratelimit_burst,
        );
        self.pending_listeners.push(Listener {
            cfg,
            flags,
            limiter,
        });
        Ok(())
    }

    /// The bound socket address (useful with an ephemeral port).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Start the worker pool. Returns immediately; [`HttpInput::stop`]
    /// shuts the pool down.
    pub fn start(&mut self) -> Result<()> {
        if !self.workers.is_empty() {
            return Ok(());
        }
        self.listeners = Arc::new(std::mem::take(&mut self.pending_listeners));

        for n in 0..self.worker_threads {
            let server = self.server.clone();
            let listeners = self.listeners.clone();
            let submitter = self.submitter.clone();
            let stats = self.stats.clone();
            let stop = self.stop.clone();
            let handle = thread::Builder::new()
                .name(format!("imhttp-worker-{n}"))
                .spawn(move || worker_main(server, listeners, submitter, stats, stop))
                .map_err(|e| Error::Internal(format!("cannot spawn worker thread: {e}")))?;
            self.workers.push(handle);
        }
        debug!(workers = self.worker_threads, "http input started");
        Ok(())
    }

    /// Start and then block until another thread calls [`HttpInput::stop`].
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(200));
        }
        self.join_workers();
        Ok(())
    }

    /// Signal shutdown, unblock the accept loop and join the pool.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.server.unblock();
        self.join_workers();
        self.registry.unregister(&self.stats_block);
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for HttpInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-connection-worker state, reused across the requests a worker
/// serves.
struct ConnWorker {
    parser: FrameParser,
    read_buf: Vec<u8>,
}

fn worker_main(
    server: Arc<tiny_http::Server>,
    listeners: Arc<Vec<Listener>>,
    submitter: Arc<dyn MessageSubmitter>,
    stats: ReceiverStats,
    stop: Arc<AtomicBool>,
) {
    let mut worker = ConnWorker {
        parser: FrameParser::new(),
        read_buf: vec![0u8; MAX_READ_BUFFER_SIZE],
    };
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let request = match server.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(_) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
        };
        handle_request(&mut worker, request, &listeners, submitter.as_ref(), &stats);
    }
}

fn respond_text(request: tiny_http::Request, status: u16, body: &str) {
    let response = tiny_http::Response::from_string(body)
        .with_status_code(status)
        .with_header(
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain"[..])
                .expect("static header"),
        );
    let _ = request.respond(response);
}

fn handle_request(
    worker: &mut ConnWorker,
    mut request: tiny_http::Request,
    listeners: &[Listener],
    submitter: &dyn MessageSubmitter,
    stats: &ReceiverStats,
) {
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url.as_str(), ""),
    };

    let Some(listener) = listeners.iter().find(|l| l.cfg.endpoint == path) else {
        respond_text(request, 404, "no listener bound to this endpoint\n");
        return;
    };

    if let Some(auth_file) = &listener.cfg.basic_auth_file {
        if !auth::authorize(request.headers(), auth_file) {
            let response = tiny_http::Response::from_string("")
                .with_status_code(401)
                .with_header(
                    tiny_http::Header::from_bytes(
                        &b"WWW-Authenticate"[..],
                        &b"Basic realm=\"User Visible Realm\""[..],
                    )
                    .expect("static header"),
                );
            let _ = request.respond(response);
            return;
        }
    }

    if request.method() != &tiny_http::Method::Post {
        stats.failed.inc();
        respond_text(
            request,
            405,
            "only POST is allowed on this endpoint\n",
        );
        return;
    }

    let remote_addr = request
        .remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default();

    // when the size is known up front, read in body-sized chunks
    if let Some(len) = request.body_length() {
        if len + 1 > worker.read_buf.len() {
            worker.read_buf.resize(len + 1, 0);
        }
    }

    let compressed = request.headers().iter().any(|h| {
        h.field.equiv("content-encoding") && h.value.as_str().eq_ignore_ascii_case("gzip")
    });

    let header_meta = listener
        .cfg
        .add_metadata
        .then(|| metadata::headers_json(request.headers()));
    let query_meta = listener.cfg.add_metadata.then(|| metadata::query_params_json(query));

    let mut multi = MultiSubmit::new(submitter);
    let flow_control = if listener.cfg.flow_control {
        FlowControl::LightDelay
    } else {
        FlowControl::NoDelay
    };

    let submit_failed = {
        let mut failed = false;
        let mut on_msg = |bytes: &[u8]| {
            if bytes.is_empty() || bytes.len() > MAX_LINE {
                debug!("discarding zero-sized or oversized message");
                return;
            }
            if !listener.limiter.admit() {
                stats.discarded.inc();
                return;
            }
            let mut msg = Message::from_body(bytes.to_vec());
            msg.flow_control = flow_control;
            msg.input_name = Some(
                listener
                    .cfg
                    .input_name
                    .clone()
                    .unwrap_or_else(|| "imhttp".to_string()),
            );
            msg.ruleset = listener.cfg.ruleset.clone();
            if !remote_addr.is_empty() {
                msg.remote_addr = Some(remote_addr.clone());
            }
            if let Some(headers) = &header_meta {
                msg.set_property("!metadata!httpheaders", headers.clone());
            }
            if let Some(params) = &query_meta {
                msg.set_property("!metadata!queryparams", params.clone());
            }
            match multi.add(msg) {
                Ok(()) => stats.submitted.inc(),
                Err(e) => {
                    warn!(error = %e, "message submission failed");
                    stats.discarded.inc();
                }
            }
        };

        worker.parser.reset();
        if let Err(e) = read_body(
            &mut request,
            &mut worker.read_buf,
            &mut worker.parser,
            &listener.flags,
            &remote_addr,
            compressed,
            &mut on_msg,
        ) {
            warn!(error = %e, "error reading request body");
            failed = true;
        }
        worker.parser.finish(&mut on_msg);
        failed
    };

    if let Err(e) = multi.flush() {
        warn!(error = %e, "flushing submission buffer failed");
        stats.discarded.inc();
    }

    if submit_failed {
        respond_text(request, 500, "error processing request body\n");
    } else {
        respond_text(request, 200, "");
    }
}

/// Drain the request body chunk by chunk into the frame parser, inflating
/// gzip bodies streamingly on the way.
fn read_body(
    request: &mut tiny_http::Request,
    read_buf: &mut [u8],
    parser: &mut FrameParser,
    flags: &FramingFlags,
    peer: &str,
    compressed: bool,
    on_msg: &mut dyn FnMut(&[u8]),
) -> std::io::Result<()> {
    let reader = request.as_reader();

    if compressed {
        let mut decoder = GzDecoder::new(ParserSink {
            parser,
            flags,
            peer,
            on_msg,
        });
        loop {
            let n = reader.read(read_buf)?;
            if n == 0 {
                break;
            }
            decoder.write_all(&read_buf[..n])?;
        }
        decoder.finish()?;
    } else {
        loop {
            let n = reader.read(read_buf)?;
            if n == 0 {
                break;
            }
            parser.feed(flags, peer, &read_buf[..n], on_msg);
        }
    }
    Ok(())
}

/// `Write` adapter that feeds inflated bytes into the frame parser, so the
/// gzip decoder can drive framing without an intermediate buffer.
struct ParserSink<'a> {
    parser: &'a mut FrameParser,
    flags: &'a FramingFlags,
    peer: &'a str,
    on_msg: &'a mut dyn FnMut(&[u8]),
}

impl Write for ParserSink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.parser.feed(self.flags, self.peer, buf, self.on_msg);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
