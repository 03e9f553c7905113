//! Tiny Prometheus-style scrape endpoint for the counters map.
//!
//! Renders [`crate::counters::Counters`] as `render_prometheus` text over a
//! plain `TcpListener` accept loop (`serve_loop`), no HTTP framework.

use std::fmt::Write as _;
use std::io::{Read, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::counters::Counters;

/// Render every counter as a single untyped Prometheus gauge line, with the
/// key (already space-separated group/name) folded into the metric name.
pub fn render_counters_prometheus(counters: &Counters) -> String {
    let mut out = String::with_capacity(1024);
    writeln!(out, "# HELP rlncd_counter Fire-and-forget diagnostic counters.").unwrap();
    writeln!(out, "# TYPE rlncd_counter counter").unwrap();
    for (key, value) in counters.snapshot() {
        writeln!(out, "rlncd_counter{{name=\"{key}\"}} {value}").unwrap();
    }
    out
}

/// A small non-blocking-accept HTTP server serving `GET /metrics` off the
/// live counters table.
pub struct MetricsServer {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn start(bind_addr: SocketAddr, counters: Arc<Counters>) -> std::io::Result<MetricsServer> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = thread::Builder::new()
            .name("rlncd-metrics".into())
            .spawn(move || serve_loop(listener, counters, running_clone))
            .map_err(std::io::Error::other)?;

        Ok(MetricsServer {
            running,
            handle: Some(handle),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(listener: TcpListener, counters: Arc<Counters>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, &counters),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => thread::sleep(Duration::from_millis(100)),
        }
    }
}

fn handle_connection(mut stream: TcpStream, counters: &Counters) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    if request.starts_with("GET /metrics") {
        let body = render_counters_prometheus(counters);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    } else {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let _ = stream.write_all(response.as_bytes());
    }
}
