use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::protocol::{ControlHandler, RtspRequest, RtspResponse};
use crate::relay::Forwarder;
use crate::transport::connection::{self, ConnectionHandle};
use crate::transport::interleaved::{self, Message};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, forwarder: Forwarder, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let f = forwarder.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, f, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP control connection.
///
/// The reader side runs here; all writes go through the connection's
/// [`ConnectionHandle`] to a dedicated writer thread.
struct Connection {
    reader: BufReader<TcpStream>,
    conn: ConnectionHandle,
    handler: ControlHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(stream: TcpStream, forwarder: Forwarder, running: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(error = %e, "dropping connection without peer address");
                return;
            }
        };

        tracing::info!(%peer_addr, "client connected");

        let settings = forwarder.registry().settings();
        let (write_timeout, queue) = (settings.write_timeout, settings.egress_queue);

        let (reader_stream, writer_stream, close_stream) =
            match (stream.try_clone(), stream.try_clone()) {
                (Ok(r), Ok(w)) => (r, w, stream),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(%peer_addr, error = %e, "failed to clone client socket");
                    return;
                }
            };
        if let Err(e) = writer_stream.set_write_timeout(Some(write_timeout)) {
            tracing::warn!(%peer_addr, error = %e, "failed to set write timeout");
            return;
        }

        let (conn, rx) = ConnectionHandle::channel(queue);
        let conn = conn.with_stream(close_stream);
        thread::spawn(move || connection::write_loop(writer_stream, rx, peer_addr));

        let handler = ControlHandler::new(forwarder, conn.clone(), peer_addr);

        let mut connection = Connection {
            reader: BufReader::new(reader_stream),
            conn,
            handler,
            peer_addr,
        };

        let reason = connection.run(&running);
        connection.handler.close();
        // Dropping the last handle lets the writer drain and exit.
        drop(connection);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/frame loop. Returns the reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let message = match interleaved::read_message(&mut self.reader) {
                Ok(Some(message)) => message,
                Ok(None) => return "connection closed by client",
                Err(_) => return "read error",
            };

            let request_text = match message {
                Message::Frame { channel, payload } => {
                    self.handler.handle_frame(channel, payload);
                    continue;
                }
                Message::Request(text) => text,
            };

            match RtspRequest::parse(&request_text) {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        "request"
                    );

                    let response = self.handler.handle(&request);

                    tracing::debug!(
                        peer = %self.peer_addr,
                        status = response.status,
                        "response"
                    );

                    if self.conn.send_response(response.into_bytes()).is_err() {
                        return "write error";
                    }
                    if self.handler.should_close() {
                        return "session torn down";
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    let response = RtspResponse::malformed(&request_text);
                    if self.conn.send_response(response.into_bytes()).is_err() {
                        return "write error";
                    }
                }
            }
        }

        "server shutting down"
    }
}
