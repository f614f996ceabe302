use std::io::{BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};

use bytes::Bytes;

use crate::error::{RelayError, Result};
use crate::transport::interleaved;

/// A unit of output queued for a control connection's writer thread.
#[derive(Debug)]
pub enum Outbound {
    /// Serialized RTSP response text.
    Response(Vec<u8>),
    /// Media frame written with interleaved framing on `channel`.
    Frame { channel: u8, payload: Bytes },
}

/// Shared handle onto one control connection's single writer.
///
/// Everything written to the connection, responses and forwarded frames
/// alike, goes through one bounded queue drained by [`write_loop`], so the
/// connection never has two concurrent writers. Clones are cheap; the
/// registry keeps one per session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: SyncSender<Outbound>,
    stream: Option<Arc<TcpStream>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its queue.
    ///
    /// A zero capacity is raised to one.
    pub fn channel(capacity: usize) -> (Self, Receiver<Outbound>) {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        (Self { tx, stream: None }, rx)
    }

    /// Attach the socket so [`close`](Self::close) can shut it down.
    pub fn with_stream(mut self, stream: TcpStream) -> Self {
        self.stream = Some(Arc::new(stream));
        self
    }

    /// Enqueue an interleaved frame without blocking.
    ///
    /// A full queue means the destination is not keeping up and is reported
    /// as [`RelayError::EgressFull`].
    pub fn send_frame(&self, channel: u8, payload: Bytes) -> Result<()> {
        match self.tx.try_send(Outbound::Frame { channel, payload }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::EgressFull),
            Err(TrySendError::Disconnected(_)) => Err(RelayError::EgressClosed),
        }
    }

    /// Enqueue a response, waiting for room in the queue.
    pub fn send_response(&self, response: Vec<u8>) -> Result<()> {
        self.tx
            .send(Outbound::Response(response))
            .map_err(|_| RelayError::EgressClosed)
    }

    /// Shut the underlying socket down in both directions.
    ///
    /// The connection's reader observes this and tears its session down.
    pub fn close(&self) {
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Writer thread body: drains the queue onto the socket.
///
/// Returns when every [`ConnectionHandle`] is dropped or a write fails.
/// A failed or timed-out write shuts the socket down.
pub fn write_loop(stream: TcpStream, rx: Receiver<Outbound>, peer_addr: SocketAddr) {
    let mut writer = BufWriter::new(&stream);

    while let Ok(first) = rx.recv() {
        let mut next = Some(first);
        let mut result = Ok(());

        // Batch whatever is already queued before flushing.
        while let Some(item) = next.take() {
            result = write_outbound(&mut writer, &item);
            if result.is_err() {
                break;
            }
            next = match rx.try_recv() {
                Ok(item) => Some(item),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
            };
        }

        if let Err(e) = result.and_then(|()| writer.flush().map_err(RelayError::from)) {
            tracing::warn!(%peer_addr, error = %e, "write failed, closing connection");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    }

    tracing::trace!(%peer_addr, "writer exited");
}

fn write_outbound<W: Write>(writer: &mut W, item: &Outbound) -> Result<()> {
    match item {
        Outbound::Response(bytes) => writer.write_all(bytes).map_err(RelayError::from),
        Outbound::Frame { channel, payload } => interleaved::write_frame(writer, *channel, payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_reports_egress_full() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        handle.send_frame(0, Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            handle.send_frame(0, Bytes::from_static(b"b")),
            Err(RelayError::EgressFull)
        ));
    }

    #[test]
    fn dropped_receiver_reports_egress_closed() {
        let (handle, rx) = ConnectionHandle::channel(4);
        drop(rx);
        assert!(matches!(
            handle.send_frame(0, Bytes::from_static(b"a")),
            Err(RelayError::EgressClosed)
        ));
        assert!(handle.send_response(b"RTSP/1.0 200 OK\r\n\r\n".to_vec()).is_err());
    }

    #[test]
    fn frames_preserve_queue_order() {
        let (handle, rx) = ConnectionHandle::channel(8);
        for i in 0..3u8 {
            handle.send_frame(i, Bytes::from(vec![i])).unwrap();
        }
        let channels: Vec<u8> = rx
            .try_iter()
            .map(|item| match item {
                Outbound::Frame { channel, .. } => channel,
                Outbound::Response(_) => unreachable!(),
            })
            .collect();
        assert_eq!(channels, vec![0, 1, 2]);
    }
}
