//! Byte-stream views of a tunnel.
//!
//! [`TunnelReader`] turns incoming messages into an [`AsyncRead`]; it keeps
//! the unread tail of the current chunk, pulls the next chunk only once that
//! is used up, and after end-of-stream never touches the message source
//! again. [`TunnelWriter`] turns each write into exactly one outgoing chunk,
//! and shutting it down half-closes the tunnel (close-of-send).
//!
//! [`AsyncRead`]: tokio::io::AsyncRead

use std::error::Error as StdError;
use std::future::ready;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_util::io::{CopyToBytes, SinkWriter, StreamReader};
use tokio_util::sync::PollSender;

/// Data chunks received over a tunnel, ending at end-of-stream.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Outgoing data chunks; closing it sends close-of-send.
pub type ChunkSink = Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>>;

pub type TunnelReader = StreamReader<ChunkStream, Bytes>;
pub type TunnelWriter = SinkWriter<CopyToBytes<ChunkSink>>;

/// Outgoing messages waiting for the transport.
pub(crate) const SEND_QUEUE: usize = 32;

/// Adapt a stream of received messages. Once it has ended it is never
/// polled again.
pub fn chunk_stream<S, E>(messages: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>> + 'static,
{
    messages.map_err(io::Error::other).fuse().boxed()
}

/// Feed outgoing chunks into the transport's message queue.
///
/// Closing the sink drops the queue's sender, which ends the message stream
/// the transport is draining.
pub fn chunk_sink<T: Send + 'static>(queue: mpsc::Sender<T>, wrap: fn(Bytes) -> T) -> ChunkSink {
    Box::pin(
        PollSender::new(queue)
            .sink_map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tunnel send side closed"))
            .with(move |chunk: Bytes| ready(Ok::<_, io::Error>(wrap(chunk)))),
    )
}

pub fn reader(chunks: ChunkStream) -> TunnelReader {
    StreamReader::new(chunks)
}

pub fn writer(chunks: ChunkSink) -> TunnelWriter {
    SinkWriter::new(CopyToBytes::new(chunks))
}

/// An open tunnel, viewed as a pair of byte streams.
pub struct Tunnel {
    reader: TunnelReader,
    writer: TunnelWriter,
}

impl Tunnel {
    pub fn new(incoming: ChunkStream, outgoing: ChunkSink) -> Self {
        Self {
            reader: reader(incoming),
            writer: writer(outgoing),
        }
    }

    pub fn into_io(self) -> (TunnelReader, TunnelWriter) {
        (self.reader, self.writer)
    }
}
