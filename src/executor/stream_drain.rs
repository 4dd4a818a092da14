//! Background line reader for one child-process pipe.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Longest line kept in memory; longer output without a newline is split.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reads one pipe line by line on its own task and hands each line to a sink.
///
/// Lines from a single pipe reach the sink in the order they were written.
/// Two drains attached to the same process are independent of each other.
pub struct StreamDrain {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StreamDrain {
    /// Starts draining `reader`; `sink` is called once per complete line.
    ///
    /// Invalid UTF-8 is replaced rather than treated as an error, and a final
    /// line without a trailing newline is still delivered at EOF.
    pub fn start<R, F>(name: &'static str, reader: R, sink: F) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        F: FnMut(String) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drain(name, reader, sink, cancel.clone()));
        Self {
            name,
            cancel,
            handle: Some(handle),
        }
    }

    /// Asks the drain to stop. A read in progress is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Resolves once the drain task has fully ended.
    ///
    /// Safe to call repeatedly, and safe to abandon (e.g. under a timeout) and
    /// call again later.
    pub async fn wait_for(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let result = handle.await;
        self.handle = None;

        if let Err(e) = result {
            if e.is_panic() {
                tracing::error!(stream = self.name, "Stream drain panicked: {}", e);
            }
        }
    }
}

impl Drop for StreamDrain {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain<R, F>(name: &'static str, reader: R, mut sink: F, cancel: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
    F: FnMut(String) + Send,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(stream = name, "Stream drain stopped");
                break;
            }
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                tracing::debug!(stream = name, "Stream drain reached end of stream");
                break;
            }
            Ok(_) => sink(decode_line(&buf)),
            Err(e) => {
                if cancel.is_cancelled() {
                    tracing::debug!(stream = name, "Read error after stop: {}", e);
                } else {
                    tracing::error!(stream = name, "Error reading from process stream: {}", e);
                }
                break;
            }
        }
    }
}

fn decode_line(buf: &[u8]) -> String {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn collecting_sink() -> (impl FnMut(String) + Send + 'static, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = move |line: String| {
            let _ = tx.send(line);
        };
        (sink, rx)
    }

    fn collect(mut rx: mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }
    }

    #[tokio::test]
    async fn emits_lines_in_order_and_stops_at_eof() {
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", &b"Line 1\nLine 2\nLine 3\n"[..], sink);

        tokio::time::timeout(Duration::from_secs(5), drain.wait_for())
            .await
            .expect("drain should finish on EOF");

        assert!(drain.is_finished());
        assert_eq!(collect(rx), vec!["Line 1", "Line 2", "Line 3"]);
    }

    #[tokio::test]
    async fn empty_stream_emits_nothing() {
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", &b""[..], sink);
        drain.wait_for().await;
        assert!(collect(rx).is_empty());
    }

    #[tokio::test]
    async fn unterminated_last_line_and_crlf_are_handled() {
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stderr", &b"first\r\nsecond"[..], sink);
        drain.wait_for().await;
        assert_eq!(collect(rx), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn overlong_line_is_split_at_the_limit() {
        let mut input = vec![b'a'; MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\nnext\n");
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", std::io::Cursor::new(input), sink);
        drain.wait_for().await;

        let lines = collect(rx);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(lines[1], "a".repeat(10));
        assert_eq!(lines[2], "next");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", &b"ok \xff\n"[..], sink);
        drain.wait_for().await;
        assert_eq!(collect(rx), vec!["ok \u{FFFD}"]);
    }

    #[tokio::test]
    async fn stop_mid_read_ends_promptly() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", reader, sink);

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"before stop\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The writer stays open, so only stop() can end the drain.
        drain.stop();
        tokio::time::timeout(Duration::from_secs(2), drain.wait_for())
            .await
            .expect("stopped drain should end within the window");

        assert_eq!(collect(rx), vec!["before stop"]);
        drop(writer);
    }

    #[tokio::test]
    async fn read_error_while_active_does_not_propagate() {
        let (sink, rx) = collecting_sink();
        let mut drain = StreamDrain::start("stderr", FailingReader, sink);
        drain.wait_for().await;
        assert!(drain.is_finished());
        assert!(collect(rx).is_empty());
    }

    #[tokio::test]
    async fn wait_for_is_repeatable() {
        let (sink, _rx) = collecting_sink();
        let mut drain = StreamDrain::start("stdout", &b"x\n"[..], sink);
        drain.wait_for().await;
        drain.wait_for().await;
        drain.stop();
    }
}
