use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};

const TRANSFER_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar for uploads and downloads with a known size.
pub fn create_transfer_progress(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(TRANSFER_TEMPLATE) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb
}

/// Spinner for requests of unknown duration, such as long-running remote operations.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Advances a progress bar by every byte written through it.
pub struct ProgressWriter<W> {
    inner: W,
    pb: ProgressBar,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, pb: ProgressBar) -> Self {
        Self { inner, pb }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.pb.inc(n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Tracks the read position of an upload body on a progress bar.
///
/// Seeks move the bar too, so a chunked upload that measures the body
/// first still starts from zero.
pub struct ProgressReader<R> {
    inner: R,
    pb: ProgressBar,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, pb: ProgressBar) -> Self {
        Self { inner, pb }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            self.pb.inc((buf.filled().len() - before) as u64);
        }
        poll
    }
}

impl<R: AsyncSeek + Unpin> AsyncSeek for ProgressReader<R> {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        let poll = Pin::new(&mut self.inner).poll_complete(cx);
        if let Poll::Ready(Ok(pos)) = poll {
            self.pb.set_position(pos);
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

    #[test]
    fn test_create_transfer_progress() {
        let pb = create_transfer_progress(1024);
        assert_eq!(pb.length(), Some(1024));
        pb.inc(512);
        assert_eq!(pb.position(), 512);
        pb.finish_and_clear();
    }

    #[test]
    fn test_create_spinner() {
        let pb = create_spinner("Moving...");
        assert_eq!(pb.message(), "Moving...");
        pb.finish_and_clear();
    }

    #[tokio::test]
    async fn test_writer_counts_bytes() {
        let pb = ProgressBar::hidden();
        let mut w = ProgressWriter::new(Vec::new(), pb.clone());
        w.write_all(b"hello world").await.unwrap();
        assert_eq!(pb.position(), 11);
        assert_eq!(w.into_inner(), b"hello world");
    }

    #[tokio::test]
    async fn test_reader_follows_seeks() {
        let pb = ProgressBar::hidden();
        let mut r = ProgressReader::new(std::io::Cursor::new(vec![7u8; 100]), pb.clone());
        r.seek(SeekFrom::End(0)).await.unwrap();
        assert_eq!(pb.position(), 100);
        r.seek(SeekFrom::Start(0)).await.unwrap();
        let mut buf = [0u8; 40];
        r.read_exact(&mut buf).await.unwrap();
        assert_eq!(pb.position(), 40);
    }
}
