//! Batch emitter: one batch, one line.

use crate::error::CollectorError;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writes batches to the downstream consumer.
///
/// Field groups are joined with commas into a single line, written with one
/// call, terminated by a newline and flushed before returning.
pub struct BatchEmitter<W> {
    out: W,
    lines: u64,
}

impl BatchEmitter<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> BatchEmitter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Lines written so far
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Write one batch. An empty batch writes nothing.
    pub async fn emit(&mut self, groups: &[String]) -> Result<usize, CollectorError> {
        if groups.is_empty() {
            return Ok(0);
        }

        let mut line = groups.join(",");
        line.push('\n');

        self.out.write_all(line.as_bytes()).await?;
        self.out.flush().await?;
        self.lines += 1;

        Ok(groups.len())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_joins_groups_on_one_line() {
        let mut emitter = BatchEmitter::new(Vec::new());

        let written = emitter
            .emit(&["1,a@x.io,alice,AAA,".to_string(), "2,b@x.io,bob,BBB,123456".to_string()])
            .await
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(emitter.lines_written(), 1);
        assert_eq!(
            String::from_utf8(emitter.into_inner()).unwrap(),
            "1,a@x.io,alice,AAA,,2,b@x.io,bob,BBB,123456\n"
        );
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let mut emitter = BatchEmitter::new(Vec::new());
        assert_eq!(emitter.emit(&[]).await.unwrap(), 0);
        assert_eq!(emitter.lines_written(), 0);
        assert!(emitter.into_inner().is_empty());
    }
}
