//! Bounded single-producer, single-consumer block queue.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{Result, TTSError};

/// One piece of playback-format PCM.
#[derive(Clone, Debug)]
pub struct SynthesisBlock {
    /// Increases by one for every block of a turn, starting at 0.
    pub seq: u64,
    pub pcm: Vec<u8>,
    /// Chunk the audio was synthesized from; empty for inserted silence.
    pub text: Arc<str>,
}

impl SynthesisBlock {
    pub fn is_silence(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug)]
pub enum QueueItem {
    Block(SynthesisBlock),
    /// No further blocks follow.
    EndOfStream,
}

/// Create a queue holding at most `depth` items.
pub fn block_queue(depth: usize) -> (BlockSender, BlockReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (BlockSender { tx, next_seq: 0 }, BlockReceiver { rx })
}

/// Writing half. Assigns sequence numbers and is consumed by [`finish`].
///
/// [`finish`]: BlockSender::finish
pub struct BlockSender {
    tx: mpsc::Sender<QueueItem>,
    next_seq: u64,
}

impl BlockSender {
    /// Enqueue a block, waiting while the queue is full.
    ///
    /// Returns the sequence number given to the block.
    pub async fn send(&mut self, pcm: Vec<u8>, text: Arc<str>) -> Result<u64> {
        let seq = self.next_seq;
        self.tx
            .send(QueueItem::Block(SynthesisBlock { seq, pcm, text }))
            .await
            .map_err(|_| TTSError::QueueClosed)?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Number of blocks enqueued so far.
    pub fn sent(&self) -> u64 {
        self.next_seq
    }

    /// Enqueue the end-of-stream marker.
    pub async fn finish(self) -> Result<()> {
        self.tx
            .send(QueueItem::EndOfStream)
            .await
            .map_err(|_| TTSError::QueueClosed)
    }
}

pub struct BlockReceiver {
    rx: mpsc::Receiver<QueueItem>,
}

impl BlockReceiver {
    /// Wait for the next item. `None` means the writer went away without
    /// sending [`QueueItem::EndOfStream`].
    pub async fn recv(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }
}
