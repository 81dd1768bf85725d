use async_trait::async_trait;
use llm::{LLMError, TokenEvent};
use futures::StreamExt as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tts::{
    block_queue, AudioFormat, BlockReceiver, CancelSignal, ProductionEnd, QueueItem, RenderMode, SynthesisBlock,
    SynthesisConfig, SynthesisStage, TTSError, Tts, TtsAudio,
};

/// Returns `ms` of constant-level audio in `format` after `delay`, split into
/// `pieces` that arrive `gap` apart.
struct FakeTts {
    format: AudioFormat,
    ms: u64,
    level: i16,
    pieces: usize,
    gap: Duration,
    delay: Duration,
    fail: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeTts {
    fn new(ms: u64) -> Self {
        Self {
            format: AudioFormat::PLAYBACK,
            ms,
            level: 0,
            pieces: 1,
            gap: Duration::ZERO,
            delay: Duration::from_millis(10),
            fail: false,
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl Tts for FakeTts {
    async fn synthesize(&self, text: &str) -> tts::Result<TtsAudio> {
        self.calls.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(TTSError::Synthesis("engine offline".into()));
        }
        let frames = self.format.bytes_for(Duration::from_millis(self.ms)) / self.format.bytes_per_frame().max(1);
        let samples = frames * self.format.channels as usize;
        let pcm: Vec<u8> = std::iter::repeat(self.level.to_le_bytes())
            .take(samples)
            .flatten()
            .collect();
        let size = (pcm.len() / self.pieces.max(1)).max(1);
        let pieces: Vec<tts::Result<Vec<u8>>> = pcm.chunks(size).map(|c| Ok(c.to_vec())).collect();
        let gap = self.gap;
        Ok(TtsAudio {
            format: self.format,
            stream: Box::pin(futures::stream::iter(pieces).then(move |piece| async move {
                tokio::time::sleep(gap).await;
                piece
            })),
        })
    }
}

fn tokens(items: &[&str], end: TokenEvent) -> tokio_stream::Iter<std::vec::IntoIter<TokenEvent>> {
    let mut events: Vec<TokenEvent> = items.iter().map(|t| TokenEvent::Token(t.to_string())).collect();
    events.push(end);
    tokio_stream::iter(events)
}

/// Read until the end marker or until the writer is gone.
async fn drain(rx: &mut BlockReceiver) -> (Vec<SynthesisBlock>, bool) {
    let mut blocks = Vec::new();
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Block(b) => blocks.push(b),
            QueueItem::EndOfStream => return (blocks, true),
        }
    }
    (blocks, false)
}

fn samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

#[tokio::test(start_paused = true)]
async fn chunks_become_ordered_blocks_with_pauses() {
    let tts = Arc::new(FakeTts::new(100));
    let calls = tts.calls.clone();
    let stage = SynthesisStage::new(tts, SynthesisConfig::default());
    let (tx, mut rx) = block_queue(8);

    let report = stage
        .run(
            tokens(&["Hello", " world.", " Bye", " now."], TokenEvent::Completed),
            tx,
            CancelSignal::new(),
        )
        .await;

    assert!(matches!(report.end, ProductionEnd::Completed));
    assert_eq!(report.chunks, 2);
    assert_eq!(report.blocks, 4);
    assert_eq!(*calls.lock().unwrap(), vec!["Hello world.", "Bye now."]);

    let (blocks, ended) = drain(&mut rx).await;
    assert!(ended);
    let seqs: Vec<u64> = blocks.iter().map(|b| b.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    let texts: Vec<&str> = blocks.iter().map(|b| &*b.text).collect();
    assert_eq!(texts, vec!["Hello world.", "", "Bye now.", ""]);
    assert_eq!(blocks[0].pcm.len(), AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(100)));
    assert_eq!(blocks[1].pcm.len(), AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(160)));
}

#[tokio::test(start_paused = true)]
async fn long_audio_is_split_into_target_blocks() {
    let tts = Arc::new(FakeTts::new(500));
    let config = SynthesisConfig {
        inter_chunk_ms: 0,
        ..Default::default()
    };
    let stage = SynthesisStage::new(tts, config);
    let (tx, mut rx) = block_queue(8);
    let report = stage
        .run(tokens(&["Hi."], TokenEvent::Completed), tx, CancelSignal::new())
        .await;
    assert_eq!(report.blocks, 3);

    let (blocks, ended) = drain(&mut rx).await;
    assert!(ended);
    let target = AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(220));
    assert_eq!(blocks[0].pcm.len(), target);
    assert_eq!(blocks[1].pcm.len(), target);
    assert_eq!(
        blocks[2].pcm.len(),
        AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(500)) - 2 * target
    );
}

#[tokio::test(start_paused = true)]
async fn speech_api_audio_is_converted_to_playback_format() {
    let mut fake = FakeTts::new(100);
    fake.format = AudioFormat::SPEECH_API;
    let stage = SynthesisStage::new(Arc::new(fake), SynthesisConfig::default());
    let (tx, mut rx) = block_queue(8);
    stage
        .run(tokens(&["Hi."], TokenEvent::Completed), tx, CancelSignal::new())
        .await;
    let (blocks, _) = drain(&mut rx).await;
    let frames = blocks[0].pcm.len() / 4;
    assert_eq!(blocks[0].pcm.len() % 4, 0);
    assert!((4_408..=4_410).contains(&frames), "{frames}");
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_ends_production() {
    let mut fake = FakeTts::new(100);
    fake.fail = true;
    let stage = SynthesisStage::new(Arc::new(fake), SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let report = stage
        .run(tokens(&["Only chunk.", " Never."], TokenEvent::Completed), tx, CancelSignal::new())
        .await;
    assert!(matches!(report.end, ProductionEnd::SynthesisFailed(TTSError::Synthesis(_))));
    assert_eq!(report.blocks, 0);
    assert_eq!(report.chunks, 1);
    let (blocks, ended) = drain(&mut rx).await;
    assert!(blocks.is_empty() && ended);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_drops_partial_text() {
    let tts = Arc::new(FakeTts::new(100));
    let calls = tts.calls.clone();
    let stage = SynthesisStage::new(tts, SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let report = stage
        .run(
            tokens(&["Half a"], TokenEvent::Failed(LLMError::InvalidResponse)),
            tx,
            CancelSignal::new(),
        )
        .await;
    assert!(matches!(report.end, ProductionEnd::BackendFailed(_)));
    assert!(calls.lock().unwrap().is_empty());
    assert!(matches!(rx.recv().await, Some(QueueItem::EndOfStream)));
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_only_writes_end_marker() {
    let tts = Arc::new(FakeTts::new(100));
    let calls = tts.calls.clone();
    let stage = SynthesisStage::new(tts, SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let cancel = CancelSignal::new();
    cancel.cancel();
    let report = stage
        .run(tokens(&["Hello."], TokenEvent::Completed), tx, cancel)
        .await;
    assert!(matches!(report.end, ProductionEnd::Cancelled));
    assert!(calls.lock().unwrap().is_empty());
    assert!(matches!(rx.recv().await, Some(QueueItem::EndOfStream)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn full_queue_holds_the_producer_until_cancelled() {
    let tts = Arc::new(FakeTts::new(100));
    let calls = tts.calls.clone();
    let stage = SynthesisStage::new(tts, SynthesisConfig::default());
    let (tx, mut rx) = block_queue(2);
    let cancel = CancelSignal::new();
    let words = ["One.", " Two.", " Three.", " Four.", " Five."];
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { stage.run(tokens(&words, TokenEvent::Completed), tx, cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!handle.is_finished());
    // The first chunk's audio and pause fill the queue; the second chunk waits.
    assert_eq!(calls.lock().unwrap().len(), 2);

    cancel.cancel();
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }
    let report = handle.await.unwrap();
    assert!(matches!(report.end, ProductionEnd::Cancelled));
    assert_eq!(report.blocks, 2);
    assert!(matches!(items.last(), Some(QueueItem::EndOfStream)));
    assert_eq!(items.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn quiet_stream_flushes_pending_text() {
    let tts = Arc::new(FakeTts::new(50));
    let calls = tts.calls.clone();
    let stage = SynthesisStage::new(tts, SynthesisConfig::default());
    let (tx, mut rx) = block_queue(8);
    let (token_tx, token_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        stage
            .run(
                tokio_stream::wrappers::UnboundedReceiverStream::new(token_rx),
                tx,
                CancelSignal::new(),
            )
            .await
    });

    token_tx.send(TokenEvent::Token("Thinking about it".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(*calls.lock().unwrap(), vec!["Thinking about"]);

    token_tx.send(TokenEvent::Token(" more".into())).unwrap();
    token_tx.send(TokenEvent::Completed).unwrap();
    let report = handle.await.unwrap();
    assert_eq!(report.chunks, 2);
    assert_eq!(*calls.lock().unwrap(), vec!["Thinking about", "it more"]);
    let (_, ended) = drain(&mut rx).await;
    assert!(ended);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_synthesis_drops_the_chunk() {
    let mut fake = FakeTts::new(100);
    fake.delay = Duration::from_millis(200);
    let calls = fake.calls.clone();
    let stage = SynthesisStage::new(Arc::new(fake), SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let cancel = CancelSignal::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { stage.run(tokens(&["Hello there."], TokenEvent::Completed), tx, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*calls.lock().unwrap(), vec!["Hello there."]);
    cancel.cancel();

    let report = handle.await.unwrap();
    assert!(matches!(report.end, ProductionEnd::Cancelled));
    assert_eq!(report.blocks, 0);
    assert!(matches!(rx.recv().await, Some(QueueItem::EndOfStream)));
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancel_between_audio_pieces_stops_the_chunk() {
    let mut fake = FakeTts::new(200);
    fake.pieces = 2;
    fake.gap = Duration::from_secs(1);
    let stage = SynthesisStage::new(Arc::new(fake), SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let cancel = CancelSignal::new();
    let handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { stage.run(tokens(&["Slow one."], TokenEvent::Completed), tx, cancel).await })
    };

    // The first 100 ms piece leaves on the flush timeout; the second is a
    // second away.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cancel.cancel();

    let report = handle.await.unwrap();
    assert!(matches!(report.end, ProductionEnd::Cancelled));
    assert_eq!(report.blocks, 1);
    let (blocks, ended) = drain(&mut rx).await;
    assert!(ended);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].pcm.len(), AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(100)));
}

#[tokio::test(start_paused = true)]
async fn zero_rate_engine_output_is_a_synthesis_failure() {
    let mut fake = FakeTts::new(100);
    fake.format = AudioFormat::new(0, 1);
    let stage = SynthesisStage::new(Arc::new(fake), SynthesisConfig::default());
    let (tx, mut rx) = block_queue(4);
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        stage.run(tokens(&["Hi."], TokenEvent::Completed), tx, CancelSignal::new()),
    )
    .await
    .expect("stage finished");
    assert!(matches!(report.end, ProductionEnd::SynthesisFailed(TTSError::UnsupportedFormat(_))));
    let (blocks, ended) = drain(&mut rx).await;
    assert!(blocks.is_empty() && ended);
}

#[tokio::test(start_paused = true)]
async fn full_sentence_mode_waits_for_the_whole_chunk_then_slices() {
    let mut fake = FakeTts::new(500);
    fake.pieces = 5;
    fake.gap = Duration::from_millis(100);
    let config = SynthesisConfig {
        render: RenderMode::FullSentence,
        sentence_slice_ms: 200,
        inter_chunk_ms: 0,
        ..Default::default()
    };
    let stage = SynthesisStage::new(Arc::new(fake), config);
    let (tx, mut rx) = block_queue(8);
    let cancel = CancelSignal::new();
    let handle = tokio::spawn(async move {
        stage.run(tokens(&["All at once."], TokenEvent::Completed), tx, cancel).await
    });

    // Three pieces have arrived; none of them may be queued yet.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(!handle.is_finished());
    assert!(tokio::time::timeout(Duration::ZERO, rx.recv()).await.is_err());

    let report = handle.await.unwrap();
    assert!(matches!(report.end, ProductionEnd::Completed));
    let (blocks, ended) = drain(&mut rx).await;
    assert!(ended);
    let lens: Vec<usize> = blocks.iter().map(|b| b.pcm.len()).collect();
    let slab = AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(200));
    assert_eq!(lens, vec![slab, slab, AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(100))]);
    assert_eq!(blocks.iter().map(|b| b.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn full_sentence_without_slices_is_one_block() {
    let mut fake = FakeTts::new(300);
    fake.format = AudioFormat::SPEECH_API;
    fake.pieces = 3;
    let config = SynthesisConfig {
        render: RenderMode::FullSentence,
        ..Default::default()
    };
    let stage = SynthesisStage::new(Arc::new(fake), config);
    let (tx, mut rx) = block_queue(8);
    stage
        .run(tokens(&["Hi."], TokenEvent::Completed), tx, CancelSignal::new())
        .await;
    let (blocks, _) = drain(&mut rx).await;
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].pcm.len(), AudioFormat::PLAYBACK.bytes_for(Duration::from_millis(300)));
    assert!(blocks[1].is_silence());
}

#[tokio::test(start_paused = true)]
async fn fades_shape_spoken_blocks_only() {
    let mut fake = FakeTts::new(100);
    fake.level = 1_000;
    let config = SynthesisConfig {
        fade_ms: 6,
        ..Default::default()
    };
    let stage = SynthesisStage::new(Arc::new(fake), config);
    let (tx, mut rx) = block_queue(8);
    stage
        .run(tokens(&["Hi."], TokenEvent::Completed), tx, CancelSignal::new())
        .await;
    let (blocks, _) = drain(&mut rx).await;
    let speech = samples(&blocks[0].pcm);
    // Stereo: one sample per channel per frame.
    assert_eq!(&speech[..2], &[0, 0]);
    assert_eq!(speech[speech.len() / 2], 1_000);
    assert_eq!(&speech[speech.len() - 2..], &[0, 0]);
    assert!(blocks[1].pcm.iter().all(|b| *b == 0));
}
