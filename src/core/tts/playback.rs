//! Serialized speech playback.
//!
//! Jobs live in an arena of slots and are referenced by index from a FIFO of
//! pending jobs. A single worker task takes one job at a time, synthesizes it,
//! streams the audio into a playback handle and waits for playback to end
//! before the next job starts. Every job gets its own cancellation token so a
//! stop aborts the network read and halts playback immediately.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::base::{
    AudioChunkStream, AudioSink, JobId, PlaybackHandle, SpeechSynthesizer, TtsError, TtsResult,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A pending synthesis-and-playback request.
#[derive(Debug, Clone)]
pub struct SpeechJob {
    pub id: JobId,
    pub text: String,
}

/// How a job settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// Nothing to say after trimming
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { job: JobId },
    Settled { job: JobId, outcome: JobOutcome },
}

#[derive(Default)]
struct QueueState {
    slots: Vec<Option<SpeechJob>>,
    free: Vec<usize>,
    pending: VecDeque<usize>,
    active: Option<(JobId, CancellationToken)>,
    next_id: u64,
}

impl QueueState {
    fn insert(&mut self, text: String) -> JobId {
        self.next_id += 1;
        let job = SpeechJob {
            id: JobId(self.next_id),
            text,
        };
        let id = job.id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(job);
                slot
            }
            None => {
                self.slots.push(Some(job));
                self.slots.len() - 1
            }
        };
        self.pending.push_back(slot);
        id
    }

    fn take(&mut self, slot: usize) -> Option<SpeechJob> {
        let job = self.slots.get_mut(slot)?.take();
        if job.is_some() {
            self.free.push(slot);
        }
        job
    }

    /// Drop every pending job, returning their ids.
    fn drain_pending(&mut self) -> Vec<JobId> {
        let slots: Vec<usize> = self.pending.drain(..).collect();
        slots
            .into_iter()
            .filter_map(|slot| self.take(slot))
            .map(|job| job.id)
            .collect()
    }
}

/// FIFO speech queue with at most one job playing at a time.
pub struct SpeechPlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
    events: broadcast::Sender<PlaybackEvent>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl SpeechPlaybackQueue {
    /// Create the queue and spawn its worker on the current runtime.
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sink: Arc<dyn AudioSink>) -> Self {
        let state = Arc::new(Mutex::new(QueueState::default()));
        let wake = Arc::new(Notify::new());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            state.clone(),
            wake.clone(),
            events.clone(),
            shutdown.clone(),
            synthesizer,
            sink,
        ));

        Self {
            state,
            wake,
            events,
            shutdown,
            worker,
        }
    }

    /// Queue `text` behind every job already queued.
    pub fn enqueue(&self, text: impl Into<String>) -> JobId {
        let id = self.state.lock().insert(text.into());
        debug!(job = %id, "Speech job queued");
        self.wake.notify_one();
        id
    }

    /// Cancel the playing job and every pending one.
    ///
    /// Safe to call when nothing is playing.
    pub fn stop(&self) {
        let (cancelled, active) = {
            let mut state = self.state.lock();
            let cancelled = state.drain_pending();
            let active = state.active.as_ref().map(|(id, token)| (*id, token.clone()));
            (cancelled, active)
        };

        if let Some((id, token)) = active {
            info!(job = %id, "Stopping speech playback");
            token.cancel();
        }
        for job in cancelled {
            let _ = self.events.send(PlaybackEvent::Settled {
                job,
                outcome: JobOutcome::Cancelled,
            });
        }
    }

    /// Drop pending jobs without touching the one playing.
    pub fn reset_queue(&self) {
        let cancelled = self.state.lock().drain_pending();
        if !cancelled.is_empty() {
            debug!(dropped = cancelled.len(), "Speech queue reset");
        }
        for job in cancelled {
            let _ = self.events.send(PlaybackEvent::Settled {
                job,
                outcome: JobOutcome::Cancelled,
            });
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.state.lock().active.as_ref().map(|(id, _)| *id)
    }
}

impl Drop for SpeechPlaybackQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.worker.abort();
    }
}

async fn run_worker(
    state: Arc<Mutex<QueueState>>,
    wake: Arc<Notify>,
    events: broadcast::Sender<PlaybackEvent>,
    shutdown: CancellationToken,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
) {
    loop {
        let next = {
            let mut state = state.lock();
            let job = state
                .pending
                .pop_front()
                .and_then(|slot| state.take(slot));
            job.map(|job| {
                let token = shutdown.child_token();
                state.active = Some((job.id, token.clone()));
                (job, token)
            })
        };

        let Some((job, token)) = next else {
            tokio::select! {
                _ = wake.notified() => {}
                _ = shutdown.cancelled() => break,
            }
            continue;
        };

        let outcome = run_job(&job, &token, synthesizer.as_ref(), sink.as_ref(), &events).await;
        match &outcome {
            JobOutcome::Failed(reason) => {
                warn!(job = %job.id, reason = %reason, "Speech job failed")
            }
            other => debug!(job = %job.id, outcome = ?other, "Speech job settled"),
        }

        {
            let mut state = state.lock();
            if state.active.as_ref().is_some_and(|(id, _)| *id == job.id) {
                state.active = None;
            }
        }
        let _ = events.send(PlaybackEvent::Settled {
            job: job.id,
            outcome,
        });

        if shutdown.is_cancelled() {
            break;
        }
    }
}

enum Interrupted {
    Cancelled,
    Failed(TtsError),
}

async fn run_job(
    job: &SpeechJob,
    token: &CancellationToken,
    synthesizer: &dyn SpeechSynthesizer,
    sink: &dyn AudioSink,
    events: &broadcast::Sender<PlaybackEvent>,
) -> JobOutcome {
    let text = job.text.trim();
    if text.is_empty() {
        return JobOutcome::Skipped;
    }

    let stream = tokio::select! {
        biased;
        _ = token.cancelled() => return JobOutcome::Cancelled,
        result = synthesizer.synthesize(text) => match result {
            Ok(stream) => stream,
            Err(e) => return JobOutcome::Failed(e.to_string()),
        },
    };

    let mut handle = tokio::select! {
        biased;
        _ = token.cancelled() => return JobOutcome::Cancelled,
        result = sink.open(job.id) => match result {
            Ok(handle) => handle,
            Err(e) => return JobOutcome::Failed(e.to_string()),
        },
    };

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(Interrupted::Cancelled),
        result = pump(job.id, stream, handle.as_mut(), events) => {
            result.map_err(Interrupted::Failed)
        }
    };

    match result {
        Ok(()) => JobOutcome::Completed,
        Err(Interrupted::Cancelled) => {
            handle.halt().await;
            JobOutcome::Cancelled
        }
        Err(Interrupted::Failed(e)) => {
            handle.halt().await;
            JobOutcome::Failed(e.to_string())
        }
    }
}

/// Stream chunks into the handle, start playback on the first one and wait
/// for both the end of the stream and the end of playback.
async fn pump(
    job: JobId,
    mut stream: AudioChunkStream,
    handle: &mut dyn PlaybackHandle,
    events: &broadcast::Sender<PlaybackEvent>,
) -> TtsResult<()> {
    let mut playing = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        handle.append(chunk).await?;
        if !playing {
            handle.play().await?;
            playing = true;
            let _ = events.send(PlaybackEvent::Started { job });
        }
    }
    handle.end_of_stream().await?;
    if playing {
        handle.finished().await?;
    }
    Ok(())
}

// =============================================================================
// Channel sink
// =============================================================================

/// Output of a [`ChannelAudioSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    Started { job: JobId },
    Chunk { job: JobId, data: Bytes },
    StreamEnd { job: JobId },
    Halted { job: JobId },
}

/// Sink that forwards audio to a remote player over a channel.
///
/// The remote side reports the end of playback with
/// [`acknowledge`](Self::acknowledge). When no acknowledgement arrives, the
/// job is settled after the estimated audio duration plus a grace period.
#[derive(Clone)]
pub struct ChannelAudioSink {
    tx: mpsc::Sender<SinkMessage>,
    acks: Arc<DashMap<JobId, oneshot::Sender<()>>>,
    bitrate_bps: u64,
    grace: Duration,
}

impl ChannelAudioSink {
    /// Bitrate assumed for duration estimates (mp3 at 48 kbps)
    pub const DEFAULT_BITRATE_BPS: u64 = 48_000;
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

    pub fn new(tx: mpsc::Sender<SinkMessage>) -> Self {
        Self {
            tx,
            acks: Arc::new(DashMap::new()),
            bitrate_bps: Self::DEFAULT_BITRATE_BPS,
            grace: Self::DEFAULT_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The remote player finished `job`.
    pub fn acknowledge(&self, job: JobId) -> bool {
        match self.acks.remove(&job) {
            Some((_, ack)) => ack.send(()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl AudioSink for ChannelAudioSink {
    async fn open(&self, job: JobId) -> TtsResult<Box<dyn PlaybackHandle>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.acks.insert(job, ack_tx);
        Ok(Box::new(ChannelPlayback {
            job,
            tx: self.tx.clone(),
            acks: self.acks.clone(),
            ack: Some(ack_rx),
            bytes: 0,
            bitrate_bps: self.bitrate_bps,
            grace: self.grace,
        }))
    }
}

struct ChannelPlayback {
    job: JobId,
    tx: mpsc::Sender<SinkMessage>,
    acks: Arc<DashMap<JobId, oneshot::Sender<()>>>,
    ack: Option<oneshot::Receiver<()>>,
    bytes: u64,
    bitrate_bps: u64,
    grace: Duration,
}

impl ChannelPlayback {
    async fn send(&self, message: SinkMessage) -> TtsResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TtsError::Playback("audio channel closed".to_string()))
    }

    fn estimated_duration(&self) -> Duration {
        let bitrate = self.bitrate_bps.max(1);
        Duration::from_millis(self.bytes * 8 * 1000 / bitrate) + self.grace
    }
}

#[async_trait]
impl PlaybackHandle for ChannelPlayback {
    async fn append(&mut self, chunk: Bytes) -> TtsResult<()> {
        self.bytes += chunk.len() as u64;
        self.send(SinkMessage::Chunk {
            job: self.job,
            data: chunk,
        })
        .await
    }

    async fn play(&mut self) -> TtsResult<()> {
        self.send(SinkMessage::Started { job: self.job }).await
    }

    async fn end_of_stream(&mut self) -> TtsResult<()> {
        self.send(SinkMessage::StreamEnd { job: self.job }).await
    }

    async fn finished(&mut self) -> TtsResult<()> {
        let Some(ack) = self.ack.take() else {
            return Ok(());
        };
        let limit = self.estimated_duration();
        if tokio::time::timeout(limit, ack).await.is_err() {
            debug!(job = %self.job, "No playback acknowledgement, settling on estimate");
        }
        self.acks.remove(&self.job);
        Ok(())
    }

    async fn halt(&mut self) {
        self.acks.remove(&self.job);
        self.ack = None;
        let _ = self.tx.send(SinkMessage::Halted { job: self.job }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct EchoSynth;

    #[async_trait]
    impl SpeechSynthesizer for EchoSynth {
        async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream> {
            if text == "fail" {
                return Err(TtsError::SynthesisFailed("boom".to_string()));
            }
            let chunks = vec![
                Ok(Bytes::from(text.as_bytes().to_vec())),
                Ok(Bytes::from_static(b"!")),
            ];
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    /// Echo synthesizer that records what it was asked to say.
    #[derive(Default)]
    struct RecordingSynth {
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn synthesize(&self, text: &str) -> TtsResult<AudioChunkStream> {
            self.requests.lock().push(text.to_string());
            EchoSynth.synthesize(text).await
        }
    }

    async fn next_settled(rx: &mut broadcast::Receiver<PlaybackEvent>) -> (JobId, JobOutcome) {
        loop {
            if let PlaybackEvent::Settled { job, outcome } = rx.recv().await.unwrap() {
                return (job, outcome);
            }
        }
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut state = QueueState::default();
        let a = state.insert("a".into());
        let b = state.insert("b".into());
        assert_ne!(a, b);

        let slot = state.pending.pop_front().unwrap();
        assert_eq!(state.take(slot).unwrap().id, a);
        let c = state.insert("c".into());
        assert_eq!(state.slots.len(), 2);
        assert_eq!(state.drain_pending(), vec![b, c]);
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_channel_sink_streams_and_settles_on_ack() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChannelAudioSink::new(tx);
        let queue = SpeechPlaybackQueue::new(Arc::new(EchoSynth), Arc::new(sink.clone()));
        let mut events = queue.subscribe();

        let job = queue.enqueue("Kia ora");
        assert_eq!(
            rx.recv().await.unwrap(),
            SinkMessage::Chunk {
                job,
                data: Bytes::from_static(b"Kia ora")
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SinkMessage::Started { job });
        assert_eq!(
            rx.recv().await.unwrap(),
            SinkMessage::Chunk {
                job,
                data: Bytes::from_static(b"!")
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SinkMessage::StreamEnd { job });

        // Wait for the worker to park on the acknowledgement
        while !sink.acks.contains_key(&job) {
            tokio::task::yield_now().await;
        }
        assert!(sink.acknowledge(job));
        assert_eq!(next_settled(&mut events).await, (job, JobOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_sink_settles_on_estimate() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChannelAudioSink::new(tx).with_grace(Duration::from_millis(100));
        let queue = SpeechPlaybackQueue::new(Arc::new(EchoSynth), Arc::new(sink));
        let mut events = queue.subscribe();

        let job = queue.enqueue("hello");
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        assert_eq!(next_settled(&mut events).await, (job, JobOutcome::Completed));
        drop(queue);
        drain.abort();
    }

    #[tokio::test]
    async fn test_failed_and_skipped_jobs_do_not_block() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChannelAudioSink::new(tx).with_grace(Duration::ZERO);
        let queue = SpeechPlaybackQueue::new(Arc::new(EchoSynth), Arc::new(sink));
        let mut events = queue.subscribe();
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let a = queue.enqueue("fail");
        let b = queue.enqueue("   ");
        let c = queue.enqueue("ok");

        assert_eq!(
            next_settled(&mut events).await,
            (a, JobOutcome::Failed("Speech synthesis failed: boom".to_string()))
        );
        assert_eq!(next_settled(&mut events).await, (b, JobOutcome::Skipped));
        assert_eq!(next_settled(&mut events).await, (c, JobOutcome::Completed));
        drain.abort();
    }

    #[tokio::test]
    async fn test_jobs_play_one_at_a_time() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ChannelAudioSink::new(tx).with_grace(Duration::ZERO);
        let queue = SpeechPlaybackQueue::new(Arc::new(EchoSynth), Arc::new(sink));
        let mut events = queue.subscribe();
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let a = queue.enqueue("first");
        let b = queue.enqueue("second");

        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let done = event
                == PlaybackEvent::Settled {
                    job: b,
                    outcome: JobOutcome::Completed,
                };
            seen.push(event);
            if done {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                PlaybackEvent::Started { job: a },
                PlaybackEvent::Settled { job: a, outcome: JobOutcome::Completed },
                PlaybackEvent::Started { job: b },
                PlaybackEvent::Settled { job: b, outcome: JobOutcome::Completed },
            ]
        );
        drain.abort();
    }

    #[tokio::test]
    async fn test_stop_cancels_playing_and_pending_jobs() {
        let (tx, mut rx) = mpsc::channel(16);
        // Default grace keeps the first job waiting for an acknowledgement
        let sink = ChannelAudioSink::new(tx);
        let synth = Arc::new(RecordingSynth::default());
        let queue = SpeechPlaybackQueue::new(synth.clone(), Arc::new(sink));
        let mut events = queue.subscribe();

        let a = queue.enqueue("AAAA");
        let b = queue.enqueue("BBBB");
        assert_eq!(events.recv().await.unwrap(), PlaybackEvent::Started { job: a });

        queue.stop();

        let mut settled = vec![next_settled(&mut events).await, next_settled(&mut events).await];
        settled.sort_by_key(|(job, _)| job.0);
        assert_eq!(
            settled,
            vec![(a, JobOutcome::Cancelled), (b, JobOutcome::Cancelled)]
        );
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(synth.requests.lock().as_slice(), ["AAAA"]);

        // Nothing from the dropped job reaches the player
        let mut messages = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
        {
            messages.push(message);
        }
        assert!(messages.contains(&SinkMessage::Halted { job: a }));
        assert!(messages.iter().all(|m| !matches!(
            m,
            SinkMessage::Started { job } | SinkMessage::Chunk { job, .. } if *job == b
        )));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let (tx, _rx) = mpsc::channel(1);
        let queue =
            SpeechPlaybackQueue::new(Arc::new(EchoSynth), Arc::new(ChannelAudioSink::new(tx)));
        queue.stop();
        queue.reset_queue();
        assert_eq!(queue.pending_len(), 0);
        assert!(queue.active_job().is_none());
    }
}
