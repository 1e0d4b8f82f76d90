use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::nmea::{encode_cycle, SentenceKind};
use crate::reading::{read_snapshot, ReadingSource};
use crate::transport::SentenceSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Operator interrupt
    Cancelled,
    /// The configured number of cycles has been sent
    CycleLimit,
}

/// Summary of a session that ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: StopReason,
    /// Cycles in which every sentence was sent
    pub cycles: u64,
    pub sentences_sent: u64,
    /// Cycles skipped because the instruments returned unusable values
    pub rejected_cycles: u64,
}

impl SessionOutcome {
    pub fn cancelled() -> Self {
        Self {
            reason: StopReason::Cancelled,
            cycles: 0,
            sentences_sent: 0,
            rejected_cycles: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles: u64,
    sentences_sent: u64,
    rejected_cycles: u64,
}

impl Counters {
    fn finish(&self, reason: StopReason) -> SessionOutcome {
        SessionOutcome {
            reason,
            cycles: self.cycles,
            sentences_sent: self.sentences_sent,
            rejected_cycles: self.rejected_cycles,
        }
    }
}

enum CycleEnd {
    Sent,
    Rejected,
    Cancelled,
}

pub struct BroadcastSession<R> {
    source: R,
    sentences: Vec<SentenceKind>,
    delay: Duration,
    max_cycles: Option<u64>,
    state: SessionState,
}

impl<R: ReadingSource> BroadcastSession<R> {
    /// `sentences` are sent in the given order every cycle.
    pub fn new(source: R, sentences: Vec<SentenceKind>, delay: Duration) -> Self {
        Self {
            source,
            sentences,
            delay,
            max_cycles: None,
            state: SessionState::Idle,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn into_source(self) -> R {
        self.source
    }

    /// Runs until cancelled, the cycle limit is reached, or the sink fails.
    ///
    /// `sink` is torn down on every exit path.
    pub async fn run<S: SentenceSink>(
        &mut self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome> {
        self.transition(SessionState::Running);
        let mut counters = Counters::default();
        let result = self.broadcast(sink, cancel, &mut counters).await;

        self.transition(SessionState::Draining);
        match &result {
            Ok(outcome) => info!(
                "Broadcast stopped ({:?}) after {} cycles, {} sentences",
                outcome.reason, outcome.cycles, outcome.sentences_sent
            ),
            Err(e) => error!(
                "Broadcast failed after {} cycles, {} sentences: {e}",
                counters.cycles, counters.sentences_sent
            ),
        }
        sink.teardown().await;
        self.transition(SessionState::Stopped);
        result
    }

    async fn broadcast<S: SentenceSink>(
        &mut self,
        sink: &mut S,
        cancel: &CancellationToken,
        counters: &mut Counters,
    ) -> Result<SessionOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(counters.finish(StopReason::Cancelled));
            }

            match self.cycle(sink, cancel, counters).await? {
                CycleEnd::Sent => counters.cycles += 1,
                CycleEnd::Rejected => counters.rejected_cycles += 1,
                CycleEnd::Cancelled => return Ok(counters.finish(StopReason::Cancelled)),
            }

            if self.max_cycles.is_some_and(|max| counters.cycles >= max) {
                return Ok(counters.finish(StopReason::CycleLimit));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(counters.finish(StopReason::Cancelled)),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }

    async fn cycle<S: SentenceSink>(
        &mut self,
        sink: &mut S,
        cancel: &CancellationToken,
        counters: &mut Counters,
    ) -> Result<CycleEnd> {
        let snapshot = match read_snapshot(&mut self.source) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_recoverable() => {
                warn!("Skipping cycle: {e}");
                return Ok(CycleEnd::Rejected);
            }
            Err(e) => return Err(e),
        };
        let sentences = encode_cycle(&self.sentences, &snapshot)?;

        for sentence in &sentences {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CycleEnd::Cancelled),
                sent = sink.send(sentence) => {
                    sent?;
                    trace!("{sentence}");
                    counters.sentences_sent += 1;
                }
            }
        }
        Ok(CycleEnd::Sent)
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
