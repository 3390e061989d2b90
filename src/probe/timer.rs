use std::time::{Duration, Instant};

/// Points in a probe cycle that the stages report as they reach them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsStart,
    TlsDone,
    RequestSent,
    FirstResponseByte,
    ResponseDone,
}

const CHECKPOINTS: usize = Checkpoint::ResponseDone as usize + 1;

/// Checkpoint recorder for one probe cycle. Not shared between cycles.
#[derive(Debug, Clone, Default)]
pub struct PhaseTimer {
    marks: [Option<Instant>; CHECKPOINTS],
}

/// Phase durations of one cycle. A phase that did not run is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub dns: Duration,
    pub connect: Duration,
    pub tls: Duration,
    pub request: Duration,
    pub first_byte: Duration,
    pub response: Duration,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, checkpoint: Checkpoint) {
        self.mark_at(checkpoint, Instant::now());
    }

    /// Records a checkpoint observed somewhere else, e.g. inside an I/O adapter.
    pub fn mark_at(&mut self, checkpoint: Checkpoint, at: Instant) {
        self.marks[checkpoint as usize] = Some(at);
    }

    pub fn get(&self, checkpoint: Checkpoint) -> Option<Instant> {
        self.marks[checkpoint as usize]
    }

    fn between(&self, from: Option<Instant>, to: Checkpoint) -> Duration {
        match (from, self.get(to)) {
            (Some(from), Some(to)) => to.saturating_duration_since(from),
            _ => Duration::ZERO,
        }
    }

    pub fn timings(&self) -> PhaseTimings {
        use Checkpoint::*;

        // The request leaves once the transport is ready, TLS or not.
        let ready = self.get(TlsDone).or(self.get(ConnectDone));
        let sent = self.get(RequestSent);

        PhaseTimings {
            dns: self.between(self.get(DnsStart), DnsDone),
            connect: self.between(self.get(ConnectStart), ConnectDone),
            tls: self.between(self.get(TlsStart), TlsDone),
            request: self.between(ready, RequestSent),
            first_byte: self.between(sent, FirstResponseByte),
            response: self.between(sent, ResponseDone),
        }
    }
}
