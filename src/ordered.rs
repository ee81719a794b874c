//! OrderedExecutionBarrier: runs each participant's binding query and report
//! exactly once, one participant at a time, in participant order.
//!
//! The barrier is generic over the [`Sequencer`] that decides whose turn it
//! is (spin token, token ring over a transport, or nothing at all for a
//! single participant) and over the [`ReportSink`] that receives reports.
//! Worker code only ever calls [`OrderedExecutionBarrier::enter`].

use std::io::{self, Write};
use std::mem;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::Participant;
use crate::affinity::pin_current_thread;
use crate::binding::{BindingQuery, BindingReport, CpuList};
use crate::error::{Error, Result};
use crate::sync::SpinToken;

/// Decides when a participant may run its ordered section.
pub trait Sequencer {
    /// Block until it is `me`'s turn.
    fn wait_for_turn(&self, me: Participant) -> Result<()>;
    /// Pass the turn on after `me`'s section has finished.
    fn hand_off(&self, me: Participant) -> Result<()>;
}

impl Sequencer for SpinToken {
    #[inline]
    fn wait_for_turn(&self, me: Participant) -> Result<()> {
        Ok(SpinToken::wait_for_turn(self, me)?)
    }

    #[inline]
    fn hand_off(&self, _me: Participant) -> Result<()> {
        self.advance();
        Ok(())
    }
}

/// Sequencer for a run with a single participant: no waiting, no handoff.
#[derive(Clone, Copy, Debug, Default)]
pub struct Solo;

impl Sequencer for Solo {
    #[inline]
    fn wait_for_turn(&self, _me: Participant) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn hand_off(&self, _me: Participant) -> Result<()> {
        Ok(())
    }
}

/// How a report line is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Bitmap mask, e.g. `0x00000003`; must fit the 64-byte report buffer.
    #[default]
    Mask,
    /// CPU ranges, e.g. `0-1`.
    List,
    /// One JSON object per line.
    Json,
}

#[derive(Serialize)]
struct JsonLine {
    participant: Participant,
    cpus: Vec<usize>,
    mask: String,
}

impl ReportFormat {
    /// Render one report line (without newline).
    pub fn render(&self, participant: Participant, report: &BindingReport) -> Result<String> {
        match self {
            ReportFormat::Mask => Ok(report.to_mask()?),
            ReportFormat::List => Ok(report.to_list()),
            ReportFormat::Json => serde_json::to_string(&JsonLine {
                participant,
                cpus: report.cpus().collect(),
                mask: report.to_string(),
            })
            .map_err(|e| Error::Report(io::Error::other(e))),
        }
    }
}

/// Receives each participant's report while that participant holds the turn.
pub trait ReportSink: Sync {
    /// Emit the report of `participant`.
    fn report(&self, participant: Participant, report: &BindingReport) -> Result<()>;
}

impl<S: ReportSink + ?Sized> ReportSink for &S {
    #[inline]
    fn report(&self, participant: Participant, report: &BindingReport) -> Result<()> {
        (**self).report(participant, report)
    }
}

/// Writes one rendered line per report and flushes before returning, so
/// output order on the writer is turn order.
pub struct WriterSink<W> {
    out: Mutex<W>,
    format: ReportFormat,
}

impl WriterSink<io::Stdout> {
    /// Sink on standard output.
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> WriterSink<W> {
    /// Sink on `out`.
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self {
            out: Mutex::new(out),
            format,
        }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ReportSink for WriterSink<W> {
    fn report(&self, participant: Participant, report: &BindingReport) -> Result<()> {
        let line = self.format.render(participant, report)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}").map_err(Error::Report)?;
        out.flush().map_err(Error::Report)
    }
}

/// Keeps reports in memory in arrival order.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Participant, BindingReport)>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far, in the order they arrived.
    pub fn reports(&self) -> Vec<(Participant, BindingReport)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Participants in the order they reported.
    pub fn participants(&self) -> Vec<Participant> {
        self.reports().into_iter().map(|(p, _)| p).collect()
    }
}

impl ReportSink for MemorySink {
    fn report(&self, participant: Participant, report: &BindingReport) -> Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((participant, report.clone()));
        Ok(())
    }
}

struct HandOffOnUnwind<'a, S: Sequencer> {
    sequencer: &'a S,
    me: Participant,
}

impl<S: Sequencer> Drop for HandOffOnUnwind<'_, S> {
    fn drop(&mut self) {
        tracing::error!(participant = self.me, "section panicked, handing off");
        if let Err(err) = self.sequencer.hand_off(self.me) {
            tracing::error!(participant = self.me, "hand-off after panic failed: {err}");
        }
    }
}

/// Sequencer + query + sink: the single entry point used by workers.
pub struct OrderedExecutionBarrier<S, Q, W> {
    sequencer: S,
    query: Q,
    sink: W,
    pin: Option<CpuList>,
}

impl<S: Sequencer, Q: BindingQuery, W: ReportSink> OrderedExecutionBarrier<S, Q, W> {
    /// Compose a barrier.
    pub fn new(sequencer: S, query: Q, sink: W) -> Self {
        Self {
            sequencer,
            query,
            sink,
            pin: None,
        }
    }

    /// Pin participant `k` to `cpus.for_participant(k)` before it waits.
    pub fn with_pin(mut self, cpus: Option<CpuList>) -> Self {
        self.pin = cpus;
        self
    }

    /// The sequencer, for the initializer's side of the protocol.
    pub fn sequencer(&self) -> &S {
        &self.sequencer
    }

    /// The report sink.
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Run `section` while holding `me`'s turn, then hand off.
    ///
    /// Only a sequencing failure is returned as the outer error; the
    /// section's own outcome is passed through as `R`.
    ///
    /// If `section` panics, the turn is still handed off while unwinding so
    /// later participants are not left waiting; the panic then continues.
    pub fn in_turn<R>(&self, me: Participant, section: impl FnOnce() -> R) -> Result<R> {
        self.sequencer.wait_for_turn(me)?;
        tracing::debug!(participant = me, "turn acquired");
        let guard = HandOffOnUnwind {
            sequencer: &self.sequencer,
            me,
        };
        let out = section();
        mem::forget(guard);
        self.sequencer.hand_off(me)?;
        tracing::debug!(participant = me, "turn handed off");
        Ok(out)
    }

    /// Query and report `me`'s binding in turn order.
    ///
    /// A failed query or report still hands the turn on, so only this
    /// participant's line is lost.
    pub fn enter(&self, me: Participant) -> Result<BindingReport> {
        let pinned = match &self.pin {
            Some(cpus) => pin_current_thread(cpus.for_participant(me)),
            None => Ok(()),
        };
        let outcome = self.in_turn(me, || -> Result<BindingReport> {
            pinned?;
            let report = self.query.query_local_binding()?;
            self.sink.report(me, &report)?;
            Ok(report)
        })?;
        if let Err(err) = &outcome {
            match err {
                Error::Query(q) => tracing::error!(
                    participant = me,
                    operation = q.operation(),
                    "{q}"
                ),
                other => tracing::error!(participant = me, "{other}"),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    fn fixed() -> Result<BindingReport, QueryError> {
        Ok(BindingReport::from_cpus([0, 1]))
    }

    #[test]
    fn solo_enters_immediately() {
        let sink = MemorySink::new();
        let barrier = OrderedExecutionBarrier::new(Solo, fixed, &sink);
        let report = barrier.enter(0).unwrap();
        assert_eq!(report.to_list(), "0-1");
        assert_eq!(sink.participants(), vec![0]);
    }

    #[test]
    fn failed_query_still_hands_off() {
        let token = SpinToken::ascending(2).unwrap();
        let failing = || -> Result<BindingReport, QueryError> {
            Err(QueryError::AllocFailed { words: 16 })
        };
        let barrier = OrderedExecutionBarrier::new(token, failing, MemorySink::new());
        assert!(matches!(
            barrier.enter(0),
            Err(Error::Query(QueryError::AllocFailed { .. }))
        ));
        assert_eq!(
            barrier.sequencer().state(),
            crate::sync::TurnState::Holder(1)
        );
        assert!(barrier.sink().reports().is_empty());
    }

    #[test]
    fn panicking_section_still_hands_off() {
        let barrier = OrderedExecutionBarrier::new(
            SpinToken::ascending(2).unwrap(),
            fixed,
            MemorySink::new(),
        );
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            barrier.in_turn(0, || -> u8 { panic!("boom") })
        }));
        assert!(caught.is_err());
        assert_eq!(
            barrier.sequencer().state(),
            crate::sync::TurnState::Holder(1)
        );
        barrier.enter(1).unwrap();
        assert_eq!(barrier.sink().participants(), vec![1]);
    }

    #[test]
    fn unknown_participant_is_an_order_error() {
        let barrier = OrderedExecutionBarrier::new(
            SpinToken::ascending(2).unwrap(),
            fixed,
            MemorySink::new(),
        );
        assert!(matches!(
            barrier.enter(7),
            Err(Error::Order(crate::error::OrderError::OutOfRange { participant: 7, len: 2 }))
        ));
    }

    #[test]
    fn writer_sink_renders_each_format() {
        let report = BindingReport::from_cpus([0, 1, 2, 3]);
        assert_eq!(ReportFormat::Mask.render(0, &report).unwrap(), "0x0000000f");
        assert_eq!(ReportFormat::List.render(0, &report).unwrap(), "0-3");
        assert_eq!(
            ReportFormat::Json.render(2, &report).unwrap(),
            r#"{"participant":2,"cpus":[0,1,2,3],"mask":"0x0000000f"}"#
        );

        let sink = WriterSink::new(Vec::new(), ReportFormat::List);
        sink.report(0, &report).unwrap();
        sink.report(1, &BindingReport::from_cpus([5])).unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "0-3\n5\n");
    }

    #[test]
    fn format_failure_is_a_query_error() {
        let wide = BindingReport::from_cpus([1000]);
        assert!(matches!(
            ReportFormat::Mask.render(0, &wide),
            Err(Error::Query(QueryError::FormatFailed { .. }))
        ));
    }
}
