//! Supervision of the rtl_433 process and the ingestion loop
//!
//! One loop owns the decoder child and both of its output streams. Each
//! iteration checks for a shutdown request, then waits at most
//! `POLL_INTERVAL` for a line from either stream. Parsing, identity
//! resolution, aggregation and flushing run to completion before the next
//! wait, so records are handled strictly in arrival order.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, timeout_at, Duration, Instant};

use crate::cache::AggregationCache;
use crate::decoder::DecoderCommand;
use crate::error::SupervisorError;
use crate::logging::LogContext;
use crate::models::TelemetryRecord;
use crate::parser;
use crate::registry::ChannelRegistry;
use crate::storage::TimeSeriesStore;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const EXIT_GRACE: Duration = Duration::from_millis(500);
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// rtl_433 prints this when the SDR dongle cannot be opened
const HARDWARE_ABSENT: &str = "Unable to open";

/// Operator request to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    /// The data stream ended; collecting the last diagnostics before restart
    Degraded,
    Restarting,
}

/// What became of one line of decoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Empty line, the decoder has closed its output
    Stalled,
    /// Record from a configured device, with the number of columns updated
    Observed(usize),
    /// Record from a device nobody configured
    Ignored,
    Malformed,
}

enum Exit {
    Stalled,
    Shutdown(Shutdown),
}

enum StreamEvent {
    Diagnostic(io::Result<Option<String>>),
    Data(io::Result<Option<String>>),
}

pub struct Supervisor<S> {
    command: DecoderCommand,
    registry: Arc<ChannelRegistry>,
    cache: AggregationCache,
    store: S,
    state: SupervisorState,
    log: LogContext,
}

impl<S: TimeSeriesStore> Supervisor<S> {
    pub fn new(
        command: DecoderCommand,
        registry: Arc<ChannelRegistry>,
        cache: AggregationCache,
        store: S,
        log: LogContext,
    ) -> Self {
        Self {
            command,
            registry,
            cache,
            store,
            state: SupervisorState::Stopped,
            log,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run the decoder until shutdown is requested or the SDR hardware is missing
    ///
    /// The decoder is restarted whenever its output ends. A clean exit restarts
    /// immediately; repeated failures back off exponentially.
    ///
    /// # Returns
    /// The shutdown request that stopped the loop, or the fatal error
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<Option<Shutdown>>,
    ) -> Result<Shutdown, SupervisorError> {
        let mut failures: u32 = 0;

        loop {
            if let Some(request) = *shutdown.borrow() {
                self.transition(SupervisorState::Stopped);
                return Ok(request);
            }

            self.transition(SupervisorState::Starting);
            info!(target: self.log.target(), "Start {}", self.command.program().display());
            debug!(target: self.log.target(), "Args: {}", self.command.args().join(" "));

            let mut child = match self.command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    self.transition(SupervisorState::Stopped);
                    return Err(SupervisorError::Spawn {
                        program: self.command.program().display().to_string(),
                        source,
                    });
                }
            };

            let outcome = self.receive(&mut child, &shutdown).await;
            let grace = match outcome {
                Ok(Exit::Stalled) => EXIT_GRACE,
                _ => Duration::ZERO,
            };
            let status = self.release(&mut child, grace).await;

            match outcome {
                Ok(Exit::Stalled) => {}
                Ok(Exit::Shutdown(request)) => {
                    self.transition(SupervisorState::Stopped);
                    return Ok(request);
                }
                Err(e) => {
                    self.transition(SupervisorState::Stopped);
                    return Err(e);
                }
            }

            self.transition(SupervisorState::Restarting);
            let delay = match status {
                Some(status) if status.success() => {
                    failures = 0;
                    Duration::ZERO
                }
                _ => {
                    failures = failures.saturating_add(1);
                    backoff(failures)
                }
            };

            if !delay.is_zero() {
                warn!(
                    target: self.log.target(),
                    "Decoder failed ({}), restarting in {} ms",
                    describe(status),
                    delay.as_millis()
                );
                // A closed channel disables the second branch instead of cutting the delay short
                tokio::select! {
                    _ = sleep(delay) => {}
                    Ok(_) = shutdown.wait_for(Option::is_some) => {}
                }
            }
        }
    }

    /// Handle one line from the data stream
    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        let record = match parser::parse(line) {
            Ok(Some(record)) => record,
            Ok(None) => return LineOutcome::Stalled,
            Err(e) => {
                error!(target: self.log.target(), "Error: {}", e);
                info!(target: self.log.target(), "JSON: {}", e.raw());
                return LineOutcome::Malformed;
            }
        };

        debug!(target: self.log.target(), "JS: {:?}", record);
        self.dispatch(&record).await
    }

    async fn receive(
        &mut self,
        child: &mut Child,
        shutdown: &watch::Receiver<Option<Shutdown>>,
    ) -> Result<Exit, SupervisorError> {
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let mut data = BufReader::new(stdout).lines();
        let mut diagnostics = BufReader::new(stderr).lines();
        let mut diagnostics_open = true;

        self.transition(SupervisorState::Running);

        loop {
            if let Some(request) = *shutdown.borrow() {
                return Ok(Exit::Shutdown(request));
            }

            let ready = timeout(POLL_INTERVAL, async {
                // Diagnostics first, so a hardware failure is never masked by pending data
                tokio::select! {
                    biased;
                    line = diagnostics.next_line(), if diagnostics_open => StreamEvent::Diagnostic(line),
                    line = data.next_line() => StreamEvent::Data(line),
                }
            })
            .await;

            let Ok(event) = ready else {
                continue;
            };

            match event {
                StreamEvent::Diagnostic(Ok(Some(line))) => self.diagnostic(&line)?,
                StreamEvent::Diagnostic(Ok(None)) => diagnostics_open = false,
                StreamEvent::Diagnostic(Err(e)) => {
                    warn!(target: self.log.target(), "Unreadable diagnostic output: {}", e)
                }
                StreamEvent::Data(Err(e)) => {
                    error!(target: self.log.target(), "Unreadable decoder output: {}", e)
                }
                StreamEvent::Data(Ok(line)) => {
                    // End of stream reads as an empty line
                    let line = line.unwrap_or_default();
                    match self.handle_line(&line).await {
                        LineOutcome::Stalled => {
                            error!(target: self.log.target(), "No data, restart");
                            self.transition(SupervisorState::Degraded);
                            if diagnostics_open {
                                self.drain(&mut diagnostics).await?;
                            }
                            return Ok(Exit::Stalled);
                        }
                        LineOutcome::Observed(0) => {
                            debug!(target: self.log.target(), "No configured measurement in record")
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, record: &TelemetryRecord) -> LineOutcome {
        let identity = record.identity();
        let Some(entry) = self.registry.resolve(&identity) else {
            warn!(target: self.log.target(), "Device {} ignored", identity);
            return LineOutcome::Ignored;
        };

        debug!(target: self.log.target(), "Pushing message to {}", identity);
        let updated = self.cache.observe(&entry.channel_name, record);

        if let Some(payload) = self.cache.maybe_flush(OffsetDateTime::now_utc()) {
            debug!(target: self.log.target(), "Update: {}", payload.to_update_arg());
            if let Err(e) = self.store.update(&payload).await {
                error!(target: self.log.target(), "Failed to store update: {}", e);
            }
        }

        LineOutcome::Observed(updated)
    }

    fn diagnostic(&self, line: &str) -> Result<(), SupervisorError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        warn!(target: self.log.target(), "{}", line);
        if line.contains(HARDWARE_ABSENT) {
            error!(target: self.log.target(), "No RTL-SDR device");
            return Err(SupervisorError::HardwareAbsent(line.to_string()));
        }
        Ok(())
    }

    /// Read what the decoder printed on its way out
    async fn drain(
        &self,
        diagnostics: &mut Lines<BufReader<ChildStderr>>,
    ) -> Result<(), SupervisorError> {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while let Ok(Ok(Some(line))) = timeout_at(deadline, diagnostics.next_line()).await {
            self.diagnostic(&line)?;
        }
        Ok(())
    }

    /// Stop the decoder if it is still running and reap it
    async fn release(&self, child: &mut Child, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Ok(status)) = timeout(grace, child.wait()).await {
            debug!(target: self.log.target(), "Decoder exited with {}", status);
            return Some(status);
        }

        if let Err(e) = child.start_kill() {
            warn!(target: self.log.target(), "Cannot stop decoder: {}", e);
        }
        match child.wait().await {
            Ok(status) => {
                debug!(target: self.log.target(), "Decoder stopped with {}", status);
                Some(status)
            }
            Err(e) => {
                warn!(target: self.log.target(), "Cannot reap decoder: {}", e);
                None
            }
        }
    }

    fn transition(&mut self, state: SupervisorState) {
        if self.state != state {
            debug!(target: self.log.target(), "{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

fn missing_pipe(name: &str) -> SupervisorError {
    SupervisorError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("decoder {} is not captured", name),
    ))
}

/// Delay before the n-th consecutive failed restart
fn backoff(failures: u32) -> Duration {
    let factor = 1u32
        .checked_shl(failures.saturating_sub(1))
        .unwrap_or(u32::MAX);
    INITIAL_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

fn describe(status: Option<ExitStatus>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown status".to_string())
}
