//! AT session engine.
//!
//! One command is in flight at a time. Every received line is routed by
//! the channel state:
//!
//! ```text
//!   None ──send──> Sent ──"OK"──────────────> Ok
//!                   │ ──"ERROR"/"+CME ERROR"─> Error
//!                   │ ──no result in time───> Timeout
//!                   └──other line──> intermediate response (stays Sent)
//!
//!   not Sent: line ──> unsolicited report table
//! ```
//!
//! Waiting is cooperative: the session polls the receive buffer against a
//! [`Clock`] until the condition holds or the window closes.

use crate::clock::Clock;
use crate::command::{format_command, AtAction, AtCommand};
use crate::error::{AtError, WaitPhase};
use crate::report::ReportTable;
use crate::ring::{LineExtractor, RxHandle};
use crate::transport::SerialTransport;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Default send-ready window (5 s).
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default response window (10 s).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default receive ring and line buffer size.
pub const DEFAULT_RX_BUFFER_SIZE: usize = 200;

/// Default maximum command length.
pub const DEFAULT_TX_BUFFER_SIZE: usize = 200;

/// Smallest usable receive ring.
pub const MIN_RX_BUFFER_SIZE: usize = 16;

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtState {
    /// Nothing sent yet.
    #[default]
    None,
    /// Command transmitted, no terminal result yet.
    Sent,
    Ok,
    Timeout,
    Error,
}

impl AtState {
    /// Returns whether a new command may be issued without override.
    pub fn is_ready(&self) -> bool {
        matches!(self, AtState::Ok | AtState::None)
    }

    /// Returns whether this is a final result of the last command.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AtState::Ok | AtState::Error)
    }
}

impl fmt::Display for AtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtState::None => write!(f, "NONE"),
            AtState::Sent => write!(f, "SENT"),
            AtState::Ok => write!(f, "OK"),
            AtState::Timeout => write!(f, "TIMEOUT"),
            AtState::Error => write!(f, "ERROR"),
        }
    }
}

/// The last command issued and where it stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtInfo {
    pub last_command: Option<String>,
    pub last_action: AtAction,
    pub state: AtState,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a new command waits for the previous one to finish.
    pub send_timeout: Duration,
    /// How long a command waits for `OK` or `ERROR`.
    pub response_timeout: Duration,
    /// Receive ring capacity.
    pub rx_buffer_size: usize,
    /// Longest line, terminator included.
    pub line_buffer_size: usize,
    /// Longest command, terminator included.
    pub tx_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            line_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            tx_buffer_size: DEFAULT_TX_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the ring size; the line buffer never exceeds it.
    pub fn with_rx_buffer_size(mut self, size: usize) -> Self {
        self.rx_buffer_size = size.max(MIN_RX_BUFFER_SIZE);
        self.line_buffer_size = self.line_buffer_size.min(self.rx_buffer_size);
        self
    }

    pub fn with_line_buffer_size(mut self, size: usize) -> Self {
        self.line_buffer_size = size.clamp(MIN_RX_BUFFER_SIZE, self.rx_buffer_size);
        self
    }

    pub fn with_tx_buffer_size(mut self, size: usize) -> Self {
        self.tx_buffer_size = size;
        self
    }
}

type ResultHook = Box<dyn FnMut(&AtInfo, bool)>;
type LineHook = Box<dyn FnMut(&AtInfo, &str)>;

#[derive(Default)]
struct Hooks {
    on_result: Option<ResultHook>,
    on_response: Option<LineHook>,
    on_cme_error: Option<LineHook>,
}

/// AT command session over a serial transport.
pub struct AtSession<T, C> {
    config: SessionConfig,
    transport: T,
    clock: C,
    rx: RxHandle,
    extractor: LineExtractor,
    info: AtInfo,
    reports: ReportTable,
    hooks: Hooks,
    last_tx_ms: Option<u64>,
    last_rx_ms: Option<u64>,
}

impl<T: SerialTransport, C: Clock> AtSession<T, C> {
    /// Creates a session with its own receive buffer.
    pub fn new(config: SessionConfig, transport: T, clock: C) -> Self {
        let rx = RxHandle::new(config.rx_buffer_size);
        Self::with_rx(config, rx, transport, clock)
    }

    /// Creates a session reading from an existing receive buffer.
    pub fn with_rx(config: SessionConfig, rx: RxHandle, transport: T, clock: C) -> Self {
        let extractor = LineExtractor::new(config.line_buffer_size);
        Self {
            config,
            transport,
            clock,
            rx,
            extractor,
            info: AtInfo::default(),
            reports: ReportTable::new(),
            hooks: Hooks::default(),
            last_tx_ms: None,
            last_rx_ms: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle for whatever fills the receive buffer.
    pub fn rx_handle(&self) -> RxHandle {
        self.rx.clone()
    }

    pub fn info(&self) -> &AtInfo {
        &self.info
    }

    pub fn state(&self) -> AtState {
        self.info.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Unsolicited report routing table.
    pub fn reports_mut(&mut self) -> &mut ReportTable {
        &mut self.reports
    }

    /// Tick of the last transmitted command.
    pub fn last_tx_ms(&self) -> Option<u64> {
        self.last_tx_ms
    }

    /// Tick of the last received line.
    pub fn last_rx_ms(&self) -> Option<u64> {
        self.last_rx_ms
    }

    /// Called with `true` on `OK` and `false` on `ERROR`.
    pub fn on_result(&mut self, hook: impl FnMut(&AtInfo, bool) + 'static) {
        self.hooks.on_result = Some(Box::new(hook));
    }

    /// Called with each data line a command emits before its result.
    pub fn on_response(&mut self, hook: impl FnMut(&AtInfo, &str) + 'static) {
        self.hooks.on_response = Some(Box::new(hook));
    }

    /// Called with the full `+CME ERROR` line.
    pub fn on_cme_error(&mut self, hook: impl FnMut(&AtInfo, &str) + 'static) {
        self.hooks.on_cme_error = Some(Box::new(hook));
    }

    /// Issues a command and waits for its result.
    ///
    /// Waits for the previous command to leave `Sent`, then requires the
    /// channel to be `Ok` or `None`. Returns the terminal state, `Ok` or
    /// `Error`. A missing result leaves the channel in `Timeout`, after
    /// which only [`send_override`](Self::send_override) can proceed.
    pub fn send<A: AtCommand + ?Sized>(
        &mut self,
        command: &A,
        action: AtAction,
        param: Option<&str>,
    ) -> Result<AtState, AtError> {
        let line = self.render(command, action, param)?;

        self.wait_send_ready()?;
        if !self.info.state.is_ready() {
            error!(
                state = %self.info.state,
                last_command = ?self.info.last_command,
                "previous command state not cleared"
            );
            return Err(AtError::ProtocolViolation {
                state: self.info.state,
            });
        }

        self.issue(command.mnemonic(), action, &line)?;
        self.wait_response()
    }

    /// Issues a command without checking or waiting on the channel state.
    ///
    /// Clears a stuck `Sent`, `Error` or `Timeout` state. The result of the
    /// command arrives through the normal line routing.
    pub fn send_override<A: AtCommand + ?Sized>(
        &mut self,
        command: &A,
        action: AtAction,
        param: Option<&str>,
    ) -> Result<(), AtError> {
        let line = self.render(command, action, param)?;
        if self.info.state == AtState::Sent {
            warn!(last_command = ?self.info.last_command, "overriding command in flight");
        }
        self.issue(command.mnemonic(), action, &line)
    }

    fn render<A: AtCommand + ?Sized>(
        &self,
        command: &A,
        action: AtAction,
        param: Option<&str>,
    ) -> Result<String, AtError> {
        let line = format_command(command.mnemonic(), action, param)?;
        if line.len() > self.config.tx_buffer_size {
            return Err(AtError::CommandTooLong {
                len: line.len(),
                max: self.config.tx_buffer_size,
            });
        }
        Ok(line)
    }

    fn issue(&mut self, mnemonic: &str, action: AtAction, line: &str) -> Result<(), AtError> {
        self.info = AtInfo {
            last_command: Some(mnemonic.to_string()),
            last_action: action,
            state: AtState::Sent,
        };
        self.last_tx_ms = Some(self.clock.now_ms());
        debug!(command = line.trim_end(), "tx");

        if let Err(e) = self.transport.transmit(line.as_bytes()) {
            warn!(error = %e, command = mnemonic, "transmit failed");
            self.info.state = AtState::Error;
            return Err(e.into());
        }
        Ok(())
    }

    /// Polls until the channel leaves `Sent`, or marks it `Timeout`.
    pub fn wait_send_ready(&mut self) -> Result<(), AtError> {
        let window = self.config.send_timeout;
        self.wait_for(WaitPhase::SendReady, window, |s| s != AtState::Sent)
            .map(|_| ())
    }

    /// Polls until the channel reaches `Ok` or `Error`, or marks it `Timeout`.
    pub fn wait_response(&mut self) -> Result<AtState, AtError> {
        let window = self.config.response_timeout;
        self.wait_for(WaitPhase::Response, window, |s| s.is_terminal())
    }

    fn wait_for(
        &mut self,
        phase: WaitPhase,
        window: Duration,
        done: impl Fn(AtState) -> bool,
    ) -> Result<AtState, AtError> {
        let start = self.clock.now_ms();
        let window_ms = window.as_millis() as u64;
        loop {
            self.poll()?;
            if done(self.info.state) {
                return Ok(self.info.state);
            }
            let elapsed = self.clock.now_ms().saturating_sub(start);
            if elapsed >= window_ms {
                warn!(
                    %phase,
                    elapsed_ms = elapsed,
                    last_command = ?self.info.last_command,
                    "AT wait timed out"
                );
                self.info.state = AtState::Timeout;
                return Err(AtError::Timeout {
                    phase,
                    elapsed_ms: elapsed,
                });
            }
            self.clock.idle();
        }
    }

    /// Polls until `condition` holds or `timeout` elapses.
    ///
    /// Received lines keep flowing to their handlers meanwhile. Returns
    /// whether the condition was met.
    pub fn wait_until(&mut self, timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<bool, AtError> {
        let start = self.clock.now_ms();
        let window_ms = timeout.as_millis() as u64;
        loop {
            self.poll()?;
            if condition() {
                return Ok(true);
            }
            if self.clock.now_ms().saturating_sub(start) >= window_ms {
                return Ok(false);
            }
            self.clock.idle();
        }
    }

    /// Extracts and routes every complete line in the receive buffer.
    ///
    /// Returns the number of lines handled.
    pub fn poll(&mut self) -> Result<usize, AtError> {
        self.transport.poll();
        let mut handled = 0;
        loop {
            let line = {
                let mut rx = self.rx.lock();
                match self.extractor.next_line(&mut rx)? {
                    Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                    None => break,
                }
            };
            self.handle_line(&line);
            handled += 1;
        }
        Ok(handled)
    }

    /// Routes one complete line.
    pub fn handle_line(&mut self, line: &str) {
        self.last_rx_ms = Some(self.clock.now_ms());

        if self.info.state != AtState::Sent {
            let matched = self.reports.dispatch(line);
            trace!(line, prefix = ?matched, "unsolicited report");
            return;
        }

        if line.starts_with("OK") {
            self.info.state = AtState::Ok;
            debug!(command = ?self.info.last_command, "OK");
            if let Some(hook) = self.hooks.on_result.as_mut() {
                hook(&self.info, true);
            }
        } else if line.starts_with("ERROR") {
            self.info.state = AtState::Error;
            info!(command = ?self.info.last_command, "command returned ERROR");
            if let Some(hook) = self.hooks.on_result.as_mut() {
                hook(&self.info, false);
            }
        } else if line.starts_with("+CME ERROR") {
            self.info.state = AtState::Error;
            info!(command = ?self.info.last_command, line, "command returned CME error");
            if let Some(hook) = self.hooks.on_cme_error.as_mut() {
                hook(&self.info, line);
            }
        } else {
            trace!(command = ?self.info.last_command, line, "intermediate response");
            if let Some(hook) = self.hooks.on_response.as_mut() {
                hook(&self.info, line);
            }
        }
    }
}

impl<T, C> fmt::Debug for AtSession<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtSession")
            .field("config", &self.config)
            .field("info", &self.info)
            .field("reports", &self.reports)
            .field("last_tx_ms", &self.last_tx_ms)
            .field("last_rx_ms", &self.last_rx_ms)
            .finish()
    }
}
