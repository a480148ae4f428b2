//! Signal delivery as readiness events.
//!
//! SIGINT/SIGTERM/SIGUSR1 are routed through a self-pipe (signal-hook's
//! mio adapter) registered with the poll, so signal arrival wakes the
//! readiness wait like any other event and no loop state is ever touched
//! from signal context.

use std::io;

use mio::{Interest, Registry, Token};
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook_mio::v1_0::Signals;

/// A control event decoded from a pending signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGINT or SIGTERM: begin graceful shutdown.
    Stop,
    /// SIGUSR1: dump metrics to stdout at the next loop iteration.
    DumpMetrics,
}

/// Pollable source of control signals.
pub struct SignalSource {
    signals: Signals,
}

impl SignalSource {
    pub fn new() -> io::Result<Self> {
        let signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;
        Ok(Self { signals })
    }

    /// Register the source with the poll registry.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.signals, token, Interest::READABLE)
    }

    /// Drain every signal that arrived since the last call.
    pub fn drain(&mut self) -> Vec<SignalEvent> {
        self.signals
            .pending()
            .filter_map(|signal| match signal {
                SIGINT | SIGTERM => Some(SignalEvent::Stop),
                SIGUSR1 => Some(SignalEvent::DumpMetrics),
                _ => None,
            })
            .collect()
    }
}
