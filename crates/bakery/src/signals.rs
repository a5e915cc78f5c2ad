//! Shutdown requests from the operating system.
//!
//! The first request stops the bake and lets the workers finish the task in
//! hand. A second one, while they are still draining, aborts them.

use tokio::signal;

/// What the bakery should do about a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Stop taking tasks and wait for running ones
    Drain,
    /// Abandon running tasks
    Abort,
}

impl Shutdown {
    /// Maps the n-th request (counting from 1) to an action
    pub fn for_request(count: usize) -> Self {
        if count <= 1 {
            Shutdown::Drain
        } else {
            Shutdown::Abort
        }
    }
}

/// Listens for SIGINT and SIGTERM (Ctrl+C on Windows) for the whole run.
pub struct ShutdownSignals {
    received: usize,
    #[cfg(unix)]
    sigint: signal::unix::Signal,
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
}

impl ShutdownSignals {
    /// Registers the handlers. Must be called from within the runtime.
    pub fn install() -> anyhow::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};
            Ok(Self {
                received: 0,
                sigint: signal(SignalKind::interrupt())?,
                sigterm: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self { received: 0 })
        }
    }

    /// Waits for the next request and returns its name with the action it
    /// calls for.
    pub async fn next(&mut self) -> anyhow::Result<(&'static str, Shutdown)> {
        #[cfg(unix)]
        let name = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
        };
        #[cfg(not(unix))]
        let name = {
            signal::ctrl_c().await?;
            "Ctrl+C"
        };

        self.received += 1;
        Ok((name, Shutdown::for_request(self.received)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_request_aborts() {
        assert_eq!(Shutdown::for_request(1), Shutdown::Drain);
        assert_eq!(Shutdown::for_request(2), Shutdown::Abort);
        assert_eq!(Shutdown::for_request(5), Shutdown::Abort);
    }

    #[tokio::test]
    async fn test_install_inside_runtime() {
        let signals = ShutdownSignals::install().unwrap();
        assert_eq!(signals.received, 0);
    }
}
