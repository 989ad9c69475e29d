//! We set a signal handler with `calloop::signals::Signals::new`.
//! This does two things:
//! 1. It blocks the thread from receiving these signals normally (pthread_sigmask)
//! 2. It creates a signalfd to read them in the event loop.
//!
//! The sigmask is inherited by threads, and zbus spawns its own threads as soon as a connection
//! is made. So we block the signals early, before any other thread exists. Otherwise a signal
//! could land on one of those threads and kill the process without a clean shutdown.

use calloop::signals::Signal;
use calloop::LoopSignal;

pub use platform::*;

use crate::manual::Toggler;

/// Signals that make the bridge shut down.
pub const QUIT_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Signal that toggles the manual inhibit.
pub const TOGGLE_SIGNAL: Signal = Signal::SIGUSR1;

/// Decides what a received signal does to the running bridge.
pub struct SignalRouter {
    toggler: Toggler,
    stop: LoopSignal,
}

impl SignalRouter {
    /// `stop` belongs to the loop whose exit starts the shutdown.
    pub fn new(toggler: Toggler, stop: LoopSignal) -> Self {
        Self { toggler, stop }
    }

    pub fn on_signal(&mut self, signal: Signal) {
        if signal == TOGGLE_SIGNAL {
            info!("received {signal:?}, toggling manual inhibit");
            self.toggler.toggle();
        } else {
            info!("quitting due to receiving signal {signal:?}");
            self.stop.stop();
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::io;

    use calloop::signals::Signal;

    // FIXME: implement for FreeBSD. But probably, that should be done in calloop::signals.
    pub fn listen<D>(
        _handle: &calloop::LoopHandle<'static, D>,
        _on_signal: impl FnMut(Signal, &mut D) + 'static,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    pub fn block_early() -> io::Result<()> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::{io, mem};

    use calloop::signals::{Signal, Signals};

    use super::{QUIT_SIGNALS, TOGGLE_SIGNAL};

    pub fn listen<D>(
        handle: &calloop::LoopHandle<'static, D>,
        mut on_signal: impl FnMut(Signal, &mut D) + 'static,
    ) -> anyhow::Result<()> {
        let mut signals = QUIT_SIGNALS.to_vec();
        signals.push(TOGGLE_SIGNAL);

        handle
            .insert_source(Signals::new(&signals)?, move |event, _, data| {
                on_signal(event.signal(), data)
            })
            .map_err(|err| err.error)?;
        Ok(())
    }

    // We block the signals early, so that they apply to all threads.
    // They are then blocked *again* by the `Signals` source. That's fine.
    pub fn block_early() -> io::Result<()> {
        set_sigmask(&preferred_sigset()?)
    }

    fn empty_sigset() -> io::Result<libc::sigset_t> {
        let mut sigset = mem::MaybeUninit::uninit();
        if unsafe { libc::sigemptyset(sigset.as_mut_ptr()) } == 0 {
            Ok(unsafe { sigset.assume_init() })
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn preferred_sigset() -> io::Result<libc::sigset_t> {
        let mut set = empty_sigset()?;
        unsafe {
            add_signal(&mut set, libc::SIGINT)?;
            add_signal(&mut set, libc::SIGTERM)?;
            add_signal(&mut set, libc::SIGHUP)?;
            add_signal(&mut set, libc::SIGUSR1)?;
        }
        Ok(set)
    }

    // SAFETY: `signum` must be a valid signal number.
    unsafe fn add_signal(set: &mut libc::sigset_t, signum: libc::c_int) -> io::Result<()> {
        if unsafe { libc::sigaddset(set, signum) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn set_sigmask(set: &libc::sigset_t) -> io::Result<()> {
        let oldset = std::ptr::null_mut(); // ignore old mask
        if unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, set, oldset) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    use calloop::timer::{TimeoutAction, Timer};
    use calloop::EventLoop;

    use super::*;
    use crate::bridge::Bridge;
    use crate::manual::{ManualController, ManualInhibit, ManualState};
    use crate::registry::Registry;
    use crate::tests::fixture::{FakeGateway, RecordingNotifier, RecordingSink};

    /// Delivers `signal` inside a running loop.
    ///
    /// Returns whether the signal stopped the loop, and whether it left the manual inhibit on.
    fn deliver(signal: Signal) -> (bool, bool) {
        let registry = Registry::new(Box::new(FakeGateway::default()));
        let bridge = Arc::new(Bridge::new(registry, Box::new(RecordingSink::default())));
        let manual = ManualController::start(ManualInhibit::new(
            bridge,
            Box::new(RecordingNotifier::default()),
            None,
        ))
        .unwrap();

        let mut event_loop: EventLoop<SignalRouter> = EventLoop::try_new().unwrap();
        let handle = event_loop.handle();
        handle.insert_idle(move |router| router.on_signal(signal));

        let timed_out = Rc::new(Cell::new(false));
        let flag = timed_out.clone();
        let stop = event_loop.get_signal();
        handle
            .insert_source(
                Timer::from_duration(Duration::from_millis(200)),
                move |_, _, _| {
                    flag.set(true);
                    stop.stop();
                    TimeoutAction::Drop
                },
            )
            .map_err(|err| err.error)
            .unwrap();

        let mut router = SignalRouter::new(manual.toggler(), event_loop.get_signal());
        event_loop.run(None, &mut router, |_| ()).unwrap();

        // The controller handles the toggle before the stop request sent after it.
        let state = manual.stop();
        (!timed_out.get(), matches!(state, ManualState::Inhibited { .. }))
    }

    #[test]
    fn toggle_signal_toggles_without_quitting() {
        assert_eq!(deliver(TOGGLE_SIGNAL), (false, true));
    }

    #[test]
    fn quit_signals_stop_the_loop() {
        for signal in QUIT_SIGNALS {
            assert_eq!(deliver(signal), (true, false), "{signal:?}");
        }
    }
}
