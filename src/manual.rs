//! User-toggled inhibit with optional expiry.
//!
//! Clicks, expiry timers and the stop request are all handled on one event loop, one at a time.
//! Whichever of "timer fired" and "toggled off" comes second finds the state already
//! `Uninhibited` and does nothing, so the manual lock is released exactly once.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use calloop::channel::{self, Channel, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal, RegistrationToken};

use crate::bridge::Bridge;
use crate::notification::Notifier;
use crate::registry::Owner;
use crate::utils::format_duration;

const WHO: &str = "manual";
const WHY: &str = "toggled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualState {
    Uninhibited,
    Inhibited {
        cookie: u32,
        deadline: Option<Instant>,
    },
}

impl ManualState {
    /// Time left until the manual inhibit expires, if it is on and has an expiry.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self {
            ManualState::Inhibited {
                deadline: Some(deadline),
                ..
            } => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }
}

/// What a toggle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The manual lock was placed. If `timeout` is set, an expiry timer for `generation` must be
    /// armed.
    Inhibited {
        generation: u64,
        timeout: Option<Duration>,
    },
    Uninhibited,
    /// Placing the lock failed.
    Unchanged,
}

/// The manual inhibit state machine.
pub struct ManualInhibit {
    bridge: Arc<Bridge>,
    notifier: Box<dyn Notifier>,
    timeout: Option<Duration>,
    state: ManualState,
    // Bumped on every inhibit so that a timer armed for an earlier one can't release a later one.
    generation: u64,
    notification: u32,
}

impl ManualInhibit {
    pub fn new(bridge: Arc<Bridge>, notifier: Box<dyn Notifier>, timeout: Option<Duration>) -> Self {
        Self {
            bridge,
            notifier,
            timeout: timeout.filter(|timeout| !timeout.is_zero()),
            state: ManualState::Uninhibited,
            generation: 0,
            notification: 0,
        }
    }

    pub fn state(&self) -> ManualState {
        self.state
    }

    pub fn toggle(&mut self) -> Transition {
        match self.state {
            ManualState::Uninhibited => self.inhibit(),
            ManualState::Inhibited { cookie, .. } => {
                if let Some(left) = self.state.remaining(Instant::now()) {
                    debug!("clearing manual inhibit {} early", format_duration(left));
                }
                self.release(cookie);
                self.notification = self
                    .notifier
                    .notify("Manual screen lock inhibit cleared", self.notification);
                Transition::Uninhibited
            }
        }
    }

    /// Handles a fired expiry timer.
    ///
    /// Returns whether the manual lock was released.
    pub fn expire(&mut self, generation: u64) -> bool {
        match self.state {
            ManualState::Inhibited { cookie, .. } if generation == self.generation => {
                debug!("manual inhibit timeout reached");
                self.release(cookie);
                self.notifier
                    .notify("Released manual inhibit after timeout.", 0);
                true
            }
            _ => {
                trace!("ignoring stale manual inhibit timeout");
                false
            }
        }
    }

    fn inhibit(&mut self) -> Transition {
        let cookie = match self.bridge.inhibit(Owner::Local, WHO, WHY) {
            Ok(cookie) => cookie,
            Err(err) => {
                warn!("error manually inhibiting: {err:?}");
                return Transition::Unchanged;
            }
        };

        self.generation += 1;
        self.state = ManualState::Inhibited {
            cookie,
            deadline: self.timeout.map(|timeout| Instant::now() + timeout),
        };

        let mut message = String::from("Manual screen lock inhibit placed.");
        if let Some(timeout) = self.timeout {
            message.push_str(&format!(" It will expire in {}.", format_duration(timeout)));
        }
        self.notification = self.notifier.notify(&message, self.notification);

        Transition::Inhibited {
            generation: self.generation,
            timeout: self.timeout,
        }
    }

    fn release(&mut self, cookie: u32) {
        // Whatever happens, the lock is no longer in the registry.
        if let Err(err) = self.bridge.un_inhibit(&Owner::Local, cookie) {
            warn!("error releasing manual inhibit: {err:?}");
        }
        self.state = ManualState::Uninhibited;
    }
}

enum ControllerEvent {
    Toggle,
    Stop,
}

/// Sends toggle requests to the controller. Cheap to clone.
#[derive(Clone)]
pub struct Toggler(Sender<ControllerEvent>);

impl Toggler {
    pub fn toggle(&self) {
        if self.0.send(ControllerEvent::Toggle).is_err() {
            warn!("manual inhibit controller is not running, ignoring toggle");
        }
    }
}

/// Handle to the thread running the manual inhibit event loop.
pub struct ManualController {
    to_controller: Sender<ControllerEvent>,
    thread: JoinHandle<ManualState>,
}

struct ControllerState {
    manual: ManualInhibit,
    timer: Option<RegistrationToken>,
    handle: LoopHandle<'static, ControllerState>,
    signal: LoopSignal,
}

impl ControllerState {
    fn on_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Toggle => match self.manual.toggle() {
                Transition::Inhibited {
                    generation,
                    timeout: Some(timeout),
                } => self.arm_timer(generation, timeout),
                Transition::Inhibited { timeout: None, .. } | Transition::Unchanged => (),
                Transition::Uninhibited => self.cancel_timer(),
            },
            ControllerEvent::Stop => {
                self.cancel_timer();
                self.signal.stop();
            }
        }
    }

    fn arm_timer(&mut self, generation: u64, timeout: Duration) {
        self.cancel_timer();

        let res = self
            .handle
            .insert_source(Timer::from_duration(timeout), move |_, _, state| {
                state.timer = None;
                state.manual.expire(generation);
                TimeoutAction::Drop
            });

        match res {
            Ok(token) => self.timer = Some(token),
            Err(err) => warn!("error arming manual inhibit timer: {:?}", err.error),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            trace!("manual inhibit timeout was cancelled");
            self.handle.remove(token);
        }
    }
}

impl ManualController {
    pub fn start(manual: ManualInhibit) -> anyhow::Result<Self> {
        let (to_controller, from_main) = channel::channel();

        let thread = thread::Builder::new()
            .name(String::from("Manual Inhibit"))
            .spawn(move || match run(manual, from_main) {
                Ok(state) => state,
                Err(err) => {
                    warn!("manual inhibit controller failed: {err:?}");
                    ManualState::Uninhibited
                }
            })
            .context("error spawning the manual inhibit thread")?;

        Ok(Self {
            to_controller,
            thread,
        })
    }

    pub fn toggler(&self) -> Toggler {
        Toggler(self.to_controller.clone())
    }

    /// Cancels any pending expiry and waits for the event loop to exit.
    ///
    /// The manual lock, if any, stays in the registry. Returns the final state.
    pub fn stop(self) -> ManualState {
        if self.to_controller.send(ControllerEvent::Stop).is_err() {
            debug!("manual inhibit controller had already exited");
        }

        match self.thread.join() {
            Ok(state) => state,
            Err(_) => {
                warn!("manual inhibit thread panicked");
                ManualState::Uninhibited
            }
        }
    }
}

fn run(manual: ManualInhibit, from_main: Channel<ControllerEvent>) -> anyhow::Result<ManualState> {
    let mut event_loop: EventLoop<ControllerState> =
        EventLoop::try_new().context("error creating the manual inhibit event loop")?;
    let handle = event_loop.handle();

    handle
        .insert_source(from_main, |event, _, state| match event {
            channel::Event::Msg(event) => state.on_event(event),
            channel::Event::Closed => state.on_event(ControllerEvent::Stop),
        })
        .map_err(|err| err.error)?;

    let mut state = ControllerState {
        manual,
        timer: None,
        handle,
        signal: event_loop.get_signal(),
    };

    debug!("manual inhibit controller started");
    event_loop.run(None, &mut state, |_| ())?;
    debug!("manual inhibit controller stopped");

    Ok(state.manual.state())
}
