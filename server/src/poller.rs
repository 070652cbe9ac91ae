use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ConfigError, PollerError};
use crate::session::{SensorSession, SessionState, Settings};
use crate::snapshot::Snapshot;
use crate::transport::RegisterTransport;
use crate::types::Reading;

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    Running,
    StopRequested,
    Stopped,
}

enum Request {
    /// Only interrupts the current wait so the state gets rechecked
    Wake,
    ReadNow(Sender<Reading>),
    Reconfigure(Settings, Sender<Result<(), ConfigError>>),
}

fn lock(state: &Mutex<PollerState>) -> MutexGuard<PollerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cloneable access to a running poller. All requests are executed by the poller
/// thread between two cycles, so they never interleave with its bus transactions.
#[derive(Clone)]
pub struct PollerHandle {
    requests: Sender<Request>,
    state: Arc<Mutex<PollerState>>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *lock(&self.state)
    }

    /// Takes a fresh reading out of cycle. The reading is published like any other.
    pub fn read_now(&self, timeout: Duration) -> Result<Reading, PollerError> {
        let (tx, rx) = mpsc::channel();
        self.send(Request::ReadNow(tx))?;
        Self::wait_for_reply(rx, timeout)
    }

    pub fn reconfigure(&self, settings: Settings, timeout: Duration) -> Result<(), PollerError> {
        let (tx, rx) = mpsc::channel();
        self.send(Request::Reconfigure(settings, tx))?;
        Ok(Self::wait_for_reply(rx, timeout)??)
    }

    fn send(&self, request: Request) -> Result<(), PollerError> {
        if self.state() != PollerState::Running {
            return Err(PollerError::Stopped);
        }
        self.requests.send(request).map_err(|_| PollerError::Stopped)
    }

    fn wait_for_reply<R>(rx: Receiver<R>, timeout: Duration) -> Result<R, PollerError> {
        match rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(PollerError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PollerError::Stopped),
        }
    }
}

/// Background thread that owns a sensor session and publishes one reading per period
pub struct Poller<T: RegisterTransport + Send + 'static> {
    handle: PollerHandle,
    worker: Option<JoinHandle<SensorSession<T>>>,
}

impl<T: RegisterTransport + Send + 'static> Poller<T> {
    /// `forward` receives a copy of every published reading
    pub fn start(
        session: SensorSession<T>,
        period: Duration,
        snapshot: Snapshot,
        forward: Option<Sender<Reading>>,
    ) -> Result<Self, PollerError> {
        if session.state() != SessionState::Configured {
            return Err(PollerError::NotConfigured(session.state()));
        }

        let (tx, rx) = mpsc::channel();
        let state = Arc::new(Mutex::new(PollerState::Running));

        let worker = Worker {
            session,
            period,
            snapshot,
            forward,
            requests: rx,
            state: Arc::clone(&state),
            sequence: 0,
            deferred: vec!(),
        };
        let worker = thread::Builder::new()
            .name("bme280-poller".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            handle: PollerHandle {requests: tx, state},
            worker: Some(worker),
        })
    }

    pub fn state(&self) -> PollerState {
        self.handle.state()
    }

    pub fn handle(&self) -> PollerHandle {
        self.handle.clone()
    }

    /// Stops the poller and waits for its thread. Once this returns the bus is no
    /// longer used, and the closed session is handed back for teardown.
    pub fn stop(mut self) -> Result<SensorSession<T>, PollerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<SensorSession<T>, PollerError> {
        let worker = self.worker.take().ok_or(PollerError::Stopped)?;

        *lock(&self.handle.state) = PollerState::StopRequested;
        // Fails only if the thread is already gone, which join reports below
        let _ = self.handle.requests.send(Request::Wake);

        let result = worker.join().map_err(|_| PollerError::Panicked);
        *lock(&self.handle.state) = PollerState::Stopped;
        result
    }
}

impl<T: RegisterTransport + Send + 'static> Drop for Poller<T> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                error!("Poller did not shut down cleanly: {}", e);
            }
        }
    }
}

struct Worker<T: RegisterTransport> {
    session: SensorSession<T>,
    period: Duration,
    snapshot: Snapshot,
    forward: Option<Sender<Reading>>,
    requests: Receiver<Request>,
    state: Arc<Mutex<PollerState>>,
    sequence: u64,
    /// Read-now requests that arrived while the sensor was settling
    deferred: Vec<Sender<Reading>>,
}

impl<T: RegisterTransport> Worker<T> {
    fn run(mut self) -> SensorSession<T> {
        info!("Poller started, one reading every {:?}", self.period);

        let settled = Instant::now() + self.session.settle_time();
        if self.wait_until(settled, false) {
            let mut next = Instant::now();
            while !self.stop_requested() {
                let reading = self.cycle();
                for reply in self.deferred.drain(..) {
                    let _ = reply.send(reading);
                }

                next += self.period;
                let now = Instant::now();
                if next < now {
                    warn!("Poller is {:?} behind schedule", now - next);
                    next = now;
                }
                if !self.wait_until(next, true) {
                    break;
                }
            }
        }

        self.session.close();
        info!("Poller stopped after {} readings", self.sequence);
        self.session
    }

    fn stop_requested(&self) -> bool {
        *lock(&self.state) != PollerState::Running
    }

    /// Sleeps until `deadline` while handling requests. Returns false if the
    /// poller should stop instead of starting another cycle.
    fn wait_until(&mut self, deadline: Instant, serve_reads: bool) -> bool {
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            match self.requests.recv_timeout(deadline - now) {
                Ok(Request::Wake) => {}
                Ok(Request::ReadNow(reply)) => {
                    if serve_reads {
                        let reading = self.cycle();
                        let _ = reply.send(reading);
                    }
                    else {
                        self.deferred.push(reply);
                    }
                }
                Ok(Request::Reconfigure(settings, reply)) => {
                    let result = self.session.reconfigure(settings);
                    let reconfigured = result.is_ok();
                    let _ = reply.send(result);

                    if reconfigured {
                        let settled = Instant::now() + self.session.settle_time();
                        if !self.wait_until(settled, false) {
                            return false;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => return true,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn cycle(&mut self) -> Reading {
        self.sequence += 1;
        let reading = match self.session.acquire(self.sequence) {
            Ok(reading) => reading,
            Err(e) => {
                error!("Reading {} failed: {}", self.sequence, e);
                Reading::absent(self.sequence)
            }
        };

        if reading.is_empty() {
            warn!("Reading {} has no data", reading.sequence);
        }
        else if !reading.is_complete() {
            warn!("Reading {} is partial", reading.sequence);
        }
        debug!("Reading {}: {:?}", reading.sequence, reading);

        self.snapshot.publish(reading);

        let closed = self.forward
            .as_ref()
            .map_or(false, |forward| forward.send(reading).is_err());
        if closed {
            warn!("Delivery channel closed, readings are no longer forwarded");
            self.forward = None;
        }

        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use crate::session::Oversampling;
    use crate::transport::mock::MockBus;

    const FAST: Duration = Duration::from_millis(10);
    const SLOW: Duration = Duration::from_secs(60);

    fn session(bus: &MockBus) -> SensorSession<MockBus> {
        let mut session = SensorSession::new(bus.clone(), Settings::default()).unwrap();
        session.configure().unwrap();
        session
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn refuses_unconfigured_session() {
        let bus = MockBus::bme280();
        let session = SensorSession::new(bus, Settings::default()).unwrap();

        match Poller::start(session, FAST, Snapshot::new(), None) {
            Err(PollerError::NotConfigured(SessionState::Uninitialized)) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn publishes_and_forwards_in_order() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let (tx, rx) = mpsc::channel();
        let poller = Poller::start(session(&bus), FAST, snapshot.clone(), Some(tx)).unwrap();

        let readings = (0..3).map(|_| rx.recv().unwrap()).collect::<Vec<_>>();
        poller.stop().unwrap();

        let sequences = readings.iter().map(|r| r.sequence).collect::<Vec<_>>();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(readings.iter().all(|r| r.temperature == Some(2508)));
        assert!(snapshot.latest().unwrap().sequence >= 3);
    }

    #[test]
    fn no_bus_access_after_stop() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), Duration::from_millis(1), snapshot.clone(), None)
            .unwrap();
        let handle = poller.handle();

        wait_for(|| snapshot.latest().map(|r| r.sequence >= 5).unwrap_or(false));
        let session = poller.stop().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(handle.state(), PollerState::Stopped);

        let after_stop = bus.transaction_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(bus.transaction_count(), after_stop);
    }

    #[test]
    fn stop_interrupts_the_period_wait() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), SLOW, snapshot.clone(), None).unwrap();

        wait_for(|| snapshot.latest().is_ok());
        let started = Instant::now();
        poller.stop().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stop_interrupts_the_settle_wait() {
        let bus = MockBus::bme280();
        let slow = Settings {
            temperature_oversampling: Oversampling::X16,
            pressure_oversampling: Oversampling::X16,
            humidity_oversampling: Oversampling::X16,
            ..Settings::default()
        };
        let mut session = SensorSession::new(bus.clone(), slow).unwrap();
        session.configure().unwrap();
        let settle = session.settle_time();
        assert!(settle >= Duration::from_millis(100));

        let snapshot = Snapshot::new();
        let transactions = bus.transaction_count();
        let poller = Poller::start(session, SLOW, snapshot.clone(), None).unwrap();

        let started = Instant::now();
        poller.stop().unwrap();
        assert!(started.elapsed() < settle / 2);

        // Only the three control writes from close, no measurement block was read
        assert_eq!(bus.transaction_count(), transactions + 3);
        assert_eq!(bus.writes.lock().unwrap().last(), Some(&(0xF4, 0xB4)));
        assert_eq!(snapshot.latest(), Err(SnapshotError::NoData));
    }

    #[test]
    fn queries_between_cycles_do_not_touch_the_bus() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        assert_eq!(snapshot.latest(), Err(SnapshotError::NoData));

        let poller = Poller::start(session(&bus), SLOW, snapshot.clone(), None).unwrap();
        wait_for(|| snapshot.latest().is_ok());

        let transactions = bus.transaction_count();
        let first = snapshot.latest().unwrap();
        let second = snapshot.latest().unwrap();
        assert_eq!(first, second);
        assert_eq!(bus.transaction_count(), transactions);

        poller.stop().unwrap();
    }

    #[test]
    fn partial_readings_are_published() {
        let bus = MockBus::bme280();
        bus.fail(0xF7);
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), FAST, snapshot.clone(), None).unwrap();

        wait_for(|| snapshot.latest().is_ok());
        let reading = snapshot.latest().unwrap();
        assert_eq!(reading.temperature, Some(2508));
        assert_eq!(reading.pressure, None);
        assert_eq!(reading.humidity, Some(56317));

        poller.stop().unwrap();
    }

    #[test]
    fn failed_cycles_replace_stale_readings() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), FAST, snapshot.clone(), None).unwrap();
        wait_for(|| snapshot.latest().is_ok());

        for register in &[0xF7, 0xFA, 0xFD] {
            bus.fail(*register);
        }
        wait_for(|| snapshot.latest().map(|r| r.is_empty()).unwrap_or(false));

        poller.stop().unwrap();
    }

    #[test]
    fn read_now_goes_through_the_poller() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), SLOW, snapshot.clone(), None).unwrap();
        let handle = poller.handle();

        let reading = handle.read_now(Duration::from_secs(5)).unwrap();
        assert_eq!(reading.temperature, Some(2508));

        let fresh = handle.read_now(Duration::from_secs(5)).unwrap();
        assert!(fresh.sequence > reading.sequence);
        assert_eq!(snapshot.latest().unwrap().sequence, fresh.sequence);

        poller.stop().unwrap();
        match handle.read_now(Duration::from_secs(1)) {
            Err(PollerError::Stopped) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejected_reconfiguration_keeps_polling() {
        let bus = MockBus::bme280();
        let snapshot = Snapshot::new();
        let poller = Poller::start(session(&bus), FAST, snapshot.clone(), None).unwrap();
        let handle = poller.handle();

        bus.fail(0xF5);
        let settings = Settings {filter: crate::session::Filter::X4, ..Settings::default()};
        match handle.reconfigure(settings, Duration::from_secs(5)) {
            Err(PollerError::Config(_)) => {}
            other => panic!("unexpected {:?}", other),
        }

        let before = snapshot.latest().map(|r| r.sequence).unwrap_or(0);
        wait_for(|| snapshot.latest().map(|r| r.sequence > before).unwrap_or(false));

        let session = poller.stop().unwrap();
        assert_eq!(session.settings(), Settings::default());
    }
}
