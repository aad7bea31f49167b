//! The polling engine.
//!
//! One background thread owns the backend and every open device handle.
//! Each tick it:
//! 1. re-enumerates the backend (rate limited), opening new devices and
//!    disconnecting ones that vanished;
//! 2. binds waiting connections and sends them `Connected`;
//! 3. drains a bounded number of reports from every open device, decodes
//!    them and moves the events into the queue of the connection that owns
//!    that device;
//! 4. disconnects devices that were removed or kept failing reads.
//!
//! A fault on one device (open error, read error, malformed report) is
//! logged, counted and contained; only [`Dispatcher::stop`] ends the loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::backends::HidBackend;
use crate::codec::{self, DecodeContext};
use crate::config::Config;
use crate::connection::Connection;
use crate::device::{DeviceId, HidDeviceInfo};
use crate::error::NdofError;
use crate::event::DeviceEvent;
use crate::metadata::Catalog;
use crate::registry::{DeviceRegistry, Unregistered};

/// Largest report we expect from any NDOF device.
const REPORT_BUFFER_LEN: usize = 64;

/// Point-in-time fault and traffic counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Reports decoded successfully.
    pub reports: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
    pub open_errors: u64,
    /// `Connected` events delivered.
    pub connects: u64,
    /// Devices disconnected (removed, failing, or closed at shutdown).
    pub disconnects: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    reports: AtomicU64,
    decode_errors: AtomicU64,
    read_errors: AtomicU64,
    open_errors: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            reports: self.reports.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            open_errors: self.open_errors.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the dispatcher thread and the manager.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) registry: Mutex<DeviceRegistry>,
    pub(crate) counters: Counters,
}

/// One tick of work, type-erased over the backend.
trait Engine: Send {
    /// Returns `true` if any report was read.
    fn tick(&mut self) -> bool;
    /// Close every handle and notify bound connections.
    fn shutdown(&mut self);
}

/// Why a device is being dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    Removed,
    Failing,
}

impl Fault {
    fn as_str(self) -> &'static str {
        match self {
            Fault::Removed => "removed",
            Fault::Failing => "persistent read failure",
        }
    }
}

struct OpenDevice<H> {
    handle: H,
    path: String,
    codec: DecodeContext,
    failures: u32,
}

struct Poller<B: HidBackend> {
    backend: B,
    shared: Arc<Shared>,
    config: Config,
    catalog: Catalog,
    open: BTreeMap<DeviceId, OpenDevice<B::Handle>>,
    /// Paths that failed to open, with the earliest retry time.
    unavailable: HashMap<String, Instant>,
    last_enumeration: Option<Instant>,
    buf: Vec<u8>,
}

impl<B: HidBackend> Poller<B> {
    fn new(backend: B, shared: Arc<Shared>, config: Config) -> Self {
        let catalog = config.catalog();
        Self {
            backend,
            shared,
            config,
            catalog,
            open: BTreeMap::new(),
            unavailable: HashMap::new(),
            last_enumeration: None,
            buf: vec![0u8; REPORT_BUFFER_LEN],
        }
    }

    fn enumeration_due(&self, now: Instant) -> bool {
        match self.last_enumeration {
            None => true,
            Some(at) => now.duration_since(at) >= self.config.enumerate_interval(),
        }
    }

    fn reconcile(&mut self, now: Instant) {
        let infos = match self.backend.enumerate() {
            Ok(infos) => infos,
            Err(e) => {
                warn!("device enumeration failed: {}", e);
                return;
            }
        };
        self.last_enumeration = Some(now);

        let vanished: Vec<DeviceId> = {
            let registry = self.shared.registry.lock();
            registry
                .paths()
                .filter(|(_, path)| !infos.iter().any(|i| i.path == *path))
                .map(|(id, _)| id)
                .collect()
        };
        for id in vanished {
            self.disconnect(id, Fault::Removed.as_str());
        }

        for info in &infos {
            if self.shared.registry.lock().find_by_path(&info.path).is_some() {
                continue;
            }
            if self.unavailable.get(&info.path).is_some_and(|retry| now < *retry) {
                continue;
            }
            self.open_device(info, now);
        }

        self.unavailable
            .retain(|path, _| infos.iter().any(|i| i.path == *path));
    }

    fn open_device(&mut self, info: &HidDeviceInfo, now: Instant) {
        match self.backend.open(info) {
            Ok(handle) => {
                self.unavailable.remove(&info.path);
                let layout = self.catalog.layout_for(info.vendor_id, info.product_id);
                let descriptor = self.shared.registry.lock().register(info);
                info!("device connected: {} ({:?} layout)", descriptor, layout);
                self.open.insert(
                    descriptor.id,
                    OpenDevice {
                        handle,
                        path: info.path.clone(),
                        codec: DecodeContext::new(layout, self.config.axis_scale),
                        failures: 0,
                    },
                );
            }
            Err(e) => {
                Counters::bump(&self.shared.counters.open_errors);
                warn!("{}; retrying in {:?}", e, self.config.reopen_backoff());
                self.unavailable
                    .insert(info.path.clone(), now + self.config.reopen_backoff());
            }
        }
    }

    fn attach_pending(&mut self) {
        let attached = {
            let mut registry = self.shared.registry.lock();
            registry.prune_orphans();
            registry.attach_pending()
        };
        for (connection, descriptor) in attached {
            debug!(connection = connection.id(), device = %descriptor.id, "connection bound");
            Counters::bump(&self.shared.counters.connects);
            push(&connection, DeviceEvent::Connected(descriptor));
        }
    }

    /// Drain one device. `Err` means it should be disconnected.
    fn drain(&mut self, id: DeviceId) -> Result<usize, Fault> {
        let Self {
            backend,
            shared,
            config,
            open,
            buf,
            ..
        } = self;
        let Some(device) = open.get_mut(&id) else {
            return Ok(0);
        };

        let mut timeout = config.read_timeout();
        let mut reports = 0;
        let limit = config.reports_per_tick();
        while reports < limit {
            match backend.read(&mut device.handle, buf, timeout) {
                Ok(0) => break,
                Ok(n) => {
                    reports += 1;
                    device.failures = 0;
                    // only the first read of a tick may wait
                    timeout = Duration::ZERO;

                    let at = Instant::now();
                    match codec::decode(&mut device.codec, &buf[..n], at) {
                        Ok(events) => {
                            Counters::bump(&shared.counters.reports);
                            if events.is_empty() {
                                continue;
                            }
                            // unclaimed devices are still drained so stale
                            // reports don't pile up in the backend
                            let Some(owner) = shared.registry.lock().bound_connection(id) else {
                                continue;
                            };
                            for event in events {
                                push(&owner, event);
                            }
                        }
                        Err(e) => {
                            Counters::bump(&shared.counters.decode_errors);
                            debug!(device = %id, "dropping report: {}", e);
                        }
                    }
                }
                Err(NdofError::DeviceRemoved) => return Err(Fault::Removed),
                Err(e) => {
                    Counters::bump(&shared.counters.read_errors);
                    device.failures += 1;
                    warn!(device = %id, failures = device.failures, "read failed: {}", e);
                    if device.failures >= config.max_read_failures {
                        return Err(Fault::Failing);
                    }
                    break;
                }
            }
        }
        Ok(reports)
    }

    fn read_all(&mut self) -> bool {
        let ids: Vec<DeviceId> = self.open.keys().copied().collect();
        let mut delivered = false;
        for id in ids {
            match self.drain(id) {
                Ok(n) => delivered |= n > 0,
                Err(fault) => {
                    if fault == Fault::Failing {
                        // keep a flapping device from reopening every tick
                        if let Some(device) = self.open.get(&id) {
                            self.unavailable.insert(
                                device.path.clone(),
                                Instant::now() + self.config.reopen_backoff(),
                            );
                        }
                    }
                    self.disconnect(id, fault.as_str());
                }
            }
        }
        delivered
    }

    fn disconnect(&mut self, id: DeviceId, reason: &str) {
        if let Some(device) = self.open.remove(&id) {
            self.backend.close(device.handle);
        }
        let gone = self.shared.registry.lock().unregister(id);
        if let Some(gone) = gone {
            self.notify_disconnected(gone, reason);
        }
    }

    fn notify_disconnected(&self, gone: Unregistered, reason: &str) {
        info!("device disconnected: {} ({})", gone.descriptor, reason);
        Counters::bump(&self.shared.counters.disconnects);
        if let Some(connection) = &gone.connection {
            push(connection, DeviceEvent::Disconnected);
        }
    }
}

impl<B: HidBackend> Engine for Poller<B> {
    fn tick(&mut self) -> bool {
        let now = Instant::now();
        if self.enumeration_due(now) {
            self.reconcile(now);
        }
        self.attach_pending();
        self.read_all()
    }

    fn shutdown(&mut self) {
        let open = std::mem::take(&mut self.open);
        for (_, device) in open {
            self.backend.close(device.handle);
        }
        let released = self.shared.registry.lock().unregister_all();
        for gone in released {
            self.notify_disconnected(gone, "shutdown");
        }
    }
}

fn push(connection: &Connection, event: DeviceEvent) {
    if connection.push(event) {
        trace!(connection = connection.id(), "queue full, evicted oldest event");
    }
}

enum LoopState {
    Idle(Box<dyn Engine>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Lifecycle handle for the polling thread.
pub struct Dispatcher {
    state: Mutex<LoopState>,
    stop: Arc<AtomicBool>,
    idle_sleep: Duration,
}

impl Dispatcher {
    pub(crate) fn new<B: HidBackend + 'static>(backend: B, shared: Arc<Shared>, config: &Config) -> Self {
        let idle_sleep = config.poll_interval();
        let engine = Poller::new(backend, shared, config.clone());
        Self {
            state: Mutex::new(LoopState::Idle(Box::new(engine))),
            stop: Arc::new(AtomicBool::new(false)),
            idle_sleep,
        }
    }

    /// Spawn the polling thread. Calling it again while running is a no-op;
    /// after [`stop`](Self::stop) it fails with `AlreadyStopped`.
    pub fn start(&self) -> Result<(), NdofError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, LoopState::Stopped) {
            LoopState::Idle(engine) => {
                let stop = Arc::clone(&self.stop);
                let idle_sleep = self.idle_sleep;
                let handle = thread::Builder::new()
                    .name("ndof-dispatcher".into())
                    .spawn(move || run_loop(engine, stop, idle_sleep))
                    .map_err(|e| {
                        error!("failed to spawn dispatcher thread: {}", e);
                        NdofError::Spawn(e)
                    })?;
                *state = LoopState::Running(handle);
                Ok(())
            }
            running @ LoopState::Running(_) => {
                *state = running;
                Ok(())
            }
            LoopState::Stopped => Err(NdofError::AlreadyStopped),
        }
    }

    /// Signal shutdown and wait for the loop to exit. Every open device is
    /// closed and bound connections receive `Disconnected` before this
    /// returns. A second call fails with `AlreadyStopped`.
    pub fn stop(&self) -> Result<(), NdofError> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, LoopState::Stopped) {
            LoopState::Running(handle) => {
                self.stop.store(true, Ordering::Release);
                if handle.join().is_err() {
                    error!("dispatcher thread panicked");
                }
                Ok(())
            }
            LoopState::Idle(mut engine) => {
                engine.shutdown();
                Ok(())
            }
            LoopState::Stopped => Err(NdofError::AlreadyStopped),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), LoopState::Running(_))
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let LoopState::Running(handle) = std::mem::replace(self.state.get_mut(), LoopState::Stopped) {
            self.stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

fn run_loop(mut engine: Box<dyn Engine>, stop: Arc<AtomicBool>, idle_sleep: Duration) {
    debug!("dispatcher started");
    while !stop.load(Ordering::Acquire) {
        if !engine.tick() {
            thread::sleep(idle_sleep);
        }
    }
    engine.shutdown();
    debug!("dispatcher exiting");
}
