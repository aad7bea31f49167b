use std::sync::Arc;

use tracing::info;

use crate::backends::HidBackend;
use crate::config::Config;
use crate::connection::{Connection, ConnectionPolicy};
use crate::device::DeviceDescriptor;
use crate::dispatcher::{Dispatcher, DispatcherStats, Shared};
use crate::error::NdofError;

/// Owner of the dispatcher and entry point of the API.
///
/// ```no_run
/// use ndof::backends::virtual_input::VirtualBackend;
/// use ndof::{ConnectionPolicy, DeviceEvent, Manager, Reconnect};
///
/// let mut ndof = Manager::new();
/// ndof.begin_with(VirtualBackend::new()).expect("start dispatcher");
/// let connection = ndof.connect(ConnectionPolicy::vid_pid(0x256f, 0xc635).reconnect(Reconnect::Unique));
/// loop {
///     loop {
///         match connection.pop() {
///             DeviceEvent::Empty => break,
///             DeviceEvent::Connected(device) => println!("connected: {device}"),
///             DeviceEvent::Disconnected => println!("disconnected"),
///             DeviceEvent::Motion(m) => println!("motion {:?} {:?}", m.translation(), m.rotation()),
///             DeviceEvent::ButtonChange(b) => println!("button {} {:?}", b.button, b.state),
///         }
///     }
///     std::thread::sleep(std::time::Duration::from_millis(5));
/// }
/// ```
pub struct Manager {
    config: Config,
    shared: Arc<Shared>,
    dispatcher: Option<Dispatcher>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            dispatcher: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start polling through `hidapi`.
    ///
    /// ```no_run
    /// let mut ndof = ndof::Manager::new();
    /// ndof.begin()?;
    /// let mouse = ndof.connect_any();
    /// # Ok::<(), ndof::NdofError>(())
    /// ```
    #[cfg(feature = "hid")]
    #[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
    pub fn begin(&mut self) -> Result<(), NdofError> {
        if self.is_running() {
            return Ok(());
        }
        let backend = crate::backends::hid::HidApiBackend::new(self.config.catalog())?;
        self.begin_with(backend)
    }

    /// Start polling through `backend`.
    ///
    /// If the dispatcher is already running this does nothing and `backend`
    /// is dropped. After [`end`](Self::end) a fresh dispatcher is started.
    pub fn begin_with<B: HidBackend + 'static>(&mut self, backend: B) -> Result<(), NdofError> {
        if self.is_running() {
            return Ok(());
        }
        let dispatcher = Dispatcher::new(backend, Arc::clone(&self.shared), &self.config);
        dispatcher.start()?;
        info!("ndof dispatcher started");
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    /// Stop polling. Open devices are closed and every bound connection
    /// receives `Disconnected`. Connections stay valid and are picked up
    /// again by a later `begin`.
    pub fn end(&mut self) -> Result<(), NdofError> {
        let dispatcher = self.dispatcher.take().ok_or(NdofError::AlreadyStopped)?;
        dispatcher.stop()?;
        info!("ndof dispatcher stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(Dispatcher::is_running)
    }

    /// Devices known right now. May be stale by the time it returns.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.shared.registry.lock().descriptors()
    }

    /// Create a connection. It starts unbound; the dispatcher binds it to a
    /// matching device on a later tick and announces that with `Connected`.
    pub fn connect(&self, policy: ConnectionPolicy) -> Connection {
        self.shared
            .registry
            .lock()
            .add_connection(policy, self.config.queue_capacity)
    }

    /// `connect` with [`ConnectionPolicy::any`].
    pub fn connect_any(&self) -> Connection {
        self.connect(ConnectionPolicy::any())
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.stop();
        }
    }
}
