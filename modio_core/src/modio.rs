//! The process image manager.
//!
//! [`ModIo`] builds devices and I/O points from the device configuration,
//! owns the process image channel and the refresh coordinator, and offers
//! the foreground operations (read, sync, write), the two cyclic loops and
//! the shutdown path.
//!
//! All operations take `&self`; share the manager as `Arc<ModIo>` between
//! the program, event callbacks and the signal watcher.

use modio_common::config::{validate_cycle_time, ConfigError, ModIoSettings};
use modio_common::pictory::{locate_config, AppInfo, DeviceDescriptor, DeviceKind, PictoryConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::address_map::DeviceAddressMap;
use crate::channel::{ImageHandle, ProcessImageChannel};
use crate::cycle::{run_cycle_loop, CycleTools};
use crate::device::Device;
use crate::dispatch::run_mainloop;
use crate::error::{ModIoError, Result};
use crate::event::{EventOptions, EventRegistration, RegistrationId};
use crate::io::{IoId, IoKind, IoPoint, IoValue};
use crate::lifecycle;
use crate::refresh::RefreshCoordinator;
use crate::state::EngineState;

/// Cleanup function run by the signal watcher between the final read and write.
pub type CleanupFn = Box<dyn FnOnce(&ModIo) + Send>;

// ─── Device selection ───────────────────────────────────────────────

/// Selects a device by position or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Declared numeric position.
    Position(i64),
    /// Declared name.
    Name(String),
}

impl DeviceSelector {
    fn matches(&self, desc: &DeviceDescriptor) -> bool {
        match self {
            Self::Position(pos) => desc.position.as_index() == Some(*pos),
            Self::Name(name) => desc.name == *name,
        }
    }
}

impl From<i64> for DeviceSelector {
    fn from(position: i64) -> Self {
        Self::Position(position)
    }
}

impl From<&str> for DeviceSelector {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Restricts which configured devices are built.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Devices to build; empty selects all (subject to `virtual_only`).
    pub devices: Vec<DeviceSelector>,
    /// Only consider virtual devices.
    pub virtual_only: bool,
}

fn select_devices(devices: Vec<DeviceDescriptor>, selection: &Selection) -> Result<Vec<DeviceDescriptor>> {
    let selected: Vec<_> = devices
        .into_iter()
        .filter(|desc| !selection.virtual_only || desc.kind() == Some(DeviceKind::Virtual))
        .filter(|desc| selection.devices.is_empty() || selection.devices.iter().any(|sel| sel.matches(desc)))
        .collect();

    if selected.is_empty() {
        return Err(ConfigError::ValidationError("could not find any given devices in config".to_string()).into());
    }
    if !selection.devices.is_empty() && selected.len() != selection.devices.len() {
        return Err(ConfigError::ValidationError("could not find all given devices in config".to_string()).into());
    }
    Ok(selected)
}

// ─── ModIo ──────────────────────────────────────────────────────────

/// Process image manager.
pub struct ModIo {
    settings: ModIoSettings,
    configrsc: Option<PathBuf>,
    app: AppInfo,
    map: DeviceAddressMap,
    devices: Vec<Arc<Device>>,
    ios: HashMap<String, Arc<IoPoint>>,
    channel: Arc<Mutex<ProcessImageChannel>>,
    refresh: RefreshCoordinator,
    state: EngineState,
    signal_cleanup: Mutex<Option<CleanupFn>>,
    signal_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ModIo {
    /// Load the device configuration and open the process image.
    pub fn open(settings: ModIoSettings) -> Result<Self> {
        Self::open_with(settings, None)
    }

    /// Like [`open`](Self::open), building only the selected devices.
    ///
    /// # Errors
    /// A configuration error if none or not all of `devices` are found.
    pub fn open_selected(settings: ModIoSettings, devices: Vec<DeviceSelector>) -> Result<Self> {
        Self::open_with(
            settings,
            Some(Selection {
                devices,
                virtual_only: false,
            }),
        )
    }

    /// Drive virtual devices: simulator mode on the selected virtual devices.
    pub fn open_driver(mut settings: ModIoSettings, devices: Vec<DeviceSelector>) -> Result<Self> {
        settings.monitoring = false;
        settings.simulator = true;
        Self::open_with(
            settings,
            Some(Selection {
                devices,
                virtual_only: true,
            }),
        )
    }

    fn open_with(settings: ModIoSettings, selection: Option<Selection>) -> Result<Self> {
        settings.validate()?;
        let configrsc = locate_config(settings.configrsc.as_deref())?;
        let config = PictoryConfig::load(&configrsc)?;
        let procimg = settings.procimg.clone();
        let buffered = settings.buffered_write;
        Self::build(settings, Some(configrsc), config, selection.as_ref(), |length| {
            ProcessImageChannel::open(&procimg, length, buffered)
        })
    }

    /// Build from an already parsed configuration and an open image handle.
    pub fn from_config(
        settings: ModIoSettings,
        config: PictoryConfig,
        handle: Box<dyn ImageHandle>,
        selection: Option<&Selection>,
    ) -> Result<Self> {
        settings.validate()?;
        let buffered = settings.buffered_write;
        Self::build(settings, None, config, selection, move |length| {
            Ok(ProcessImageChannel::from_handle(handle, length, buffered))
        })
    }

    fn build<F>(
        settings: ModIoSettings,
        configrsc: Option<PathBuf>,
        config: PictoryConfig,
        selection: Option<&Selection>,
        open_channel: F,
    ) -> Result<Self>
    where
        F: FnOnce(usize) -> std::io::Result<ProcessImageChannel>,
    {
        let descriptors = match selection {
            Some(selection) => select_devices(config.devices, selection)?,
            None => config.devices,
        };
        let map = DeviceAddressMap::build(&descriptors)?;

        let mut devices = Vec::with_capacity(map.placements().len());
        let mut ios: HashMap<String, Arc<IoPoint>> = HashMap::new();
        let mut next_id = 0;
        for (index, placement) in map.placements().iter().enumerate() {
            let desc = &descriptors[placement.descriptor];
            let mut points = Vec::new();
            for (kind, entries) in [(IoKind::Input, &desc.inp), (IoKind::Output, &desc.out), (IoKind::Memory, &desc.mem)] {
                for entry in entries {
                    let io = IoPoint::from_descriptor(IoId(next_id), entry, index, placement.declared_offset, kind)
                        .map_err(ConfigError::ValidationError)?;
                    next_id += 1;
                    points.push(io);
                }
            }

            let device = Arc::new(Device::new(index, placement, points, settings.simulator));
            for io in device.ios() {
                if ios.insert(io.name().to_string(), Arc::clone(io)).is_some() {
                    return Err(ConfigError::ValidationError(format!("io name '{}' is used twice", io.name())).into());
                }
            }
            debug!(
                "Device {} '{}' at {}..{} ({} ios)",
                device.position(),
                device.name(),
                device.offset(),
                device.offset() + device.length(),
                device.ios().len()
            );
            devices.push(device);
        }

        let channel = Arc::new(Mutex::new(open_channel(map.length())?));
        let refresh = RefreshCoordinator::new(
            Arc::clone(&channel),
            settings.cycle_time_ms,
            settings.max_io_errors,
            settings.monitoring,
        );

        info!(
            "Configured {} devices with {} ios, process image {} bytes{}{}",
            devices.len(),
            ios.len(),
            map.length(),
            if settings.monitoring { ", monitoring" } else { "" },
            if settings.simulator { ", simulator" } else { "" }
        );

        let modio = Self {
            state: EngineState::new(settings.max_io_errors),
            configrsc,
            app: config.app,
            map,
            devices,
            ios,
            channel,
            refresh,
            signal_cleanup: Mutex::new(None),
            signal_watcher: Mutex::new(None),
            settings,
        };

        if modio.settings.syncoutputs {
            modio.sync_outputs(None)?;
        }
        if modio.settings.autorefresh {
            modio.autorefresh_all()?;
        }
        Ok(modio)
    }

    // ─── Model access ───────────────────────────────────────────────

    /// All devices in image order.
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Device at `position`.
    pub fn device(&self, position: i64) -> Result<Arc<Device>> {
        self.map
            .slot_by_position(position)
            .map(|slot| Arc::clone(&self.devices[slot]))
            .ok_or_else(|| ModIoError::DeviceNotFound(format!("position {position}")))
    }

    /// Device named `name`; fails for names shared by several devices.
    pub fn device_by_name(&self, name: &str) -> Result<Arc<Device>> {
        self.map
            .slot_by_name(name)
            .map(|slot| Arc::clone(&self.devices[slot]))
            .ok_or_else(|| ModIoError::DeviceNotFound(name.to_string()))
    }

    /// I/O point named `name`.
    pub fn io(&self, name: &str) -> Result<Arc<IoPoint>> {
        self.ios
            .get(name)
            .cloned()
            .ok_or_else(|| ModIoError::IoNotFound(name.to_string()))
    }

    /// All I/O points in image order.
    pub fn ios(&self) -> impl Iterator<Item = &Arc<IoPoint>> {
        self.devices.iter().flat_map(|dev| dev.ios().iter())
    }

    fn owned(&self, device: &Device) -> Result<&Arc<Device>> {
        self.devices
            .get(device.index())
            .filter(|own| std::ptr::eq(own.as_ref(), device))
            .ok_or_else(|| ModIoError::DeviceNotFound(format!("{} is not part of this process image", device.name())))
    }

    /// Devices an operation applies to. An explicit device must not be self-updating.
    fn targets(&self, device: Option<&Device>) -> Result<Vec<&Arc<Device>>> {
        match device {
            Some(device) => {
                let own = self.owned(device)?;
                if own.is_self_updating() {
                    return Err(ModIoError::DeviceSelfUpdating {
                        position: own.position(),
                        name: own.name().to_string(),
                    });
                }
                Ok(vec![own])
            }
            None => Ok(self.devices.iter().filter(|dev| !dev.is_self_updating()).collect()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.channel.lock().is_open() {
            Ok(())
        } else {
            Err(ModIoError::Closed)
        }
    }

    // ─── Foreground process image operations ────────────────────────

    /// Read inputs and memory (whole devices when monitoring) into the live buffers.
    ///
    /// Returns `Ok(false)` after a counted, recoverable I/O error.
    pub fn read_procimg(&self, device: Option<&Device>) -> Result<bool> {
        self.ensure_open()?;
        let targets = self.targets(device)?;
        let read = self.channel.lock().read_all();
        let image = match read {
            Ok(image) => image,
            Err(e) => {
                self.state.io_errors().record("read_procimg", &e)?;
                return Ok(false);
            }
        };

        let monitoring = self.settings.monitoring;
        for dev in targets {
            let mut data = dev.lock();
            dev.copy_from_image(&mut data.live, &image, &dev.read_regions(monitoring));
        }
        Ok(true)
    }

    /// Load the output regions from the process image into the live buffers.
    pub fn sync_outputs(&self, device: Option<&Device>) -> Result<bool> {
        self.ensure_open()?;
        let targets = self.targets(device)?;
        let read = self.channel.lock().read_all();
        let image = match read {
            Ok(image) => image,
            Err(e) => {
                self.state.io_errors().record("sync_outputs", &e)?;
                return Ok(false);
            }
        };

        for dev in targets {
            let mut data = dev.lock();
            dev.copy_from_image(&mut data.live, &image, &[dev.out()]);
        }
        Ok(true)
    }

    /// Write the output regions of the live buffers to the process image.
    ///
    /// All devices are attempted; a failure is counted once per call.
    pub fn write_procimg(&self, device: Option<&Device>) -> Result<bool> {
        if self.settings.monitoring {
            return Err(ModIoError::Monitoring("write_procimg"));
        }
        self.ensure_open()?;
        let targets = self.targets(device)?;

        let mut failure = None;
        let mut channel = self.channel.lock();
        for dev in targets {
            let out = dev.out();
            if out.is_empty() {
                continue;
            }
            let bytes = dev.lock().live[out.clone()].to_vec();
            if let Err(e) = channel.write_region(dev.absolute(&out).start, &bytes) {
                failure = Some(e);
            }
        }
        if failure.is_none() {
            failure = channel.flush().err();
        }
        drop(channel);

        match failure {
            Some(e) => {
                self.state.io_errors().record("write_procimg", &e)?;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Set every output point to its configured default value.
    pub fn set_default_values(&self, device: Option<&Device>) -> Result<()> {
        if self.settings.monitoring {
            return Err(ModIoError::Monitoring("set_default_values"));
        }
        let targets = match device {
            Some(device) => vec![self.owned(device)?],
            None => self.devices.iter().collect(),
        };
        for dev in targets {
            for io in dev.ios().iter().filter(|io| io.writable()) {
                dev.set_value(io, io.default_value())
                    .map_err(|reason| ModIoError::InvalidValue {
                        io: io.name().to_string(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    /// Place `device` under cyclic refresh, or take it back.
    ///
    /// Activation reads the device once and starts the refresh thread if
    /// needed. Deactivation writes its outputs one last time (unless
    /// monitoring) and stops the thread when no device is left.
    pub fn autorefresh(&self, device: &Device, activate: bool) -> Result<()> {
        let dev = self.owned(device)?;
        if activate {
            if dev.is_self_updating() {
                return Ok(());
            }
            self.read_procimg(Some(dev.as_ref()))?;
            {
                let mut data = dev.lock();
                let data = &mut *data;
                data.snapshot.clone_from(&data.live);
            }
            dev.set_self_updating(true);
            self.refresh.add_device(Arc::clone(dev));
            self.refresh.start()?;
            debug!("Device {} '{}' under cyclic refresh", dev.position(), dev.name());
        } else {
            if !dev.is_self_updating() {
                return Ok(());
            }
            self.refresh.remove_device(dev.index());
            dev.set_self_updating(false);
            if !self.refresh.has_devices() {
                self.refresh.stop();
                self.refresh.join(self.refresh.refresh_interval());
            }
            if !self.settings.monitoring {
                self.write_procimg(Some(dev.as_ref()))?;
            }
            debug!("Device {} '{}' left cyclic refresh", dev.position(), dev.name());
        }
        Ok(())
    }

    /// Place every device under cyclic refresh.
    pub fn autorefresh_all(&self) -> Result<()> {
        for dev in &self.devices {
            self.autorefresh(dev, true)?;
        }
        Ok(())
    }

    // ─── Values and events ──────────────────────────────────────────

    /// Current value of the I/O point `name`.
    pub fn value(&self, name: &str) -> Result<IoValue> {
        let io = self.io(name)?;
        Ok(self.devices[io.device_index()].value(&io))
    }

    /// Set the output point `name` in its device's live buffer.
    pub fn set_value(&self, name: &str, value: impl Into<IoValue>) -> Result<()> {
        if self.settings.monitoring {
            return Err(ModIoError::Monitoring("set_value"));
        }
        let io = self.io(name)?;
        if !io.writable() {
            return Err(ModIoError::ReadOnlyIo(name.to_string()));
        }
        self.devices[io.device_index()]
            .set_value(&io, &value.into())
            .map_err(|reason| ModIoError::InvalidValue {
                io: name.to_string(),
                reason,
            })
    }

    /// Register `callback` for changes of the I/O point `name`.
    pub fn reg_event<F>(&self, name: &str, callback: F, options: EventOptions) -> Result<RegistrationId>
    where
        F: Fn(&str, &IoValue) + Send + Sync + 'static,
    {
        if options.edge.is_empty() {
            return Err(ModIoError::InvalidValue {
                io: name.to_string(),
                reason: "edge selection is empty".to_string(),
            });
        }
        let io = self.io(name)?;
        let registration = Arc::new(EventRegistration::new(Arc::new(callback), options));
        let id = registration.id();
        self.devices[io.device_index()].register(&io, registration);
        debug!("Event {id} registered on '{name}' ({:?})", options);
        Ok(id)
    }

    /// Remove one registration (`Some(id)`) or all registrations of `name`.
    pub fn unreg_event(&self, name: &str, id: Option<RegistrationId>) -> Result<usize> {
        let io = self.io(name)?;
        Ok(self.devices[io.device_index()].unregister(io.id(), id))
    }

    // ─── Loops ──────────────────────────────────────────────────────

    /// Call `func` once per refresh cycle until it returns `Some` or [`exit`](Self::exit) is called.
    ///
    /// Returns `Ok(None)` without calling `func` if an exit is already pending.
    ///
    /// `cycle_time_ms` changes the refresh interval before the loop starts.
    pub fn cycle_loop<T, F>(&self, func: F, cycle_time_ms: Option<u32>) -> Result<Option<T>>
    where
        F: FnMut(&mut CycleTools) -> Option<T>,
    {
        if self.state.loop_running() {
            return Err(ModIoError::LoopAlreadyRunning);
        }
        if let Some(ms) = cycle_time_ms.filter(|ms| *ms != self.cycle_time()) {
            self.set_cycle_time(ms)?;
        }
        let guard = self.state.begin_loop(&self.refresh)?;
        run_cycle_loop(&self.state, &self.refresh, guard, func)
    }

    /// Dispatch I/O events until [`exit`](Self::exit) is called.
    ///
    /// An exit requested before the call is dropped.
    pub fn mainloop(&self, freeze: bool) -> Result<()> {
        let guard = self.state.begin_loop(&self.refresh)?;
        self.state.clear_exit();
        run_mainloop(&self.state, &self.refresh, guard, freeze)
    }

    /// Run [`mainloop`](Self::mainloop) on its own thread.
    ///
    /// Loop preconditions are checked before the thread starts.
    pub fn mainloop_background(self: &Arc<Self>, freeze: bool) -> Result<JoinHandle<Result<()>>> {
        let guard = self.state.begin_loop(&self.refresh)?;
        self.state.clear_exit();
        let modio = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("modio-mainloop".to_string())
            .spawn(move || run_mainloop(&modio.state, &modio.refresh, guard, freeze))?;
        Ok(handle)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Stop the running loop and release external waiters.
    ///
    /// With `full`, the refresh thread is stopped and every refreshed device
    /// leaves cyclic refresh with one final output write (unless monitoring).
    pub fn exit(&self, full: bool) -> Result<()> {
        debug!("Exit requested (full={full})");
        self.state.request_exit();
        self.refresh.data_ready().wake();
        if !full {
            return Ok(());
        }

        self.refresh.stop();
        self.refresh.join(self.refresh.refresh_interval());

        let mut result = Ok(());
        let devices = self.refresh.take_devices();
        for dev in devices.iter().rev() {
            dev.set_self_updating(false);
            if self.settings.monitoring || !self.channel.lock().is_open() {
                continue;
            }
            if let Err(e) = self.write_procimg(Some(dev.as_ref())) {
                error!("Final output write of device '{}' failed: {e}", dev.name());
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if !devices.is_empty() {
            info!("Cyclic refresh ended for {} devices", devices.len());
        }
        result
    }

    /// Full exit, then close the process image and drop all event registrations.
    pub fn cleanup(&self) -> Result<()> {
        let result = self.exit(true);
        self.channel.lock().close();
        for dev in &self.devices {
            dev.lock().events.clear();
        }
        result
    }

    /// Shut down on SIGINT/SIGTERM.
    ///
    /// The first signal runs a full [`exit`](Self::exit); with `cleanup`
    /// given, the inputs are read once more, `cleanup` runs and the outputs
    /// are written. A second signal terminates the process.
    pub fn handle_signal_end(self: &Arc<Self>, cleanup: Option<CleanupFn>) -> Result<()> {
        *self.signal_cleanup.lock() = cleanup;
        lifecycle::install_handlers()?;

        let mut watcher = self.signal_watcher.lock();
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        *watcher = Some(lifecycle::spawn_watcher(Arc::downgrade(self))?);
        Ok(())
    }

    pub(crate) fn shutdown_on_signal(&self) {
        if let Err(e) = self.exit(true) {
            error!("Exit after signal failed: {e}");
        }
        let Some(cleanup) = self.signal_cleanup.lock().take() else {
            return;
        };
        if let Err(e) = self.read_procimg(None) {
            warn!("Final input read failed: {e}");
        }
        cleanup(self);
        if !self.settings.monitoring {
            if let Err(e) = self.write_procimg(None) {
                warn!("Final output write failed: {e}");
            }
        }
    }

    /// Block until an exit was requested or `timeout` elapsed.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.state.wait_exit(timeout)
    }

    /// True once an exit was requested.
    pub fn exit_requested(&self) -> bool {
        self.state.exit_requested()
    }

    // ─── Accounting and settings ────────────────────────────────────

    /// Counted I/O errors; the refresh thread's counter while a loop runs.
    pub fn io_errors(&self) -> u32 {
        if self.state.loop_running() {
            self.refresh.errors().count()
        } else {
            self.state.io_errors().count()
        }
    }

    /// Reset both error counters.
    pub fn reset_io_errors(&self) {
        self.state.io_errors().reset();
        self.refresh.errors().reset();
    }

    /// Error threshold (0 = unlimited).
    pub fn max_io_errors(&self) -> u32 {
        self.state.io_errors().max()
    }

    /// Change the error threshold of both counters.
    pub fn set_max_io_errors(&self, max: u32) {
        self.state.io_errors().set_max(max);
        self.refresh.errors().set_max(max);
    }

    /// Refresh interval [ms].
    pub fn cycle_time(&self) -> u32 {
        self.refresh.refresh_interval_ms()
    }

    /// Change the refresh interval.
    ///
    /// # Errors
    /// Fails while a loop runs or outside the accepted range.
    pub fn set_cycle_time(&self, milliseconds: u32) -> Result<()> {
        if self.state.loop_running() {
            return Err(ModIoError::RefreshIntervalLocked);
        }
        validate_cycle_time(milliseconds)?;
        self.refresh.set_refresh_interval_ms(milliseconds);
        Ok(())
    }

    /// Refresh coordinator.
    pub fn refresh(&self) -> &RefreshCoordinator {
        &self.refresh
    }

    /// Process image length.
    pub fn length(&self) -> usize {
        self.map.length()
    }

    /// Monitoring mode.
    pub fn monitoring(&self) -> bool {
        self.settings.monitoring
    }

    /// Simulator mode.
    pub fn simulator(&self) -> bool {
        self.settings.simulator
    }

    /// Process image path from the settings.
    pub fn procimg(&self) -> &Path {
        &self.settings.procimg
    }

    /// Device configuration file in use, when loaded from disk.
    pub fn configrsc(&self) -> Option<&Path> {
        self.configrsc.as_deref()
    }

    /// Metadata of the configuration tool.
    pub fn app(&self) -> &AppInfo {
        &self.app
    }
}

impl Drop for ModIo {
    fn drop(&mut self) {
        if let Err(e) = self.exit(true) {
            warn!("Exit on drop failed: {e}");
        }
        self.channel.lock().close();
    }
}

impl std::fmt::Debug for ModIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModIo")
            .field("devices", &self.devices.len())
            .field("length", &self.length())
            .field("monitoring", &self.settings.monitoring)
            .field("simulator", &self.settings.simulator)
            .finish_non_exhaustive()
    }
}
