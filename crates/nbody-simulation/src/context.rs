//! Adapter and device acquisition

use nbody_physics::{Error, Result};

/// Device, queue and a description of the adapter they came from
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Acquire a device without any surface, for headless runs and tests
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            let adapter = request_adapter(&instance, None).await?;
            let (device, queue) = request_device(&adapter).await?;
            Ok(Self::from_parts(&adapter, device, queue))
        })
    }

    pub fn from_parts(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_info: adapter.get_info(),
        }
    }
}

/// Pick a high-performance adapter, compatible with `surface` when one is given
pub async fn request_adapter(
    instance: &wgpu::Instance,
    surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| Error::device("request_adapter", e))?;

    let info = adapter.get_info();
    log::info!("✓ Using GPU: {} ({:?})", info.name, info.backend);
    Ok(adapter)
}

/// Request a device with the adapter's storage-buffer limits
pub async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let supported = adapter.limits();
    let required_limits = wgpu::Limits {
        max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
        max_buffer_size: supported.max_buffer_size,
        ..wgpu::Limits::default()
    };

    adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("N-body Device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|e| Error::device("request_device", e))
}

/// Run `f` inside a validation error scope and turn a captured error into [`Error::DeviceOperation`]
pub fn validated<T>(
    device: &wgpu::Device,
    operation: &'static str,
    f: impl FnOnce() -> T,
) -> Result<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => {
            log::error!("{operation} failed validation: {error}");
            Err(Error::device(operation, error))
        }
        None => Ok(value),
    }
}

/// Map a readback buffer and block until the mapping resolves
pub fn map_read(device: &wgpu::Device, slice: wgpu::BufferSlice<'_>) -> Result<()> {
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| Error::device("device.poll", e))?;
    receiver
        .recv()
        .map_err(|e| Error::device("buffer.map_async", e))?
        .map_err(|e| Error::device("buffer.map_async", e))
}
