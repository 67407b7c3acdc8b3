use std::sync::Arc;

use log::{error, info};
use winit::window::Window;

use crate::error::StartupError;

pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

pub struct WindowSurface {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl GpuContext {
    /// Device without a presentation surface, for headless runs and tests.
    pub async fn headless() -> Result<Self, StartupError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok_or(StartupError::NoAdapter)?;

        Self::from_adapter(adapter).await
    }

    pub async fn with_window(window: Arc<Window>) -> Result<(Self, WindowSurface), StartupError> {
        let window_size = window.inner_size();

        let instance = wgpu::Instance::default();
        let surface = instance.create_surface(window)?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .ok_or(StartupError::NoAdapter)?;

        let gpu = Self::from_adapter(adapter).await?;

        let config = surface
            .get_default_config(
                &gpu.adapter,
                window_size.width.max(1),
                window_size.height.max(1),
            )
            .ok_or(StartupError::UnsupportedSurface)?;
        surface.configure(&gpu.device, &config);

        Ok((gpu, WindowSurface { surface, config }))
    }

    async fn from_adapter(adapter: wgpu::Adapter) -> Result<Self, StartupError> {
        let info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(StartupError::NoCompute(info.name));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: None,
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;

        // The default handler panics; failures surface through the frame loop instead.
        device.on_uncaptured_error(Box::new(|err| error!("Uncaptured wgpu error: {err}")));

        info!(
            "Using adapter {{ name: {}, backend: {:?}, type: {:?} }}",
            info.name, info.backend, info.device_type
        );

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

impl WindowSurface {
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }

        self.config.width = width;
        self.config.height = height;
        self.surface.configure(device, &self.config);
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }
}
