use std::cell::OnceCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};

use super::stats::ResourceStats;
use super::texture::MipBlitter;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Headless device, queue and bookkeeping shared by every GPU object of one
/// pipeline.
pub struct GpuContext {
    id: u64,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    adapter_name: String,
    lost: Arc<AtomicBool>,
    stats: ResourceStats,
    mip_blitter: OnceCell<MipBlitter>,
}

impl GpuContext {
    /// Picks the preferred adapter and opens a device without any surface.
    pub fn new_headless() -> Result<Rc<Self>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("postfx device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            tracing::warn!(?reason, %message, "GPU device lost");
            flag.store(true, Ordering::SeqCst);
        });
        device.on_uncaptured_error(Box::new(|error| {
            tracing::warn!(%error, "uncaptured GPU error");
        }));

        Ok(Rc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            device,
            queue,
            adapter_name: info.name,
            lost,
            stats: ResourceStats::default(),
            mip_blitter: OnceCell::new(),
        }))
    }

    /// Distinguishes contexts so textures can tell when they must re-upload.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Marks the context unusable, as a device-lost callback would.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &ResourceStats {
        &self.stats
    }

    pub(crate) fn mip_blitter(&self) -> &MipBlitter {
        self.mip_blitter
            .get_or_init(|| MipBlitter::new(&self.device))
    }

    /// Runs `create` inside a validation error scope and reports whatever
    /// the device rejected.
    pub(crate) fn scoped<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<String>) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let error = pollster::block_on(self.device.pop_error_scope()).map(|err| err.to_string());
        (value, error)
    }
}
