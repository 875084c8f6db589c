// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan bring-up for a single window: instance, diagnostics, surface,
//! device selection, logical device and swapchain, in that order.
//!
//! Every stage result is an owned value whose `Drop` releases its handle,
//! and each child keeps its parent alive, so teardown always runs in the
//! reverse of creation order. A failed [`VkContext::bootstrap`] has released
//! everything it created before the error reaches the caller.
mod ash_driver;
pub mod device;
pub mod diagnostics;
pub mod driver;
mod error;
pub mod instance;
pub mod logical;
#[cfg(test)]
mod mock;
mod query;
pub mod surface;
pub mod swap;

pub use ash::vk;
pub use ash_driver::AshDriver;
pub use device::{
    select_device, PhysicalDeviceRecord, QueueFamilies, QueueFamilyIndices, SelectedDevice,
};
pub use diagnostics::{
    Category, DiagnosticHandle, DiagnosticRecord, DiagnosticSink, DiagnosticsConfig, Severity,
    TracingSink,
};
pub use driver::Driver;
pub use error::{BootstrapError, Result};
pub use instance::{ApiContext, InstanceConfig, KHRONOS_VALIDATION};
pub use logical::LogicalContext;
pub use surface::{presentation_extensions, PresentationSurface};
pub use swap::{
    negotiate_and_create, PresentationChannel, SwapConfiguration, SwapImage, SwapPreferences,
    VsyncMode,
};

use kindle_render::{PresentTarget, RenderSize};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CString;
use std::rc::Rc;
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub instance: InstanceConfig,
    pub diagnostics: DiagnosticsConfig,
    pub device_extensions: Vec<CString>,
    pub swap: SwapPreferences,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            device_extensions: vec![ash::khr::swapchain::NAME.to_owned()],
            swap: SwapPreferences::default(),
        }
    }
}

/// A ready-to-render context: queues to submit to and a swapchain to
/// present into.
pub struct VkContext {
    // Field order is drop order.
    channel: PresentationChannel,
    device: Rc<LogicalContext>,
    surface: Rc<PresentationSurface>,
    diagnostics: Option<DiagnosticHandle>,
    api: Rc<ApiContext>,
    swap_config: SwapConfiguration,
    device_name: String,
    device_type: vk::PhysicalDeviceType,
}

impl VkContext {
    /// Runs the whole sequence against `driver`, routing driver messages
    /// to `tracing`.
    pub fn bootstrap(
        driver: Rc<dyn Driver>,
        target: &dyn PresentTarget,
        config: &BootstrapConfig,
    ) -> Result<Self> {
        Self::bootstrap_with_sink(driver, target, config, Arc::new(TracingSink))
    }

    pub fn bootstrap_with_sink(
        driver: Rc<dyn Driver>,
        target: &dyn PresentTarget,
        config: &BootstrapConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let extensions = target
            .required_presentation_extensions()
            .map_err(|e| BootstrapError::Window(format!("presentation extensions ({e:#})")))?;
        let creation_messenger = config
            .instance
            .diagnostics
            .then(|| config.diagnostics.request(Arc::clone(&sink)));

        let api = ApiContext::create(driver, &config.instance, &extensions, creation_messenger)?;
        let diagnostics = DiagnosticHandle::attach(&api, &config.diagnostics, sink);

        let (display, window) = target
            .raw_handles()
            .map_err(|e| BootstrapError::Window(format!("native handles ({e:#})")))?;
        let surface = PresentationSurface::create(&api, display, window)?;

        let selected = select_device(&api, &surface, &config.device_extensions)?;
        let device = LogicalContext::create(&api, &selected, &config.device_extensions)?;
        let (swap_config, channel) = negotiate_and_create(
            &device,
            &surface,
            &selected.record,
            target.framebuffer_size(),
            &config.swap,
        )?;

        info!(
            "Vulkan context ready on {} ({} swapchain images)",
            selected.record.name,
            channel.images().len()
        );
        Ok(Self {
            channel,
            device,
            surface,
            diagnostics,
            api,
            swap_config,
            device_name: selected.record.name,
            device_type: selected.record.device_type,
        })
    }

    /// Same as [`bootstrap`](Self::bootstrap) on the system Vulkan loader
    /// for a window known only by its raw handles.
    pub fn from_window(
        window: RawWindowHandle,
        display: RawDisplayHandle,
        size: RenderSize,
        config: &BootstrapConfig,
    ) -> Result<Self> {
        let driver: Rc<dyn Driver> = Rc::new(AshDriver::load()?);
        Self::bootstrap_raw(driver, window, display, size, config)
    }

    fn bootstrap_raw(
        driver: Rc<dyn Driver>,
        window: RawWindowHandle,
        display: RawDisplayHandle,
        size: RenderSize,
        config: &BootstrapConfig,
    ) -> Result<Self> {
        let target = RawTarget {
            display,
            window,
            size,
        };
        Self::bootstrap(driver, &target, config)
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue()
    }

    pub fn presentation_queue(&self) -> vk::Queue {
        self.device.presentation_queue()
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.device.families()
    }

    pub fn images(&self) -> &[SwapImage] {
        self.channel.images()
    }

    pub fn swap_config(&self) -> &SwapConfiguration {
        &self.swap_config
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.device_type
    }

    pub fn diagnostics_attached(&self) -> bool {
        self.diagnostics.is_some()
    }

    pub fn channel(&self) -> &PresentationChannel {
        &self.channel
    }

    pub fn device(&self) -> &LogicalContext {
        &self.device
    }

    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }

    pub fn api(&self) -> &ApiContext {
        &self.api
    }
}

struct RawTarget {
    display: RawDisplayHandle,
    window: RawWindowHandle,
    size: RenderSize,
}

impl PresentTarget for RawTarget {
    fn raw_handles(&self) -> anyhow::Result<(RawDisplayHandle, RawWindowHandle)> {
        Ok((self.display, self.window))
    }

    fn required_presentation_extensions(&self) -> anyhow::Result<Vec<CString>> {
        presentation_extensions(self.display)
    }

    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }
}
