// SPDX-License-Identifier: CEPL-1.0
//! The one seam between the negotiation pipeline and the graphics API.
//!
//! Handles are the API's own opaque handle types. Creation requests are
//! plain values so a test double can see exactly what was asked for.
//! Enumeration calls keep the API's count-then-fill shape and are only ever
//! driven through [`crate::query::fetch_all`].
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CString;
use std::sync::Arc;

use crate::diagnostics::DiagnosticSink;

pub type VkResult<T> = Result<T, vk::Result>;

#[derive(Clone)]
pub struct DebugMessengerRequest {
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub types: vk::DebugUtilsMessageTypeFlagsEXT,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for DebugMessengerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugMessengerRequest")
            .field("severity", &self.severity)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct InstanceRequest {
    pub app_name: CString,
    pub app_version: u32,
    pub engine_name: CString,
    pub api_version: u32,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    /// Messenger chained onto creation so create/destroy-time messages
    /// reach the sink too.
    pub creation_messenger: Option<DebugMessengerRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueRequest {
    pub family: u32,
    pub priorities: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeviceRequest {
    pub queues: Vec<QueueRequest>,
    pub extensions: Vec<CString>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sharing {
    Exclusive,
    Concurrent(Vec<u32>),
}

#[derive(Clone, Debug)]
pub struct SwapchainRequest {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub sharing: Sharing,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
}

/// Synchronous calls into a graphics driver.
///
/// All methods take `&self`: the pipeline is single-threaded and resources
/// share the driver through `Rc`, so implementations keep any state behind
/// interior mutability. Two-step enumerations write at most `out.len()`
/// items and set `count` to the number written; with `out == None` they
/// only set `count`.
pub trait Driver {
    fn enumerate_instance_layers(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> VkResult<()>;

    fn create_instance(&self, request: &InstanceRequest) -> VkResult<vk::Instance>;
    fn destroy_instance(&self, instance: vk::Instance);

    /// Whether the debug-messenger entry points were loaded for `instance`.
    fn supports_debug_messenger(&self, instance: vk::Instance) -> bool;
    fn create_debug_messenger(
        &self,
        instance: vk::Instance,
        request: &DebugMessengerRequest,
    ) -> VkResult<vk::DebugUtilsMessengerEXT>;
    fn destroy_debug_messenger(
        &self,
        instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    );

    fn create_surface(
        &self,
        instance: vk::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR>;
    fn destroy_surface(&self, instance: vk::Instance, surface: vk::SurfaceKHR);

    fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> VkResult<()>;
    fn physical_device_properties(&self, phys: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn queue_family_properties(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> VkResult<()>;
    fn device_extensions(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> VkResult<()>;

    fn surface_support(
        &self,
        phys: vk::PhysicalDevice,
        family: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool>;
    fn surface_capabilities(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::SurfaceFormatKHR]>,
    ) -> VkResult<()>;
    fn surface_present_modes(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::PresentModeKHR]>,
    ) -> VkResult<()>;

    fn create_device(
        &self,
        phys: vk::PhysicalDevice,
        request: &DeviceRequest,
    ) -> VkResult<vk::Device>;
    fn device_queue(&self, device: vk::Device, family: u32, index: u32) -> vk::Queue;
    fn destroy_device(&self, device: vk::Device);

    fn create_swapchain(
        &self,
        device: vk::Device,
        request: &SwapchainRequest,
    ) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        count: &mut u32,
        out: Option<&mut [vk::Image]>,
    ) -> VkResult<()>;
    fn destroy_swapchain(&self, device: vk::Device, swapchain: vk::SwapchainKHR);

    fn create_image_view(
        &self,
        device: vk::Device,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, device: vk::Device, view: vk::ImageView);
}
