// SPDX-License-Identifier: CEPL-1.0
//! In-memory driver for tests: scripted GPUs, injectable failures, live
//! handle counts and a teardown-order checker.
use ash::vk::{self, Handle};
use kindle_render::{PresentTarget, RenderSize};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::diagnostics::{deliver, DiagnosticSink};
use crate::driver::{
    DebugMessengerRequest, DeviceRequest, Driver, InstanceRequest, Sharing, SwapchainRequest,
    VkResult,
};
use crate::instance::KHRONOS_VALIDATION;
use crate::query::raw_from_name;
use crate::swap::{PREFERRED_SURFACE_FORMAT, UNDEFINED_EXTENT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Created(&'static str),
    Destroyed(&'static str),
}

pub fn handles() -> (RawDisplayHandle, RawWindowHandle) {
    (
        RawDisplayHandle::Web(WebDisplayHandle::new()),
        RawWindowHandle::Web(WebWindowHandle::new(1)),
    )
}

/// Extents 1x1..4096x4096; `current` of `None` leaves the extent undefined.
pub fn caps(min: u32, max: u32, current: Option<(u32, u32)>) -> vk::SurfaceCapabilitiesKHR {
    let (width, height) = current.unwrap_or((UNDEFINED_EXTENT, UNDEFINED_EXTENT));
    vk::SurfaceCapabilitiesKHR {
        min_image_count: min,
        max_image_count: max,
        current_extent: vk::Extent2D { width, height },
        min_image_extent: vk::Extent2D {
            width: 1,
            height: 1,
        },
        max_image_extent: vk::Extent2D {
            width: 4096,
            height: 4096,
        },
        max_image_array_layers: 1,
        supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
    }
}

#[derive(Clone, Debug)]
pub struct MockGpu {
    name: &'static str,
    device_type: vk::PhysicalDeviceType,
    families: Vec<(vk::QueueFlags, u32)>,
    presenting: Vec<u32>,
    extensions: Vec<&'static CStr>,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    capabilities: vk::SurfaceCapabilitiesKHR,
}

impl MockGpu {
    /// One combined graphics+present family, swapchain support, the
    /// preferred format, FIFO and MAILBOX, a fixed 800x600 surface.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            families: vec![(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                1,
            )],
            presenting: vec![0],
            extensions: vec![ash::khr::swapchain::NAME],
            formats: vec![PREFERRED_SURFACE_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            capabilities: caps(2, 8, Some((800, 600))),
        }
    }

    pub fn device_type(mut self, device_type: vk::PhysicalDeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn families(mut self, families: &[(vk::QueueFlags, u32)]) -> Self {
        self.families = families.to_vec();
        self
    }

    pub fn presenting_on(mut self, families: &[u32]) -> Self {
        self.presenting = families.to_vec();
        self
    }

    pub fn extensions(mut self, extensions: &[&'static CStr]) -> Self {
        self.extensions = extensions.to_vec();
        self
    }

    pub fn formats(mut self, formats: &[vk::SurfaceFormatKHR]) -> Self {
        self.formats = formats.to_vec();
        self
    }

    pub fn present_modes(mut self, modes: &[vk::PresentModeKHR]) -> Self {
        self.present_modes = modes.to_vec();
        self
    }

    pub fn capabilities(mut self, capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SurfaceQuery {
    Capabilities,
    Formats,
    PresentModes,
}

#[derive(Clone, Copy, Debug)]
pub struct ViewRecord {
    pub image: vk::Image,
    pub format: vk::Format,
    pub view_type: vk::ImageViewType,
    pub aspect: vk::ImageAspectFlags,
    pub base_mip: u32,
    pub levels: u32,
    pub base_layer: u32,
    pub layers: u32,
    pub identity_swizzle: bool,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: BTreeMap<&'static str, usize>,
    created: BTreeMap<&'static str, usize>,
    destroyed: BTreeMap<&'static str, usize>,
    events: Vec<Event>,
    violations: Vec<String>,
    instance_request: Option<InstanceRequest>,
    sinks: Vec<(vk::DebugUtilsMessengerEXT, Arc<dyn DiagnosticSink>)>,
    device_request: Option<DeviceRequest>,
    device_gpu: Option<usize>,
    swapchain_request: Option<SwapchainRequest>,
    swapchain_images: Vec<vk::Image>,
    view_attempts: usize,
    view_requests: Vec<ViewRecord>,
}

impl State {
    fn live(&self, kind: &str) -> usize {
        self.live.get(kind).copied().unwrap_or(0)
    }

    fn create(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        *self.live.entry(kind).or_default() += 1;
        *self.created.entry(kind).or_default() += 1;
        self.events.push(Event::Created(kind));
        0x1_0000 + self.next_handle
    }

    /// Records a violation for every still-live child kind.
    fn destroy(&mut self, kind: &'static str, children: &[&'static str]) {
        for &child in children {
            let n = self.live(child);
            if n > 0 {
                self.violations
                    .push(format!("{kind} destroyed while {n} {child}(s) alive"));
            }
        }
        match self.live.get_mut(kind) {
            Some(n) if *n > 0 => *n -= 1,
            _ => self.violations.push(format!("{kind} destroyed twice")),
        }
        *self.destroyed.entry(kind).or_default() += 1;
        self.events.push(Event::Destroyed(kind));
    }
}

fn serve<T: Clone>(src: &[T], count: &mut u32, out: Option<&mut [T]>) -> VkResult<()> {
    match out {
        None => *count = src.len() as u32,
        Some(dst) => {
            let n = dst.len().min(src.len());
            dst[..n].clone_from_slice(&src[..n]);
            *count = n as u32;
        }
    }
    Ok(())
}

pub struct MockDriver {
    gpus: Vec<MockGpu>,
    layers: Vec<&'static CStr>,
    debug_messenger: bool,
    fail_instance: Option<vk::Result>,
    fail_surface: Option<vk::Result>,
    fail_device: Option<vk::Result>,
    fail_swapchain: Option<vk::Result>,
    fail_images: Option<vk::Result>,
    fail_view_at: Option<usize>,
    failing_queries: RefCell<BTreeSet<(usize, SurfaceQuery)>>,
    extra_images: u32,
    state: RefCell<State>,
}

impl MockDriver {
    pub fn new(gpus: Vec<MockGpu>) -> Self {
        Self {
            gpus,
            layers: vec![KHRONOS_VALIDATION],
            debug_messenger: true,
            fail_instance: None,
            fail_surface: None,
            fail_device: None,
            fail_swapchain: None,
            fail_images: None,
            fail_view_at: None,
            failing_queries: RefCell::default(),
            extra_images: 0,
            state: RefCell::default(),
        }
    }

    pub fn single_gpu() -> Self {
        Self::new(vec![MockGpu::new("Mock GPU")])
    }

    pub fn with_layers(mut self, layers: &[&'static CStr]) -> Self {
        self.layers = layers.to_vec();
        self
    }

    pub fn without_debug_messenger(mut self) -> Self {
        self.debug_messenger = false;
        self
    }

    pub fn failing_instance(mut self, result: vk::Result) -> Self {
        self.fail_instance = Some(result);
        self
    }

    pub fn failing_surface(mut self, result: vk::Result) -> Self {
        self.fail_surface = Some(result);
        self
    }

    pub fn failing_device(mut self, result: vk::Result) -> Self {
        self.fail_device = Some(result);
        self
    }

    pub fn failing_swapchain(mut self, result: vk::Result) -> Self {
        self.fail_swapchain = Some(result);
        self
    }

    pub fn failing_swapchain_images(mut self, result: vk::Result) -> Self {
        self.fail_images = Some(result);
        self
    }

    /// Makes `query` on the `gpu`-th device fail with `ERROR_SURFACE_LOST_KHR`.
    pub fn failing_query(self, gpu: usize, query: SurfaceQuery) -> Self {
        self.fail_query(gpu, query);
        self
    }

    /// Like `failing_query`, for a driver already in use.
    pub fn fail_query(&self, gpu: usize, query: SurfaceQuery) {
        self.failing_queries.borrow_mut().insert((gpu, query));
    }

    fn query_gpu(&self, phys: vk::PhysicalDevice, query: SurfaceQuery) -> VkResult<&MockGpu> {
        let (index, gpu) = self.gpu(phys)?;
        if self.failing_queries.borrow().contains(&(index, query)) {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        }
        Ok(gpu)
    }

    /// Fails the `index`-th image view creation (zero-based).
    pub fn failing_view_at(mut self, index: usize) -> Self {
        self.fail_view_at = Some(index);
        self
    }

    /// Swapchains hand out `extra` more images than requested.
    pub fn with_extra_images(mut self, extra: u32) -> Self {
        self.extra_images = extra;
        self
    }

    pub fn physical_device(&self, index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(0x1000 + index as u64)
    }

    fn gpu(&self, phys: vk::PhysicalDevice) -> VkResult<(usize, &MockGpu)> {
        let index = phys.as_raw().wrapping_sub(0x1000) as usize;
        self.gpus
            .get(index)
            .map(|gpu| (index, gpu))
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    /// Sends a message through every attached messenger.
    pub fn emit(
        &self,
        severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        types: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &str,
    ) {
        let sinks: Vec<Arc<dyn DiagnosticSink>> = self
            .state
            .borrow()
            .sinks
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            deliver(sink.as_ref(), severity, types, message);
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn created(&self, kind: &str) -> usize {
        self.state.borrow().created.get(kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: &str) -> usize {
        self.state.borrow().destroyed.get(kind).copied().unwrap_or(0)
    }

    pub fn live_instances(&self) -> usize {
        self.state.borrow().live("instance")
    }

    pub fn live_messengers(&self) -> usize {
        self.state.borrow().live("messenger")
    }

    pub fn live_surfaces(&self) -> usize {
        self.state.borrow().live("surface")
    }

    pub fn live_devices(&self) -> usize {
        self.state.borrow().live("device")
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.borrow().live("swapchain")
    }

    pub fn live_views(&self) -> usize {
        self.state.borrow().live("view")
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.values().sum()
    }

    pub fn last_instance_request(&self) -> Option<InstanceRequest> {
        self.state.borrow().instance_request.clone()
    }

    pub fn last_device_request(&self) -> Option<DeviceRequest> {
        self.state.borrow().device_request.clone()
    }

    pub fn last_swapchain_request(&self) -> Option<SwapchainRequest> {
        self.state.borrow().swapchain_request.clone()
    }

    pub fn view_requests(&self) -> Vec<ViewRecord> {
        self.state.borrow().view_requests.clone()
    }
}

impl Driver for MockDriver {
    fn enumerate_instance_layers(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> VkResult<()> {
        let props: Vec<vk::LayerProperties> = self
            .layers
            .iter()
            .map(|name| vk::LayerProperties {
                layer_name: raw_from_name(name),
                ..Default::default()
            })
            .collect();
        serve(&props, count, out)
    }

    fn create_instance(&self, request: &InstanceRequest) -> VkResult<vk::Instance> {
        if let Some(err) = self.fail_instance {
            return Err(err);
        }
        if request
            .layers
            .iter()
            .any(|l| !self.layers.contains(&l.as_c_str()))
        {
            return Err(vk::Result::ERROR_LAYER_NOT_PRESENT);
        }
        let mut st = self.state.borrow_mut();
        st.instance_request = Some(request.clone());
        Ok(vk::Instance::from_raw(st.create("instance")))
    }

    fn destroy_instance(&self, _instance: vk::Instance) {
        self.state
            .borrow_mut()
            .destroy("instance", &["messenger", "surface", "device"]);
    }

    fn supports_debug_messenger(&self, _instance: vk::Instance) -> bool {
        self.debug_messenger
            && self.state.borrow().instance_request.as_ref().is_some_and(|r| {
                r.extensions
                    .iter()
                    .any(|e| e.as_c_str() == ash::ext::debug_utils::NAME)
            })
    }

    fn create_debug_messenger(
        &self,
        instance: vk::Instance,
        request: &DebugMessengerRequest,
    ) -> VkResult<vk::DebugUtilsMessengerEXT> {
        if !self.supports_debug_messenger(instance) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        let mut st = self.state.borrow_mut();
        let messenger = vk::DebugUtilsMessengerEXT::from_raw(st.create("messenger"));
        st.sinks.push((messenger, Arc::clone(&request.sink)));
        Ok(messenger)
    }

    fn destroy_debug_messenger(
        &self,
        _instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    ) {
        let mut st = self.state.borrow_mut();
        st.sinks.retain(|(m, _)| *m != messenger);
        st.destroy("messenger", &[]);
    }

    fn create_surface(
        &self,
        _instance: vk::Instance,
        _display: RawDisplayHandle,
        _window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        if let Some(err) = self.fail_surface {
            return Err(err);
        }
        Ok(vk::SurfaceKHR::from_raw(
            self.state.borrow_mut().create("surface"),
        ))
    }

    fn destroy_surface(&self, _instance: vk::Instance, _surface: vk::SurfaceKHR) {
        self.state.borrow_mut().destroy("surface", &["swapchain"]);
    }

    fn enumerate_physical_devices(
        &self,
        _instance: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> VkResult<()> {
        let handles: Vec<vk::PhysicalDevice> =
            (0..self.gpus.len()).map(|i| self.physical_device(i)).collect();
        serve(&handles, count, out)
    }

    fn physical_device_properties(&self, phys: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let Ok((_, gpu)) = self.gpu(phys) else {
            return vk::PhysicalDeviceProperties::default();
        };
        let name = CString::new(gpu.name).unwrap_or_default();
        vk::PhysicalDeviceProperties {
            device_name: raw_from_name(&name),
            device_type: gpu.device_type,
            ..Default::default()
        }
    }

    fn queue_family_properties(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> VkResult<()> {
        let (_, gpu) = self.gpu(phys)?;
        let props: Vec<vk::QueueFamilyProperties> = gpu
            .families
            .iter()
            .map(|&(queue_flags, queue_count)| vk::QueueFamilyProperties {
                queue_flags,
                queue_count,
                ..Default::default()
            })
            .collect();
        serve(&props, count, out)
    }

    fn device_extensions(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> VkResult<()> {
        let (_, gpu) = self.gpu(phys)?;
        let props: Vec<vk::ExtensionProperties> = gpu
            .extensions
            .iter()
            .map(|name| vk::ExtensionProperties {
                extension_name: raw_from_name(name),
                spec_version: 1,
            })
            .collect();
        serve(&props, count, out)
    }

    fn surface_support(
        &self,
        phys: vk::PhysicalDevice,
        family: u32,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        Ok(self.gpu(phys)?.1.presenting.contains(&family))
    }

    fn surface_capabilities(
        &self,
        phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.query_gpu(phys, SurfaceQuery::Capabilities)?.capabilities)
    }

    fn surface_formats(
        &self,
        phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::SurfaceFormatKHR]>,
    ) -> VkResult<()> {
        serve(&self.query_gpu(phys, SurfaceQuery::Formats)?.formats, count, out)
    }

    fn surface_present_modes(
        &self,
        phys: vk::PhysicalDevice,
        _surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::PresentModeKHR]>,
    ) -> VkResult<()> {
        serve(
            &self.query_gpu(phys, SurfaceQuery::PresentModes)?.present_modes,
            count,
            out,
        )
    }

    fn create_device(
        &self,
        phys: vk::PhysicalDevice,
        request: &DeviceRequest,
    ) -> VkResult<vk::Device> {
        if let Some(err) = self.fail_device {
            return Err(err);
        }
        let (index, gpu) = self.gpu(phys)?;
        let mut st = self.state.borrow_mut();
        for (i, q) in request.queues.iter().enumerate() {
            let available = gpu.families.get(q.family as usize).map(|f| f.1);
            let repeated = request.queues[..i].iter().any(|p| p.family == q.family);
            if repeated || !available.is_some_and(|n| (q.priorities.len() as u32) <= n) {
                st.violations
                    .push(format!("invalid queue request for family {}", q.family));
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
        }
        let supported = |name: &CString| gpu.extensions.contains(&name.as_c_str());
        if !request.extensions.iter().all(supported) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        st.device_request = Some(request.clone());
        st.device_gpu = Some(index);
        Ok(vk::Device::from_raw(st.create("device")))
    }

    fn device_queue(&self, device: vk::Device, family: u32, index: u32) -> vk::Queue {
        vk::Queue::from_raw((device.as_raw() << 8) | ((family as u64) << 4) | index as u64)
    }

    fn destroy_device(&self, _device: vk::Device) {
        self.state
            .borrow_mut()
            .destroy("device", &["swapchain", "view"]);
    }

    fn create_swapchain(
        &self,
        _device: vk::Device,
        request: &SwapchainRequest,
    ) -> VkResult<vk::SwapchainKHR> {
        if let Some(err) = self.fail_swapchain {
            return Err(err);
        }
        let mut st = self.state.borrow_mut();
        if let Some(gpu) = st.device_gpu.and_then(|i| self.gpus.get(i)) {
            let caps = gpu.capabilities;
            let n = request.min_image_count;
            if n < caps.min_image_count || (caps.max_image_count != 0 && n > caps.max_image_count) {
                st.violations
                    .push(format!("image count {n} outside surface limits"));
            }
        }
        if let Sharing::Concurrent(families) = &request.sharing {
            if families.len() < 2 {
                st.violations
                    .push("concurrent sharing with fewer than two families".to_owned());
            }
        }
        st.swapchain_request = Some(request.clone());
        let count = request.min_image_count + self.extra_images;
        st.swapchain_images = (0..count)
            .map(|i| vk::Image::from_raw(0x2_0000 + i as u64))
            .collect();
        Ok(vk::SwapchainKHR::from_raw(st.create("swapchain")))
    }

    fn swapchain_images(
        &self,
        _device: vk::Device,
        _swapchain: vk::SwapchainKHR,
        count: &mut u32,
        out: Option<&mut [vk::Image]>,
    ) -> VkResult<()> {
        if let Some(err) = self.fail_images {
            return Err(err);
        }
        serve(&self.state.borrow().swapchain_images, count, out)
    }

    fn destroy_swapchain(&self, _device: vk::Device, _swapchain: vk::SwapchainKHR) {
        self.state.borrow_mut().destroy("swapchain", &["view"]);
    }

    fn create_image_view(
        &self,
        _device: vk::Device,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        let mut st = self.state.borrow_mut();
        let attempt = st.view_attempts;
        st.view_attempts += 1;
        if self.fail_view_at == Some(attempt) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let c = info.components;
        let range = info.subresource_range;
        st.view_requests.push(ViewRecord {
            image: info.image,
            format: info.format,
            view_type: info.view_type,
            aspect: range.aspect_mask,
            base_mip: range.base_mip_level,
            levels: range.level_count,
            base_layer: range.base_array_layer,
            layers: range.layer_count,
            identity_swizzle: [c.r, c.g, c.b, c.a]
                .iter()
                .all(|&s| s == vk::ComponentSwizzle::IDENTITY),
        });
        Ok(vk::ImageView::from_raw(st.create("view")))
    }

    fn destroy_image_view(&self, _device: vk::Device, _view: vk::ImageView) {
        self.state.borrow_mut().destroy("view", &[]);
    }
}

/// A window stand-in.
pub struct MockTarget {
    pub size: RenderSize,
    pub extensions: Vec<CString>,
    pub broken_handles: bool,
}

impl MockTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            extensions: vec![ash::khr::surface::NAME.to_owned()],
            broken_handles: false,
        }
    }
}

impl PresentTarget for MockTarget {
    fn raw_handles(&self) -> anyhow::Result<(RawDisplayHandle, RawWindowHandle)> {
        if self.broken_handles {
            anyhow::bail!("window already closed");
        }
        Ok(handles())
    }

    fn required_presentation_extensions(&self) -> anyhow::Result<Vec<CString>> {
        Ok(self.extensions.clone())
    }

    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::raw_matches;

    #[test]
    fn names_round_trip_through_mock_tables() {
        let mock = MockDriver::single_gpu();
        let mut count = 0;
        mock.device_extensions(mock.physical_device(0), &mut count, None)
            .unwrap();
        let mut props = vec![vk::ExtensionProperties::default(); count as usize];
        mock.device_extensions(mock.physical_device(0), &mut count, Some(&mut props))
            .unwrap();
        assert!(raw_matches(&props[0].extension_name, ash::khr::swapchain::NAME));
    }
}
