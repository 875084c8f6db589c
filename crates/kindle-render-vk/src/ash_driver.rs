// SPDX-License-Identifier: CEPL-1.0
//! `Driver` over the system Vulkan loader.
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::cell::{Ref, RefCell};
use std::ffi::{c_char, c_void, CStr};
use std::ptr;
use std::sync::Arc;
use tracing::debug;

use crate::diagnostics::{deliver, DiagnosticSink};
use crate::driver::{
    DebugMessengerRequest, DeviceRequest, Driver, InstanceRequest, Sharing, SwapchainRequest,
    VkResult,
};
use crate::error::{BootstrapError, Result};
use crate::query::check;

/// Boxed so the address handed to the driver as user data stays put.
type SinkSlot = Box<Arc<dyn DiagnosticSink>>;

struct InstanceFns {
    instance: ash::Instance,
    surface: surface::Instance,
    debug_utils: Option<debug_utils::Instance>,
}

struct DeviceFns {
    device: ash::Device,
    swapchain: swapchain::Device,
}

/// Holds at most one instance and one logical device at a time, which is
/// all the bootstrap sequence ever creates.
pub struct AshDriver {
    entry: Entry,
    instance: RefCell<Option<InstanceFns>>,
    device: RefCell<Option<DeviceFns>>,
    creation_sink: RefCell<Option<SinkSlot>>,
    messengers: RefCell<Vec<(vk::DebugUtilsMessengerEXT, SinkSlot)>>,
}

impl AshDriver {
    pub fn load() -> Result<Self> {
        // SAFETY: the loader library is only used through `entry`, which
        // outlives every table derived from it.
        let entry = unsafe { Entry::load() }.map_err(|e| BootstrapError::Loading(e.to_string()))?;
        debug!("Vulkan loader opened");
        Ok(Self {
            entry,
            instance: RefCell::new(None),
            device: RefCell::new(None),
            creation_sink: RefCell::new(None),
            messengers: RefCell::new(Vec::new()),
        })
    }

    fn instance_fns(&self) -> VkResult<Ref<'_, InstanceFns>> {
        Ref::filter_map(self.instance.borrow(), Option::as_ref)
            .map_err(|_| vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn device_fns(&self) -> VkResult<Ref<'_, DeviceFns>> {
        Ref::filter_map(self.device.borrow(), Option::as_ref)
            .map_err(|_| vk::Result::ERROR_DEVICE_LOST)
    }

    fn has_instance_fn(&self, instance: vk::Instance, name: &CStr) -> bool {
        // SAFETY: `name` is nul-terminated and `instance` is live.
        unsafe { self.entry.get_instance_proc_addr(instance, name.as_ptr()) }.is_some()
    }
}

fn out_ptr<T>(count: &mut u32, out: Option<&mut [T]>) -> *mut T {
    match out {
        Some(buf) => {
            *count = buf.len() as u32;
            buf.as_mut_ptr()
        }
        None => ptr::null_mut(),
    }
}

fn messenger_info<'a>(
    request: &DebugMessengerRequest,
    sink: &'a SinkSlot,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'a> {
    let user_data = &**sink as *const Arc<dyn DiagnosticSink> as *mut c_void;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(request.severity)
        .message_type(request.types)
        .pfn_user_callback(Some(debug_callback))
        .user_data(user_data)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: `user_data` points into a `SinkSlot` kept alive until the
    // messenger (or the instance, for the creation messenger) is destroyed.
    let sink = unsafe { &*(user_data as *const Arc<dyn DiagnosticSink>) };
    // SAFETY: the driver passes valid callback data for the call duration.
    let p_message = unsafe { (*data).p_message };
    let message = if p_message.is_null() {
        "".into()
    } else {
        // SAFETY: non-null messages are nul-terminated.
        unsafe { CStr::from_ptr(p_message) }.to_string_lossy()
    };
    deliver(sink.as_ref(), severity, types, &message);
    vk::FALSE
}

impl Driver for AshDriver {
    fn enumerate_instance_layers(
        &self,
        count: &mut u32,
        out: Option<&mut [vk::LayerProperties]>,
    ) -> VkResult<()> {
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe { (self.entry.fp_v1_0().enumerate_instance_layer_properties)(count, ptr) })
    }

    fn create_instance(&self, request: &InstanceRequest) -> VkResult<vk::Instance> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(&request.app_name)
            .application_version(request.app_version)
            .engine_name(&request.engine_name)
            .engine_version(request.app_version)
            .api_version(request.api_version);
        let extensions: Vec<*const c_char> =
            request.extensions.iter().map(|e| e.as_ptr()).collect();
        let layers: Vec<*const c_char> = request.layers.iter().map(|l| l.as_ptr()).collect();

        let creation_sink: Option<SinkSlot> = request
            .creation_messenger
            .as_ref()
            .map(|m| Box::new(Arc::clone(&m.sink)));
        let mut chained = request
            .creation_messenger
            .as_ref()
            .zip(creation_sink.as_ref())
            .map(|(m, sink)| messenger_info(m, sink));

        let mut info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if let Some(chained) = chained.as_mut() {
            info = info.push_next(chained);
        }

        // SAFETY: every pointer in `info` borrows from locals alive for the call.
        let instance = unsafe { self.entry.create_instance(&info, None) }?;
        let handle = instance.handle();

        let wants_debug = request
            .extensions
            .iter()
            .any(|e| e.as_c_str() == debug_utils::NAME);
        let debug_utils = (wants_debug
            && self.has_instance_fn(handle, c"vkCreateDebugUtilsMessengerEXT")
            && self.has_instance_fn(handle, c"vkDestroyDebugUtilsMessengerEXT"))
        .then(|| debug_utils::Instance::new(&self.entry, &instance));

        let surface = surface::Instance::new(&self.entry, &instance);
        *self.instance.borrow_mut() = Some(InstanceFns {
            instance,
            surface,
            debug_utils,
        });
        *self.creation_sink.borrow_mut() = creation_sink;
        Ok(handle)
    }

    fn destroy_instance(&self, _instance: vk::Instance) {
        if let Some(fns) = self.instance.borrow_mut().take() {
            // SAFETY: owners release every child before the instance.
            unsafe { fns.instance.destroy_instance(None) };
        }
        self.creation_sink.borrow_mut().take();
    }

    fn supports_debug_messenger(&self, _instance: vk::Instance) -> bool {
        self.instance_fns()
            .map(|fns| fns.debug_utils.is_some())
            .unwrap_or(false)
    }

    fn create_debug_messenger(
        &self,
        _instance: vk::Instance,
        request: &DebugMessengerRequest,
    ) -> VkResult<vk::DebugUtilsMessengerEXT> {
        let fns = self.instance_fns()?;
        let debug_utils = fns
            .debug_utils
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        let sink: SinkSlot = Box::new(Arc::clone(&request.sink));
        let info = messenger_info(request, &sink);
        // SAFETY: the sink slot is stored until the messenger is destroyed.
        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&info, None) }?;
        self.messengers.borrow_mut().push((messenger, sink));
        Ok(messenger)
    }

    fn destroy_debug_messenger(
        &self,
        _instance: vk::Instance,
        messenger: vk::DebugUtilsMessengerEXT,
    ) {
        if let Ok(fns) = self.instance_fns() {
            if let Some(debug_utils) = &fns.debug_utils {
                // SAFETY: `messenger` was created from this instance.
                unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
            }
        }
        self.messengers.borrow_mut().retain(|(m, _)| *m != messenger);
    }

    fn create_surface(
        &self,
        _instance: vk::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> VkResult<vk::SurfaceKHR> {
        let fns = self.instance_fns()?;
        // SAFETY: the window outlives the surface; its owner drops the
        // surface before closing the window.
        unsafe { ash_window::create_surface(&self.entry, &fns.instance, display, window, None) }
    }

    fn destroy_surface(&self, _instance: vk::Instance, surface: vk::SurfaceKHR) {
        if let Ok(fns) = self.instance_fns() {
            // SAFETY: no swapchain on `surface` is alive.
            unsafe { fns.surface.destroy_surface(surface, None) };
        }
    }

    fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
        count: &mut u32,
        out: Option<&mut [vk::PhysicalDevice]>,
    ) -> VkResult<()> {
        let fns = self.instance_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe { (fns.instance.fp_v1_0().enumerate_physical_devices)(instance, count, ptr) })
    }

    fn physical_device_properties(&self, phys: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        match self.instance_fns() {
            // SAFETY: `phys` came from this instance's enumeration.
            Ok(fns) => unsafe { fns.instance.get_physical_device_properties(phys) },
            Err(_) => vk::PhysicalDeviceProperties::default(),
        }
    }

    fn queue_family_properties(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::QueueFamilyProperties]>,
    ) -> VkResult<()> {
        let fns = self.instance_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        unsafe {
            (fns.instance
                .fp_v1_0()
                .get_physical_device_queue_family_properties)(phys, count, ptr)
        };
        Ok(())
    }

    fn device_extensions(
        &self,
        phys: vk::PhysicalDevice,
        count: &mut u32,
        out: Option<&mut [vk::ExtensionProperties]>,
    ) -> VkResult<()> {
        let fns = self.instance_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe {
            (fns.instance
                .fp_v1_0()
                .enumerate_device_extension_properties)(phys, ptr::null(), count, ptr)
        })
    }

    fn surface_support(
        &self,
        phys: vk::PhysicalDevice,
        family: u32,
        surface: vk::SurfaceKHR,
    ) -> VkResult<bool> {
        let fns = self.instance_fns()?;
        // SAFETY: handles belong to this instance.
        unsafe {
            fns.surface
                .get_physical_device_surface_support(phys, family, surface)
        }
    }

    fn surface_capabilities(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let fns = self.instance_fns()?;
        // SAFETY: handles belong to this instance.
        unsafe {
            fns.surface
                .get_physical_device_surface_capabilities(phys, surface)
        }
    }

    fn surface_formats(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::SurfaceFormatKHR]>,
    ) -> VkResult<()> {
        let fns = self.instance_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe {
            (fns.surface.fp().get_physical_device_surface_formats_khr)(phys, surface, count, ptr)
        })
    }

    fn surface_present_modes(
        &self,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        count: &mut u32,
        out: Option<&mut [vk::PresentModeKHR]>,
    ) -> VkResult<()> {
        let fns = self.instance_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe {
            (fns.surface
                .fp()
                .get_physical_device_surface_present_modes_khr)(phys, surface, count, ptr)
        })
    }

    fn create_device(
        &self,
        phys: vk::PhysicalDevice,
        request: &DeviceRequest,
    ) -> VkResult<vk::Device> {
        let fns = self.instance_fns()?;
        let queues: Vec<vk::DeviceQueueCreateInfo<'_>> = request
            .queues
            .iter()
            .map(|q| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(q.family)
                    .queue_priorities(&q.priorities)
            })
            .collect();
        let extensions: Vec<*const c_char> =
            request.extensions.iter().map(|e| e.as_ptr()).collect();
        let info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queues)
            .enabled_extension_names(&extensions);

        // SAFETY: every pointer in `info` borrows from locals alive for the call.
        let device = unsafe { fns.instance.create_device(phys, &info, None) }?;
        let handle = device.handle();
        let swapchain = swapchain::Device::new(&fns.instance, &device);
        *self.device.borrow_mut() = Some(DeviceFns { device, swapchain });
        Ok(handle)
    }

    fn device_queue(&self, _device: vk::Device, family: u32, index: u32) -> vk::Queue {
        match self.device_fns() {
            // SAFETY: the queue was requested at device creation.
            Ok(fns) => unsafe { fns.device.get_device_queue(family, index) },
            Err(_) => vk::Queue::null(),
        }
    }

    fn destroy_device(&self, _device: vk::Device) {
        if let Some(fns) = self.device.borrow_mut().take() {
            // SAFETY: the swapchain and its views are already gone.
            unsafe { fns.device.destroy_device(None) };
        }
    }

    fn create_swapchain(
        &self,
        _device: vk::Device,
        request: &SwapchainRequest,
    ) -> VkResult<vk::SwapchainKHR> {
        let fns = self.device_fns()?;
        let (mode, families): (vk::SharingMode, &[u32]) = match &request.sharing {
            Sharing::Exclusive => (vk::SharingMode::EXCLUSIVE, &[][..]),
            Sharing::Concurrent(families) => (vk::SharingMode::CONCURRENT, families.as_slice()),
        };
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(request.surface)
            .min_image_count(request.min_image_count)
            .image_format(request.format)
            .image_color_space(request.color_space)
            .image_extent(request.extent)
            .image_array_layers(1)
            .image_usage(request.usage)
            .image_sharing_mode(mode)
            .queue_family_indices(families)
            .pre_transform(request.pre_transform)
            .composite_alpha(request.composite_alpha)
            .present_mode(request.present_mode)
            .clipped(request.clipped);
        // SAFETY: the surface and device are live for the call.
        unsafe { fns.swapchain.create_swapchain(&info, None) }
    }

    fn swapchain_images(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        count: &mut u32,
        out: Option<&mut [vk::Image]>,
    ) -> VkResult<()> {
        let fns = self.device_fns()?;
        let ptr = out_ptr(count, out);
        // SAFETY: `ptr` is null or points at `*count` writable elements.
        check(unsafe { (fns.swapchain.fp().get_swapchain_images_khr)(device, swapchain, count, ptr) })
    }

    fn destroy_swapchain(&self, _device: vk::Device, swapchain: vk::SwapchainKHR) {
        if let Ok(fns) = self.device_fns() {
            // SAFETY: every view of the swapchain images is already gone.
            unsafe { fns.swapchain.destroy_swapchain(swapchain, None) };
        }
    }

    fn create_image_view(
        &self,
        _device: vk::Device,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        let fns = self.device_fns()?;
        // SAFETY: `info.image` belongs to a live swapchain of this device.
        unsafe { fns.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, _device: vk::Device, view: vk::ImageView) {
        if let Ok(fns) = self.device_fns() {
            // SAFETY: `view` was created on this device.
            unsafe { fns.device.destroy_image_view(view, None) };
        }
    }
}
