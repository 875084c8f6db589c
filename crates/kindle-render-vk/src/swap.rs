// SPDX-License-Identifier: CEPL-1.0
//! Swap negotiation: pick format, present mode, extent and image count from
//! what the surface allows, then build the swapchain and one view per image.
use ash::vk;
use kindle_render::RenderSize;
use std::rc::Rc;
use tracing::{debug, info};

use crate::device::{PhysicalDeviceRecord, QueueFamilies, SurfaceSupport};
use crate::driver::{Sharing, SwapchainRequest};
use crate::error::{BootstrapError, Result};
use crate::logical::LogicalContext;
use crate::query::fetch_all;
use crate::surface::PresentationSurface;

/// `current_extent` value meaning "the swapchain decides".
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VsyncMode {
    Fifo,    // Target monitor refresh rate
    #[default]
    Mailbox, // Low latency, no tearing; FIFO when unavailable
}

#[derive(Clone, Copy, Debug)]
pub struct SwapPreferences {
    pub format: vk::SurfaceFormatKHR,
    pub vsync_mode: VsyncMode,
}

impl Default for SwapPreferences {
    fn default() -> Self {
        Self {
            format: PREFERRED_SURFACE_FORMAT,
            vsync_mode: VsyncMode::default(),
        }
    }
}

// Info only
pub fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        _ => "OTHER",
    }
}

pub fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// The preferred pair wherever it sits in the list, else the first entry.
/// `None` only for an empty list.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first().copied())
}

/// FIFO is always supported, so it is the floor of every preference list.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], mode: VsyncMode) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match mode {
        VsyncMode::Mailbox => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        VsyncMode::Fifo => &[vk::PresentModeKHR::FIFO],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// An inverted min/max pair from the driver resolves to the max.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .max(caps.min_image_extent.width)
                .min(caps.max_image_extent.width),
            height: want
                .height
                .max(caps.min_image_extent.height)
                .min(caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, so the app is not left waiting on the driver
/// right after a present. A zero max means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

/// Queues from different families must declare concurrent access.
pub fn sharing_for(families: QueueFamilies) -> Sharing {
    if families.is_shared() {
        Sharing::Exclusive
    } else {
        Sharing::Concurrent(families.distinct())
    }
}

/// The negotiated swap parameters. Fixed once chosen; changing any of them
/// means negotiating a new configuration.
#[derive(Clone, Copy, Debug)]
pub struct SwapConfiguration {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SwapConfiguration {
    pub fn negotiate(
        support: &SurfaceSupport,
        framebuffer: RenderSize,
        prefs: &SwapPreferences,
    ) -> Option<Self> {
        let surface_format = choose_surface_format(&support.formats, prefs.format)?;
        Some(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes, prefs.vsync_mode),
            extent: extent_from_caps(&support.capabilities, framebuffer),
            image_count: choose_image_count(&support.capabilities),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapImage {
    /// Owned by the swapchain.
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// The swapchain with its images. Views are released before the
/// swapchain, and the swapchain before the device or surface it uses.
#[derive(Debug)]
pub struct PresentationChannel {
    device: Rc<LogicalContext>,
    surface: Rc<PresentationSurface>,
    handle: vk::SwapchainKHR,
    sharing: Sharing,
    images: Vec<SwapImage>,
}

impl PresentationChannel {
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[SwapImage] {
        &self.images
    }

    pub fn sharing(&self) -> &Sharing {
        &self.sharing
    }

    pub fn device(&self) -> &Rc<LogicalContext> {
        &self.device
    }

    pub fn surface(&self) -> &Rc<PresentationSurface> {
        &self.surface
    }
}

impl Drop for PresentationChannel {
    fn drop(&mut self) {
        let driver = self.device.api().driver();
        let device = self.device.handle();
        for img in self.images.drain(..).rev() {
            driver.destroy_image_view(device, img.view);
        }
        driver.destroy_swapchain(device, self.handle);
        debug!("swapchain destroyed");
    }
}

fn color_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping::default(),
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    }
}

/// Re-queries the surface for the chosen device, negotiates a
/// configuration and creates the channel. On any failure everything this
/// call created is released before the error is returned.
pub fn negotiate_and_create(
    device: &Rc<LogicalContext>,
    surface: &Rc<PresentationSurface>,
    record: &PhysicalDeviceRecord,
    framebuffer: RenderSize,
    prefs: &SwapPreferences,
) -> Result<(SwapConfiguration, PresentationChannel)> {
    let driver = device.api().driver();
    let support = SurfaceSupport::query(driver, record.handle, surface.handle())
        .map_err(BootstrapError::query("surface capability query"))?;
    let config = SwapConfiguration::negotiate(&support, framebuffer, prefs)
        .ok_or(BootstrapError::SwapCreationFailed(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
    debug!(
        "negotiated {} / {:?}, {}, {}x{}, {} image(s)",
        fmt_name(config.format),
        config.color_space,
        pm_name(config.present_mode),
        config.extent.width,
        config.extent.height,
        config.image_count
    );

    let request = SwapchainRequest {
        surface: surface.handle(),
        min_image_count: config.image_count,
        format: config.format,
        color_space: config.color_space,
        extent: config.extent,
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        sharing: sharing_for(device.families()),
        pre_transform: support.capabilities.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode: config.present_mode,
        clipped: true,
    };
    let handle = driver
        .create_swapchain(device.handle(), &request)
        .map_err(BootstrapError::SwapCreationFailed)?;

    // From here on the channel owns what has been created.
    let mut channel = PresentationChannel {
        device: Rc::clone(device),
        surface: Rc::clone(surface),
        handle,
        sharing: request.sharing,
        images: Vec::new(),
    };

    let images = fetch_all(|count, out| driver.swapchain_images(device.handle(), handle, count, out))
        .map_err(BootstrapError::query("vkGetSwapchainImagesKHR"))?;
    channel.images.reserve(images.len());
    for (index, image) in images.into_iter().enumerate() {
        let view = driver
            .create_image_view(device.handle(), &color_view_info(image, config.format))
            .map_err(|result| BootstrapError::ImageViewCreationFailed { index, result })?;
        channel.images.push(SwapImage { image, view });
    }

    info!(
        "Vulkan swapchain ready ({}x{}, fmt {}, {}, {} images)",
        config.extent.width,
        config.extent.height,
        fmt_name(config.format),
        pm_name(config.present_mode),
        channel.images.len()
    );
    Ok((config, channel))
}
