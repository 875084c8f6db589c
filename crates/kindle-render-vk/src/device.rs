// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection: first device, in enumeration order, that can
//! draw, present to the bound surface, and offers every required extension.
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use thiserror::Error;
use tracing::{debug, info};

use crate::driver::{Driver, VkResult};
use crate::error::{BootstrapError, Result};
use crate::instance::ApiContext;
use crate::query::{fetch_all, name_from_raw};
use crate::surface::PresentationSurface;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyRecord {
    pub index: u32,
    pub queue_count: u32,
    pub graphics: bool,
    pub presentation: bool,
}

/// Queue family lookup result. Either slot may still be unresolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub presentation: Option<u32>,
}

impl QueueFamilyIndices {
    /// Graphics and presentation are searched independently; each takes the
    /// first family with at least one queue and the wanted capability.
    pub fn resolve(families: &[QueueFamilyRecord]) -> Self {
        let first = |want: fn(&QueueFamilyRecord) -> bool| {
            families
                .iter()
                .find(|f| f.queue_count > 0 && want(f))
                .map(|f| f.index)
        };
        Self {
            graphics: first(|f| f.graphics),
            presentation: first(|f| f.presentation),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.presentation.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            presentation: self.presentation?,
        })
    }
}

/// Fully resolved queue families. Both may name the same family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub presentation: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.presentation
    }

    /// Distinct family indices, graphics first.
    pub fn distinct(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.presentation]
        }
    }
}

/// What a surface offers on one physical device.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        driver: &dyn Driver,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        Ok(Self {
            capabilities: driver.surface_capabilities(phys, surface)?,
            formats: fetch_all(|count, out| driver.surface_formats(phys, surface, count, out))?,
            present_modes: fetch_all(|count, out| {
                driver.surface_present_modes(phys, surface, count, out)
            })?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Unsuitable {
    #[error("no graphics queue family")]
    NoGraphicsFamily,
    #[error("no queue family can present to the surface")]
    NoPresentationFamily,
    #[error("missing device extensions {0:?}")]
    MissingExtensions(Vec<CString>),
    #[error("surface offers no formats or no present modes")]
    NoSwapSupport,
}

/// Snapshot of one candidate, taken while selecting.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceRecord {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyRecord>,
    pub extensions: BTreeSet<CString>,
    pub surface: SurfaceSupport,
}

impl PhysicalDeviceRecord {
    pub fn inspect(
        driver: &dyn Driver,
        handle: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        let props = driver.physical_device_properties(handle);
        let name = name_from_raw(&props.device_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let families = fetch_all(|count, out| driver.queue_family_properties(handle, count, out))?;
        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in (0u32..).zip(&families) {
            queue_families.push(QueueFamilyRecord {
                index,
                queue_count: family.queue_count,
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                presentation: driver.surface_support(handle, index, surface)?,
            });
        }

        let extensions = fetch_all(|count, out| driver.device_extensions(handle, count, out))?
            .iter()
            .filter_map(|e| name_from_raw(&e.extension_name))
            .collect();

        Ok(Self {
            handle,
            name,
            device_type: props.device_type,
            queue_families,
            extensions,
            surface: SurfaceSupport::query(driver, handle, surface)?,
        })
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        QueueFamilyIndices::resolve(&self.queue_families)
    }

    pub fn missing_extensions(&self, required: &[CString]) -> Vec<CString> {
        required
            .iter()
            .filter(|name| !self.extensions.contains(name.as_c_str()))
            .cloned()
            .collect()
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        self.extensions.contains(name)
    }

    /// Suitability check. On success yields the families the logical
    /// device will be built on.
    pub fn check(&self, required: &[CString]) -> std::result::Result<QueueFamilies, Unsuitable> {
        let indices = self.queue_family_indices();
        let graphics = indices.graphics.ok_or(Unsuitable::NoGraphicsFamily)?;
        let presentation = indices.presentation.ok_or(Unsuitable::NoPresentationFamily)?;

        let missing = self.missing_extensions(required);
        if !missing.is_empty() {
            return Err(Unsuitable::MissingExtensions(missing));
        }
        if !self.surface.is_adequate() {
            return Err(Unsuitable::NoSwapSupport);
        }
        Ok(QueueFamilies {
            graphics,
            presentation,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub record: PhysicalDeviceRecord,
    pub families: QueueFamilies,
}

/// First-fit selection; there is no ranking between suitable devices.
pub fn select_device(
    api: &ApiContext,
    surface: &PresentationSurface,
    required_extensions: &[CString],
) -> Result<SelectedDevice> {
    let driver = api.driver();
    let devices = fetch_all(|count, out| driver.enumerate_physical_devices(api.handle(), count, out))
        .map_err(BootstrapError::query("vkEnumeratePhysicalDevices"))?;
    if devices.is_empty() {
        return Err(BootstrapError::NoDeviceFound);
    }
    debug!("{} physical device(s) enumerated", devices.len());

    for (i, &phys) in devices.iter().enumerate() {
        let record = match PhysicalDeviceRecord::inspect(driver, phys, surface.handle()) {
            Ok(record) => record,
            Err(e) => {
                debug!("device #{i}: capability query failed ({e}); skipped");
                continue;
            }
        };
        match record.check(required_extensions) {
            Ok(families) => {
                info!(
                    "selected device #{i} {} ({:?}); graphics family {}, presentation family {}",
                    record.name, record.device_type, families.graphics, families.presentation
                );
                return Ok(SelectedDevice { record, families });
            }
            Err(reason) => debug!("device #{i} {} unsuitable: {reason}", record.name),
        }
    }
    Err(BootstrapError::NoSuitableDevice)
}
