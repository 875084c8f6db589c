// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::ffi::CString;
use std::rc::Rc;
use tracing::{debug, info};

use crate::device::{QueueFamilies, SelectedDevice};
use crate::driver::{DeviceRequest, QueueRequest};
use crate::error::{BootstrapError, Result};
use crate::instance::ApiContext;

const QUEUE_PRIORITY: f32 = 1.0;

/// The logical device and the two queues the renderer submits to.
///
/// When graphics and presentation share a family both queue handles are
/// the same queue.
#[derive(Debug)]
pub struct LogicalContext {
    api: Rc<ApiContext>,
    handle: vk::Device,
    physical: vk::PhysicalDevice,
    families: QueueFamilies,
    extensions: Vec<CString>,
    graphics_queue: vk::Queue,
    presentation_queue: vk::Queue,
}

impl LogicalContext {
    /// One queue per distinct family at maximum priority, the required
    /// extensions, and default features.
    pub fn create(
        api: &Rc<ApiContext>,
        selected: &SelectedDevice,
        required_extensions: &[CString],
    ) -> Result<Rc<Self>> {
        let families = selected.families;
        let queues = families
            .distinct()
            .into_iter()
            .map(|family| QueueRequest {
                family,
                priorities: vec![QUEUE_PRIORITY],
            })
            .collect();

        let mut extensions: Vec<CString> = Vec::with_capacity(required_extensions.len());
        for name in required_extensions {
            if !extensions.contains(name) {
                extensions.push(name.clone());
            }
        }

        let request = DeviceRequest { queues, extensions };
        let driver = api.driver();
        let handle = driver
            .create_device(selected.record.handle, &request)
            .map_err(BootstrapError::LogicalContextCreationFailed)?;

        let graphics_queue = driver.device_queue(handle, families.graphics, 0);
        let presentation_queue = driver.device_queue(handle, families.presentation, 0);
        info!(
            "logical device created on {} ({} queue request(s), extensions {:?})",
            selected.record.name,
            request.queues.len(),
            request.extensions
        );

        Ok(Rc::new(Self {
            api: Rc::clone(api),
            handle,
            physical: selected.record.handle,
            families,
            extensions: request.extensions,
            graphics_queue,
            presentation_queue,
        }))
    }

    pub fn handle(&self) -> vk::Device {
        self.handle
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn extensions(&self) -> &[CString] {
        &self.extensions
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn presentation_queue(&self) -> vk::Queue {
        self.presentation_queue
    }

    pub fn api(&self) -> &Rc<ApiContext> {
        &self.api
    }
}

impl Drop for LogicalContext {
    fn drop(&mut self) {
        self.api.driver().destroy_device(self.handle);
        debug!("logical device destroyed");
    }
}
