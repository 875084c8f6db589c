// SPDX-License-Identifier: CEPL-1.0
//! Instance creation: the root of every other handle in the pipeline.
use ash::vk;
use std::cell::Cell;
use std::ffi::{CStr, CString};
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::driver::{DebugMessengerRequest, Driver, InstanceRequest};
use crate::error::{BootstrapError, Result};
use crate::query::{fetch_all, raw_matches};

pub const KHRONOS_VALIDATION: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub app_name: String,
    pub app_version: u32,
    pub engine_name: String,
    pub api_version: u32,
    /// Enables the debug-utils extension and `validation_layers`.
    pub diagnostics: bool,
    pub validation_layers: Vec<CString>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: "kindle".to_owned(),
            app_version: vk::make_api_version(0, 0, 1, 0),
            engine_name: "kindle".to_owned(),
            api_version: vk::API_VERSION_1_3,
            diagnostics: cfg!(debug_assertions),
            validation_layers: vec![KHRONOS_VALIDATION.to_owned()],
        }
    }
}

/// The process-wide API instance. Released last, once every `Rc` held by
/// surfaces, devices and messengers is gone.
pub struct ApiContext {
    driver: Rc<dyn Driver>,
    handle: vk::Instance,
    diagnostics: bool,
    missing_diagnostics_reported: Cell<bool>,
}

impl std::fmt::Debug for ApiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiContext")
            .field("handle", &self.handle)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

fn push_unique(list: &mut Vec<CString>, name: &CStr) {
    if !list.iter().any(|n| n.as_c_str() == name) {
        list.push(name.to_owned());
    }
}

/// NUL bytes cannot cross into the driver, so they are stripped.
fn c_name(field: &str, name: &str) -> CString {
    CString::new(name).unwrap_or_else(|_| {
        warn!("{field} {name:?} contains NUL bytes; they are dropped");
        CString::new(name.replace('\0', "")).unwrap_or_default()
    })
}

impl ApiContext {
    /// Creates the instance with `platform_extensions` plus, when
    /// diagnostics are on, the debug-utils extension and the configured
    /// validation layers. Every requested layer must be present.
    pub fn create(
        driver: Rc<dyn Driver>,
        config: &InstanceConfig,
        platform_extensions: &[CString],
        creation_messenger: Option<DebugMessengerRequest>,
    ) -> Result<Rc<Self>> {
        let mut extensions = Vec::with_capacity(platform_extensions.len() + 1);
        for name in platform_extensions {
            push_unique(&mut extensions, name);
        }

        let mut layers = Vec::new();
        if config.diagnostics {
            push_unique(&mut extensions, ash::ext::debug_utils::NAME);

            let available = fetch_all(|count, out| driver.enumerate_instance_layers(count, out))
                .map_err(BootstrapError::query("vkEnumerateInstanceLayerProperties"))?;
            for wanted in &config.validation_layers {
                if !available.iter().any(|l| raw_matches(&l.layer_name, wanted)) {
                    return Err(BootstrapError::UnsupportedLayer(
                        wanted.to_string_lossy().into_owned(),
                    ));
                }
                push_unique(&mut layers, wanted);
            }
        }

        let request = InstanceRequest {
            app_name: c_name("application name", &config.app_name),
            app_version: config.app_version,
            engine_name: c_name("engine name", &config.engine_name),
            api_version: config.api_version,
            extensions,
            layers,
            creation_messenger: creation_messenger.filter(|_| config.diagnostics),
        };
        debug!(
            "instance extensions {:?}, layers {:?}",
            request.extensions, request.layers
        );

        let handle = driver
            .create_instance(&request)
            .map_err(BootstrapError::InstanceCreationFailed)?;
        info!(
            "Vulkan instance created for {} ({} extensions, {} layers)",
            config.app_name,
            request.extensions.len(),
            request.layers.len()
        );

        Ok(Rc::new(Self {
            driver,
            handle,
            diagnostics: config.diagnostics,
            missing_diagnostics_reported: Cell::new(false),
        }))
    }

    pub fn handle(&self) -> vk::Instance {
        self.handle
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn diagnostics_enabled(&self) -> bool {
        self.diagnostics
    }

    pub(crate) fn report_missing_diagnostics(&self) {
        if !self.missing_diagnostics_reported.replace(true) {
            warn!("debug messenger entry points unavailable; diagnostics disabled");
        }
    }

    pub fn missing_diagnostics_reported(&self) -> bool {
        self.missing_diagnostics_reported.get()
    }
}

impl Drop for ApiContext {
    fn drop(&mut self) {
        self.driver.destroy_instance(self.handle);
        debug!("Vulkan instance destroyed");
    }
}
