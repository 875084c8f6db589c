// SPDX-License-Identifier: CEPL-1.0
use anyhow::Context;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::rc::Rc;
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};
use crate::instance::ApiContext;

/// Instance extensions needed to bind a surface on `display`.
pub fn presentation_extensions(display: RawDisplayHandle) -> anyhow::Result<Vec<CString>> {
    let names = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;
    Ok(names
        .iter()
        // SAFETY: ash-window hands out pointers to static, nul-terminated names.
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_owned())
        .collect())
}

/// A window bound to the instance. One per window lifetime; no rebinding.
#[derive(Debug)]
pub struct PresentationSurface {
    api: Rc<ApiContext>,
    handle: vk::SurfaceKHR,
}

impl PresentationSurface {
    pub fn create(
        api: &Rc<ApiContext>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Rc<Self>> {
        let handle = api
            .driver()
            .create_surface(api.handle(), display, window)
            .map_err(BootstrapError::SurfaceCreationFailed)?;
        info!("presentation surface bound");
        Ok(Rc::new(Self {
            api: Rc::clone(api),
            handle,
        }))
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn api(&self) -> &Rc<ApiContext> {
        &self.api
    }
}

impl Drop for PresentationSurface {
    fn drop(&mut self) {
        self.api
            .driver()
            .destroy_surface(self.api.handle(), self.handle);
        debug!("presentation surface destroyed");
    }
}
