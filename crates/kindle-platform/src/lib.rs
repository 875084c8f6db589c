// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. `winit` is re-exported so the launcher does not pin its
//! own copy.
pub use winit;

use anyhow::{anyhow, Result};
use kindle_render::{PresentTarget, RenderSize};
use kindle_render_vk::presentation_extensions;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CString;
use winit::window::Window;

/// A borrowed winit window seen as a presentation target.
pub struct WindowTarget<'a> {
    window: &'a Window,
}

impl<'a> WindowTarget<'a> {
    pub fn new(window: &'a Window) -> Self {
        Self { window }
    }
}

impl PresentTarget for WindowTarget<'_> {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let dh = self
            .window
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = self
            .window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        Ok((dh, wh))
    }

    fn required_presentation_extensions(&self) -> Result<Vec<CString>> {
        let (dh, _) = self.raw_handles()?;
        let owned = presentation_extensions(dh)?;
        tracing::debug!("platform presentation extensions: {:?}", owned);
        Ok(owned)
    }

    fn framebuffer_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize::new(size.width, size.height)
    }
}
