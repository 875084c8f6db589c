// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral view of the window a graphics context presents into.
use anyhow::Result;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CString;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// What the windowing layer hands a graphics backend.
///
/// A backend calls these once each: extensions while creating its API
/// instance, handles while binding a surface, and the framebuffer size while
/// negotiating the swap extent. It never touches window state otherwise.
pub trait PresentTarget {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)>;

    /// Instance extensions the platform needs to present into this window.
    fn required_presentation_extensions(&self) -> Result<Vec<CString>>;

    fn framebuffer_size(&self) -> RenderSize;
}
