// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Why the bootstrap sequence stopped.
///
/// Every variant is terminal: by the time one is returned, everything the
/// sequence created before the failing stage has already been released.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not load the Vulkan library: {0}")]
    Loading(String),
    #[error("validation layer {0} is not available")]
    UnsupportedLayer(String),
    #[error("window could not supply {0}")]
    Window(String),
    #[error("instance creation failed: {0}")]
    InstanceCreationFailed(vk::Result),
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(vk::Result),
    #[error("no Vulkan physical device found")]
    NoDeviceFound,
    #[error("no physical device satisfies the required capabilities")]
    NoSuitableDevice,
    #[error("logical device creation failed: {0}")]
    LogicalContextCreationFailed(vk::Result),
    #[error("swapchain creation failed: {0}")]
    SwapCreationFailed(vk::Result),
    #[error("image view creation failed for swapchain image {index}: {result}")]
    ImageViewCreationFailed { index: usize, result: vk::Result },
    #[error("{call} failed: {result}")]
    Query {
        call: &'static str,
        result: vk::Result,
    },
}

impl BootstrapError {
    pub(crate) fn query(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Query { call, result }
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
