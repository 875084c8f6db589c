// SPDX-License-Identifier: CEPL-1.0
//! Routes driver and validation-layer messages to a caller-supplied sink.
//!
//! Diagnostics are advisory. A sink cannot fail the pipeline, a panicking
//! sink is contained, and missing messenger entry points turn attachment
//! into a no-op that is reported once per instance.
use ash::vk;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::driver::DebugMessengerRequest;
use crate::instance::ApiContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        if flags.contains(S::ERROR) {
            Self::Error
        } else if flags.contains(S::WARNING) {
            Self::Warning
        } else if flags.contains(S::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    General,
    Validation,
    Performance,
    Other,
}

impl Category {
    pub fn from_vk(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        if flags.contains(T::VALIDATION) {
            Self::Validation
        } else if flags.contains(T::PERFORMANCE) {
            Self::Performance
        } else if flags.contains(T::GENERAL) {
            Self::General
        } else {
            Self::Other
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DiagnosticRecord<'a> {
    pub severity: Severity,
    pub category: Category,
    pub message: &'a str,
}

/// Receives diagnostic records. May be called from whatever thread the
/// driver reports on.
pub trait DiagnosticSink: Send + Sync {
    fn receive(&self, record: &DiagnosticRecord<'_>);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&DiagnosticRecord<'_>) + Send + Sync,
{
    fn receive(&self, record: &DiagnosticRecord<'_>) {
        self(record)
    }
}

/// Default sink: one `tracing` event per record, at the matching level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn receive(&self, record: &DiagnosticRecord<'_>) {
        let DiagnosticRecord {
            severity,
            category,
            message,
        } = *record;
        match severity {
            Severity::Verbose => trace!("[Vulkan {:?}] {}", category, message),
            Severity::Info => info!("[Vulkan {:?}] {}", category, message),
            Severity::Warning => warn!("[Vulkan {:?}] {}", category, message),
            Severity::Error => error!("[Vulkan {:?}] {}", category, message),
        }
    }
}

/// Hands one raw driver message to a sink. Never unwinds.
pub(crate) fn deliver(
    sink: &dyn DiagnosticSink,
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    message: &str,
) {
    let record = DiagnosticRecord {
        severity: Severity::from_vk(severity),
        category: Category::from_vk(types),
        message,
    };
    if catch_unwind(AssertUnwindSafe(|| sink.receive(&record))).is_err() {
        warn!("diagnostic sink panicked; message dropped");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    pub types: vk::DebugUtilsMessageTypeFlagsEXT,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            types: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        }
    }
}

impl DiagnosticsConfig {
    pub fn request(&self, sink: Arc<dyn DiagnosticSink>) -> DebugMessengerRequest {
        DebugMessengerRequest {
            severity: self.severity,
            types: self.types,
            sink,
        }
    }
}

/// An attached messenger. Detaches on drop; holds the instance alive until then.
pub struct DiagnosticHandle {
    api: Rc<ApiContext>,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DiagnosticHandle {
    /// Attaches `sink` to `api`.
    ///
    /// Returns `None` when the instance was created without diagnostics, when
    /// the driver did not load the messenger entry points, or when the driver
    /// refuses the messenger.
    pub fn attach(
        api: &Rc<ApiContext>,
        config: &DiagnosticsConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Option<Self> {
        if !api.diagnostics_enabled() {
            return None;
        }
        let driver = api.driver();
        if !driver.supports_debug_messenger(api.handle()) {
            api.report_missing_diagnostics();
            return None;
        }
        match driver.create_debug_messenger(api.handle(), &config.request(sink)) {
            Ok(messenger) => {
                debug!("debug messenger attached");
                Some(Self {
                    api: Rc::clone(api),
                    messenger,
                })
            }
            Err(e) => {
                warn!("debug messenger creation failed ({e}); continuing without diagnostics");
                None
            }
        }
    }

    pub fn detach(self) {}

    pub fn handle(&self) -> vk::DebugUtilsMessengerEXT {
        self.messenger
    }
}

impl Drop for DiagnosticHandle {
    fn drop(&mut self) {
        self.api
            .driver()
            .destroy_debug_messenger(self.api.handle(), self.messenger);
        debug!("debug messenger detached");
    }
}
