// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::Parser;
use kindle_core::init_tracing;
use kindle_platform::WindowTarget;
use kindle_render::PresentTarget;
use kindle_render_vk::swap::{fmt_name, pm_name};
use kindle_render_vk::{AshDriver, BootstrapConfig, Driver, VkContext, VsyncMode};
use tracing::{error, info, warn};

use kindle_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "kindle.toml")]
    config: PathBuf,
    /// Validation layers and driver messages: true | false (overrides the file)
    #[arg(long)]
    diagnostics: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
struct VulkanCfg {
    #[serde(default = "default_app_name")]
    app_name: String,
    /// Unset means on for debug builds only.
    #[serde(default)]
    diagnostics: Option<bool>,
    #[serde(default)]
    vsync_mode: VsyncModeCfg,
    #[serde(default = "default_device_extensions")]
    device_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum VsyncModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    vulkan: VulkanCfg,
}

impl Default for VulkanCfg {
    fn default() -> Self {
        VulkanCfg {
            app_name: default_app_name(),
            diagnostics: None,
            vsync_mode: VsyncModeCfg::Mailbox,
            device_extensions: default_device_extensions(),
        }
    }
}

fn default_app_name() -> String {
    "kindle".to_owned()
}
fn default_device_extensions() -> Vec<String> {
    vec!["VK_KHR_swapchain".to_owned()]
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

fn bootstrap_config(cfg: &AppCfg, diagnostics_flag: Option<bool>) -> BootstrapConfig {
    let vk = &cfg.vulkan;
    let mut out = BootstrapConfig::default();
    out.instance.app_name = vk.app_name.clone();
    if let Some(on) = diagnostics_flag.or(vk.diagnostics) {
        out.instance.diagnostics = on;
    }
    out.swap.vsync_mode = match vk.vsync_mode {
        VsyncModeCfg::Fifo => VsyncMode::Fifo,
        VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
    };
    out.device_extensions = vk
        .device_extensions
        .iter()
        .filter_map(|name| match CString::new(name.as_str()) {
            Ok(name) => Some(name),
            Err(_) => {
                warn!("ignoring malformed device extension name {name:?}");
                None
            }
        })
        .collect();
    out
}

fn bootstrap(window: &Window, cfg: &BootstrapConfig) -> Result<VkContext> {
    let driver: Rc<dyn Driver> = Rc::new(AshDriver::load().context("loading Vulkan")?);
    let target = WindowTarget::new(window);
    let size = target.framebuffer_size();
    if size.is_empty() {
        warn!(
            "window framebuffer is {}x{}; the swap extent will come from the surface limits",
            size.width, size.height
        );
    } else {
        info!("window framebuffer {}x{}", size.width, size.height);
    }
    VkContext::bootstrap(driver, &target, cfg).context("Vulkan bootstrap")
}

struct App {
    cfg: BootstrapConfig,
    window: Option<Window>,
    context: Option<VkContext>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let window = match event_loop
            .create_window(Window::default_attributes().with_title("kindle"))
        {
            Ok(window) => window,
            Err(e) => {
                error!("create_window failed: {e}");
                event_loop.exit();
                return;
            }
        };

        match bootstrap(&window, &self.cfg) {
            Ok(ctx) => {
                let swap = ctx.swap_config();
                let families = ctx.queue_families();
                info!(
                    "ready: {} ({:?}), graphics family {}, presentation family {}",
                    ctx.device_name(),
                    ctx.device_type(),
                    families.graphics,
                    families.presentation
                );
                info!(
                    "swapchain {}x{}, {}, {}, {} images, diagnostics {}",
                    swap.extent.width,
                    swap.extent.height,
                    fmt_name(swap.format),
                    pm_name(swap.present_mode),
                    ctx.images().len(),
                    if ctx.diagnostics_attached() { "on" } else { "off" }
                );
                self.context = Some(ctx);
            }
            Err(e) => {
                error!("{e:#}");
                event_loop.exit();
            }
        }

        self.window = Some(window);
        event_loop.set_control_flow(ControlFlow::Wait);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                // Context before window: the surface must not outlive it.
                self.context = None;
                self.window = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) if self.context.is_some() => {
                info!(
                    "Resized → {}x{}; swapchain keeps its negotiated extent",
                    size.width, size.height
                );
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = bootstrap_config(&load_cfg(&args.config), args.diagnostics);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        window: None,
        context: None,
    };
    event_loop.run_app(&mut app)?;
    Ok(())
}
