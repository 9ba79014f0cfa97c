//! LXC driver — shells out to the host `lxc` client.
//!
//! Creation launches the image (the runtime auto-starts it) and then stops
//! the container so it begins life in Stopped. When the description names a
//! runtime config file, a generated config is written under the container's
//! state directory; the runtime only picks it up if the description also
//! routes it there, which the stock parser never does — kept as observed
//! behavior, not silently repaired.

use std::path::PathBuf;
use std::process::Output;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use boxgrid_core::{ContainerSpec, ResourceSample};

use crate::driver::{ContainerDriver, DriverError};
use crate::resources::{self, CpuTracker};

/// Image used when the description leaves `image` empty.
const DEFAULT_IMAGE: &str = "ubuntu:20.04";

/// Driver for the host `lxc` client.
pub struct LxcDriver {
    max_containers: u32,
    cpu: Mutex<CpuTracker>,
}

impl LxcDriver {
    /// `max_containers` is the capacity this worker advertises in every
    /// heartbeat.
    pub fn new(max_containers: u32) -> Self {
        Self {
            max_containers,
            cpu: Mutex::new(CpuTracker::new()),
        }
    }

    async fn lxc(&self, args: &[&str]) -> Result<Output, DriverError> {
        debug!(command = %format!("lxc {}", args.join(" ")), "running lxc");
        let output = Command::new("lxc").args(args).output().await?;
        Ok(output)
    }

    /// Run an lxc subcommand, mapping a non-zero exit to `CommandFailed`.
    async fn lxc_checked(&self, args: &[&str]) -> Result<Output, DriverError> {
        let output = self.lxc(args).await?;
        if !output.status.success() {
            return Err(DriverError::CommandFailed {
                command: format!("lxc {}", args.join(" ")),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.lxc(&["info", name]).await?.status.success())
    }
}

#[async_trait]
impl ContainerDriver for LxcDriver {
    async fn create(&self, spec: &ContainerSpec) -> Result<(), DriverError> {
        if spec.name.is_empty() {
            return Err(DriverError::InvalidSpec("empty container name"));
        }

        if self.exists(&spec.name).await? {
            info!(name = %spec.name, "container already exists");
            return Ok(());
        }

        let image = if spec.image.is_empty() {
            DEFAULT_IMAGE
        } else {
            &spec.image
        };
        self.lxc_checked(&["launch", image, &spec.name]).await?;

        // Launch auto-starts; new containers begin life stopped.
        let _ = self.lxc(&["stop", &spec.name]).await;

        if !spec.config_file.is_empty() {
            let path = runtime_config_path(&spec.name);
            if let Err(e) = std::fs::write(&path, render_config(spec)) {
                warn!(name = %spec.name, path = %path.display(), error = %e,
                      "failed to write runtime config");
            }
        }

        for (key, value) in parse_env_pairs(spec.environment.as_deref().unwrap_or_default()) {
            let env_key = format!("environment.{key}");
            let _ = self
                .lxc(&["config", "set", &spec.name, &env_key, &value])
                .await;
        }

        info!(name = %spec.name, %image, "container created");
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), DriverError> {
        if !self.exists(name).await? {
            return Err(DriverError::NotFound(name.to_string()));
        }
        self.lxc_checked(&["start", name]).await?;
        info!(%name, "container started");
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DriverError> {
        if !self.exists(name).await? {
            return Err(DriverError::NotFound(name.to_string()));
        }
        self.lxc_checked(&["stop", name]).await?;
        info!(%name, "container stopped");
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), DriverError> {
        if !self.exists(name).await? {
            debug!(%name, "container already absent");
            return Ok(());
        }
        let _ = self.lxc(&["stop", name]).await;
        self.lxc_checked(&["delete", name]).await?;
        info!(%name, "container destroyed");
        Ok(())
    }

    async fn sample(&self) -> Result<ResourceSample, DriverError> {
        let cpu_pct = {
            let mut tracker = self.cpu.lock().unwrap_or_else(|p| p.into_inner());
            tracker.sample()
        };

        let output = self.lxc(&["list", "--format", "csv"]).await?;
        let container_count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .count() as u32;

        Ok(ResourceSample {
            cpu_pct,
            memory_pct: resources::memory_percent(),
            disk_pct: resources::disk_percent("/"),
            container_count,
            max_containers: self.max_containers,
        })
    }
}

/// Where the generated runtime config for `name` lands.
fn runtime_config_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/var/lib/lxc/{name}/config"))
}

/// Render the runtime config stanza for a container description.
fn render_config(spec: &ContainerSpec) -> String {
    let mut out = String::new();
    out.push_str(&format!("# LXC Configuration for {}\n", spec.name));
    out.push_str(&format!("lxc.uts.name = {}\n", spec.name));

    if spec.cpu_limit > 0 {
        out.push_str(&format!("lxc.cgroup2.cpu.max = {}\n", spec.cpu_limit));
    }
    if spec.memory_limit > 0 {
        out.push_str(&format!("lxc.cgroup2.memory.max = {}M\n", spec.memory_limit));
    }

    if spec.privileged {
        out.push_str("lxc.init.uid = 0\n");
        out.push_str("lxc.init.gid = 0\n");
    } else {
        out.push_str("lxc.idmap = u 0 100000 65536\n");
        out.push_str("lxc.idmap = g 0 100000 65536\n");
    }

    if spec.network.is_some() {
        out.push_str("lxc.net.0.type = veth\n");
        out.push_str("lxc.net.0.link = lxcbr0\n");
        out.push_str("lxc.net.0.flags = up\n");
        out.push_str("lxc.net.0.hwaddr = 00:16:3e:xx:xx:xx\n");
    }

    for mount in spec
        .mounts
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|m| !m.is_empty())
    {
        out.push_str(&format!("lxc.mount.entry = {mount}\n"));
    }

    out
}

/// Split a `K=V,K=V` environment blob into pairs; entries without `=` are
/// dropped.
fn parse_env_pairs(blob: &str) -> Vec<(String, String)> {
    blob.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
