//! Device-count capability.
//!
//! The count is read fresh on every query. The NVIDIA probe spawns
//! `nvidia-smi` per call and the child is killed when the call ends, so no
//! driver handle outlives a query.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Number of visible devices; 0 when the driver is absent or fails.
    async fn device_count(&self) -> u32;
}

/// Fixed count, used when the operator overrides detection.
#[derive(Debug, Clone, Copy)]
pub struct StaticGpuProbe(pub u32);

#[async_trait]
impl GpuProbe for StaticGpuProbe {
    async fn device_count(&self) -> u32 {
        self.0
    }
}

pub struct NvidiaSmiProbe {
    program: String,
    timeout: Duration,
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self {
            program: "nvidia-smi".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl NvidiaSmiProbe {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn query(&self) -> Result<u32, String> {
        let child = Command::new(&self.program)
            .args(["--query-gpu=index", "--format=csv,noheader"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.program, e))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("{} timed out", self.program))?
            .map_err(|e| format!("{} failed: {}", self.program, e))?;

        if !output.status.success() {
            return Err(format!("{} exited with {}", self.program, output.status));
        }
        Ok(count_devices(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn device_count(&self) -> u32 {
        match self.query().await {
            Ok(count) => count,
            Err(reason) => {
                warn!(reason = %reason, "GPU probe unavailable, reporting 0 devices");
                0
            }
        }
    }
}

/// One device per non-empty output line.
fn count_devices(output: &str) -> u32 {
    output.lines().filter(|line| !line.trim().is_empty()).count() as u32
}
