//! GPU detection
//!
//! Detects the accelerator llama.cpp layers can be offloaded to, so the
//! direct-inference service can report its placement policy on startup.

use std::process::Command;

/// GPU information
#[derive(Debug, Clone, Default)]
pub struct GpuInfo {
    pub name: String,
    pub vram_total_mb: u64,
    pub vram_used_mb: u64,
    /// False where usage cannot be read (unified memory)
    pub vram_usage_available: bool,
    pub is_available: bool,
}

impl GpuInfo {
    fn not_detected() -> Self {
        Self {
            name: "GPU not detected".to_string(),
            ..Default::default()
        }
    }
}

/// Detect available GPU (best effort)
pub fn detect_gpu() -> GpuInfo {
    if let Some(info) = detect_gpu_nvidia_smi() {
        return info;
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(info) = detect_gpu_apple_silicon() {
            return info;
        }
    }

    GpuInfo::not_detected()
}

fn detect_gpu_nvidia_smi() -> Option<GpuInfo> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.total,memory.used",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the first GPU from `nvidia-smi --format=csv,noheader,nounits`
pub fn parse_nvidia_smi(stdout: &str) -> Option<GpuInfo> {
    let line = stdout.lines().find(|l| !l.trim().is_empty())?;
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() < 3 {
        return None;
    }

    Some(GpuInfo {
        name: parts[0].to_string(),
        vram_total_mb: parts[1].parse().ok()?,
        vram_used_mb: parts[2].parse().ok()?,
        vram_usage_available: true,
        is_available: true,
    })
}

/// Apple Silicon shares system memory with the GPU (Metal)
#[cfg(target_os = "macos")]
fn detect_gpu_apple_silicon() -> Option<GpuInfo> {
    let brand = sysctl("machdep.cpu.brand_string")?;
    if !brand.contains("Apple") {
        return None;
    }

    let total_ram_mb = sysctl("hw.memsize")
        .and_then(|bytes| bytes.parse::<u64>().ok())
        .map(|bytes| bytes / 1024 / 1024)
        .unwrap_or(0);

    Some(GpuInfo {
        name: format!("{} GPU (Metal, Unified Memory)", brand),
        vram_total_mb: total_ram_mb,
        vram_used_mb: 0,
        vram_usage_available: false,
        is_available: true,
    })
}

#[cfg(target_os = "macos")]
fn sysctl(key: &str) -> Option<String> {
    let output = Command::new("sysctl").args(["-n", key]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi() {
        let info = parse_nvidia_smi("NVIDIA GeForce RTX 4070, 12282, 913\n").unwrap();
        assert_eq!(info.name, "NVIDIA GeForce RTX 4070");
        assert_eq!(info.vram_total_mb, 12282);
        assert_eq!(info.vram_used_mb, 913);
        assert!(info.is_available);
    }

    #[test]
    fn test_parse_nvidia_smi_garbage() {
        assert!(parse_nvidia_smi("").is_none());
        assert!(parse_nvidia_smi("No devices were found").is_none());
    }
}
