//! Build script: embed the git hash and check GPU toolkits before
//! whisper-rs-sys starts compiling.

use std::process::Command;

fn feature_enabled(name: &str) -> bool {
    std::env::var_os(format!("CARGO_FEATURE_{}", name.to_uppercase())).is_some()
}

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={hash}");
    }
    println!("cargo:rerun-if-changed=.git/HEAD");

    if feature_enabled("cuda") {
        require_tool("nvcc", &["--version"], "CUDA toolkit", "https://developer.nvidia.com/cuda-downloads");
        if let Some((major, minor)) = Command::new("nvcc")
            .arg("--version")
            .output()
            .ok()
            .and_then(|out| parse_cuda_version(&String::from_utf8_lossy(&out.stdout)))
        {
            println!("cargo::warning=building whisper with CUDA {major}.{minor}; scroll up here if the build fails");
        }
    }
    if feature_enabled("vulkan") {
        require_tool("vulkaninfo", &["--summary"], "Vulkan SDK", "https://vulkan.lunarg.com/");
    }
}

/// Abort the build with install instructions when `tool` is missing.
fn require_tool(tool: &str, args: &[&str], what: &str, url: &str) {
    if Command::new(tool).args(args).output().is_err() {
        panic!(
            "\n\n`{tool}` not found: the {what} is not installed.\n\
             Install: {url}\n\
             Or build without GPU support: cargo build --release\n"
        );
    }
}

/// "release X.Y" from `nvcc --version`.
fn parse_cuda_version(text: &str) -> Option<(u32, u32)> {
    let after = &text[text.find("release ")? + "release ".len()..];
    let version = &after[..after.find(',')?];
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
