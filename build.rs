//! Build script: embeds the git hash and checks GPU toolkits for the whisper backend.
//!
//! whisper-rs-sys fails deep inside cmake when a toolkit is missing, so the
//! presence check runs first and stops the build with a readable message.

use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if std::env::var_os("CARGO_FEATURE_CUDA").is_some() {
        require_tool("nvcc", &["--version"], "CUDA", "https://developer.nvidia.com/cuda-downloads");
    }
    if std::env::var_os("CARGO_FEATURE_VULKAN").is_some() {
        require_tool("glslc", &["--version"], "Vulkan SDK", "https://vulkan.lunarg.com/");
    }
}

fn require_tool(tool: &str, args: &[&str], toolkit: &str, url: &str) {
    let found = Command::new(tool)
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success());

    if !found {
        panic!(
            "\n\n`{tool}` not found: {toolkit} is not installed.\n\
             Install: {url}\n\
             Or build without GPU acceleration: cargo build --release\n"
        );
    }
    println!("cargo::warning={toolkit} detected");
}

