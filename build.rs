//! Build script: Npcap link setup for Windows
//!
//! `pnet` links against Npcap's Packet and wpcap libraries on Windows. The
//! SDK location defaults to `C:\npcap\npcap-sdk-1.15` and can be overridden
//! with `NPCAP_SDK_DIR`.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=NPCAP_SDK_DIR");

    // Host cfg! would be wrong when cross-compiling
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") {
        return;
    }

    let sdk = env::var_os("NPCAP_SDK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\npcap\npcap-sdk-1.15"));
    let lib_dir = match env::var("CARGO_CFG_TARGET_ARCH").as_deref() {
        Ok("aarch64") => sdk.join("Lib").join("ARM64"),
        Ok("x86_64") => sdk.join("Lib").join("x64"),
        _ => sdk.join("Lib"),
    };

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=Packet");
    println!("cargo:rustc-link-lib=wpcap");
}
