//! Build script for stagearray.
//!
//! Reports which optional features are on and nudges toward the ones that
//! usually matter.

use std::env;

fn main() {
    // Re-run if features change
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_VULKAN");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");

    let vulkan_enabled = env::var("CARGO_FEATURE_VULKAN").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let is_release = profile == "release";

    if vulkan_enabled {
        emit_info("Vulkan backend enabled");
        emit_note("Wrap your logical device with VulkanBackend::new(&instance, physical_device, device)");
    } else if !is_release {
        emit_note("Only the dummy backend is built; enable 'vulkan' for real devices:");
        emit_note("  stagearray = { version = \"0.3\", features = [\"vulkan\"] }");
    }

    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    }

    if diagnostics_enabled {
        emit_info("Diagnostics are printed to stderr in addition to the log facade");
        if is_release {
            emit_warning("'diagnostics' enabled in a release build");
        }
    }

    if env::var("TARGET").map(|t| t.contains("wasm")).unwrap_or(false) {
        emit_warning("WebAssembly target detected; only the dummy backend is usable");
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[stagearray] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[stagearray]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[stagearray] warning: {}", msg);
}
