//! Stamps the build id and puts `memory.x` where the linker finds it.

use std::{
    env, fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

fn main() {
    // A fixed id can be passed in for reproducible builds
    let build_id = match env::var("CAN_BOOT_BUILD_ID") {
        Ok(id) => id,
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string(),
    };
    println!("cargo:rustc-env=CAN_BOOT_BUILD_ID={}", build_id);
    println!("cargo:rerun-if-env-changed=CAN_BOOT_BUILD_ID");

    // Only the bare metal target links against memory.x
    let target = env::var("TARGET").unwrap_or_default();
    if target.starts_with("thumb") {
        let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));
        fs::copy("memory.x", out.join("memory.x")).expect("memory.x is readable");
        println!("cargo:rustc-link-search={}", out.display());
    }
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
