//! Build script for vantage-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (`Option::is_some_and` and let-else need Rust 1.70.0+)
//! - Target platform (live kernel and process backends read Linux procfs)
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer
//! - **Linux**: required for `from_kernel` / `from_pid`; core dumps and mock
//!   programs work on any Unix target

fn main()
{
    // Check minimum Rust version
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.70.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "vantage-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    check_target_os();
}

fn check_target_os()
{
    // cfg!(target_os) describes the host in a build script; cargo exports the
    // real target through the environment instead.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_family = std::env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();

    if !target_family.split(',').any(|family| family == "unix") {
        panic!("vantage-core requires a Unix target, found {target_os}");
    }

    if target_os != "linux" {
        println!("cargo:warning=vantage-core: live kernel and process backends need Linux procfs; only core dumps and mock programs will work on {target_os}");
    }
}
