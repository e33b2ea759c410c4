use std::env;
use std::path::PathBuf;

const WATCHED_VARIABLES: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // Without the `ffmpeg` feature nothing links against FFmpeg.
    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        for hint in windows_ffmpeg_hints() {
            println!("cargo:warning={hint}");
        }
    }
}

/// Hints for locating a vcpkg FFmpeg install when `FFMPEG_DIR` is unset.
fn windows_ffmpeg_hints() -> Vec<String> {
    if env::var_os("FFMPEG_DIR").is_some() {
        return Vec::new();
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        return vec![
            "FFMPEG_DIR is not set. Install FFmpeg with vcpkg and set VCPKG_ROOT and FFMPEG_DIR to build thumbq with the `ffmpeg` feature.".to_string(),
        ];
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let install = PathBuf::from(vcpkg_root).join("installed").join(triplet);
    if !install.exists() {
        return vec![format!(
            "VCPKG_ROOT is set but {} does not contain an FFmpeg install.",
            install.display()
        )];
    }

    let mut hints = vec![format!(
        "Found vcpkg FFmpeg at {0}. Set FFMPEG_DIR={0} to skip discovery.",
        install.display()
    )];
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        hints.push("Set VCPKGRS_DYNAMIC=1 if vcpkg built FFmpeg as shared libraries.".to_string());
    }
    hints
}
