fn main() {
    // Embed the UTC build time; `record_admin --version` and /health report it.
    println!("cargo:rustc-env=RADM_BUILD_TIME={}", build_time());
    println!("cargo:rerun-if-changed=build.rs");
}

fn build_time() -> String {
    std::process::Command::new("date")
        .args(["-u", "+%Y-%m-%dT%H:%M:%SZ"])
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
