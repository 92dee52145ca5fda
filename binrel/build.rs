use std::env;

// Cargo only hands the target triple to build scripts, so we pass it along to the crate code,
// where it's used to describe the host platform.
fn main() {
    println!(
        "cargo:rustc-env=TARGET={}",
        env::var("TARGET").unwrap_or_else(|_| String::from("unknown"))
    );
    // By default Cargo only runs the build script when a file changes. This makes it re-run on
    // target change.
    println!("cargo:rerun-if-changed-env=TARGET");
}
