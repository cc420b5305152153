fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Allow packagers to pin the reported revision when building outside a git checkout
    println!("cargo:rerun-if-env-changed=HOLOCRON_GIT_HASH");
    if let Ok(hash) = std::env::var("HOLOCRON_GIT_HASH") {
        println!("cargo:rustc-env=HOLOCRON_GIT_HASH={}", hash);
    }
}
