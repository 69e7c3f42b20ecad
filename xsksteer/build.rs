use std::path::PathBuf;

fn main() {
    // Built separately with `cargo build -p xsksteer-ebpf --release --target bpfel-unknown-none`.
    let target_dir = "target/bpfel-unknown-none/release";
    let elf_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(target_dir)
        .join("xsksteer");
    println!("cargo:rustc-env=XSKSTEER_EBPF_OBJECT={}", elf_path.display());
    println!("cargo:rerun-if-changed=build.rs");
}
