//! Compiles `proto/tether.proto` into the generated `tether.v1` module.

fn main() {
    println!("cargo:rerun-if-changed=proto/tether.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/tether.proto"], &["proto"])
        .expect("failed to compile tether.proto");
}
