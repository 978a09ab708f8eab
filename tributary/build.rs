//! The generated code is committed under `src/generated`. Set
//! `TRIBUTARY_REGENERATE_PROTO` to rebuild it from `proto/tributary.proto`
//! (requires `protoc`).

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/tributary.proto");
    println!("cargo:rerun-if-env-changed=TRIBUTARY_REGENERATE_PROTO");
    if std::env::var_os("TRIBUTARY_REGENERATE_PROTO").is_none() {
        return Ok(());
    }
    tonic_build::configure()
        .build_server(false)
        .out_dir("src/generated")
        .compile(&["proto/tributary.proto"], &["proto"])?;
    Ok(())
}
