// Build script to compile the protobuf definitions into Rust code.
//
// Also emits a file descriptor set so the server can register a gRPC
// reflection service.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    tonic_build::configure()
        .file_descriptor_set_path(out_dir.join("newsfeed_descriptor.bin"))
        .compile_protos(&["proto/newsfeed.proto"], &["proto"])?;

    Ok(())
}
