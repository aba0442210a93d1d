/// Builds the gRPC client and server code for `gridlink.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The `data_chunk` fields of the upload and download messages are generated
/// as `Bytes` (from the `bytes` crate) instead of `Vec<u8>`. Chunking a blob
/// is then a matter of slicing a shared buffer, and received frames can be
/// handed to callers without another copy.
///
/// # Files and Paths
///
/// - Proto file: `proto/gridlink.proto`
/// - Includes: `proto/`
///
/// Generated code is included in `src/lib.rs` via
/// `tonic::include_proto!("gridlink")`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/gridlink.proto");

    let mut config = tonic_prost_build::Config::new();
    config.bytes([
        ".gridlink.UploadResultDataRequest.data_chunk",
        ".gridlink.DownloadResultDataResponse.data_chunk",
    ]);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/gridlink.proto"],
        &["proto"],
    )?;
    Ok(())
}
