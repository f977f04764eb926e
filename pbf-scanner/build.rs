use std::io::Result;

fn main() -> Result<()> {
    let protoc = protoc_bin_vendored::protoc_bin_path()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string()))?;
    prost_build::Config::new()
        .protoc_executable(protoc)
        .compile_protos(&["proto/fileformat.proto", "proto/osmformat.proto"], &["proto/"])?;
    Ok(())
}
