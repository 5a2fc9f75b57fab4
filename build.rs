use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var(
        "PROTOC",
        protoc_bin_vendored::protoc_bin_path()?,
    );

    let proto_root = PathBuf::from("proto");

    let proto_files = vec![proto_root.join("listdpb/list.proto")];

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&proto_files, &[proto_root])?;

    Ok(())
}
