//! Generates the `connection.ConnectionService` server and client stubs.
//!
//! Message types are hand-written prost structs in `src/gateway/proto.rs`, so
//! only the service glue is generated here and no `protoc` is required.

fn main() {
    let codec = "tonic::codec::ProstCodec";
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::gateway::proto::{input}"))
            .output_type(format!("crate::gateway::proto::{output}"))
            .codec_path(codec)
    };

    let service = tonic_build::manual::Service::builder()
        .name("ConnectionService")
        .package("connection")
        .method(method("connect", "Connect", "ConnectRequest", "ConnectResponse").build())
        .method(method("close", "Close", "CloseRequest", "CloseResponse").build())
        .method(
            method("exec_command", "ExecCommand", "CommandRequest", "CommandResponse").build(),
        )
        .method(method("put_file", "PutFile", "PutFileRequest", "PutFileResponse").build())
        .method(
            method("fetch_file", "FetchFile", "FetchFileRequest", "FetchFileResponse").build(),
        )
        .method(
            method(
                "transfer_file",
                "TransferFile",
                "FileTransferMessage",
                "FileTransferMessage",
            )
            .client_streaming()
            .server_streaming()
            .build(),
        )
        .build();

    // The transport `connect` constructor would clash with the Connect RPC.
    tonic_build::manual::Builder::new()
        .build_transport(false)
        .compile(&[service]);
}
