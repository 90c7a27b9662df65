//! Protobuf messages and generated service stubs for `connection.ConnectionService`.
//!
//! The message structs are written by hand with `prost` derives and mirror
//! `proto/connection.proto`. The server and client glue is generated by
//! `build.rs` and included at the bottom of this module.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CloseResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandRequest {
    #[prost(string, tag = "1")]
    pub command: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandResponse {
    #[prost(int32, tag = "1")]
    pub exit_code: i32,
    #[prost(string, tag = "2")]
    pub stdout: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub stderr: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutFileRequest {
    #[prost(string, tag = "1")]
    pub remote_path: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub file_data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutFileResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchFileRequest {
    #[prost(string, tag = "1")]
    pub remote_path: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchFileResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub file_data: ::prost::alloc::vec::Vec<u8>,
}

/// File metadata carried by control frames.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileInfo {
    #[prost(string, tag = "1")]
    pub local_path: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub remote_path: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub file_size: i64,
}

/// Control frame: names the operation of a transfer stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlMessage {
    #[prost(enumeration = "control_message::Operation", tag = "1")]
    pub operation: i32,
    #[prost(message, optional, tag = "2")]
    pub info: ::core::option::Option<FileInfo>,
}

pub mod control_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operation {
        Upload = 0,
        Download = 1,
    }

    impl Operation {
        /// Name as written in the protobuf definition.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Upload => "UPLOAD",
                Self::Download => "DOWNLOAD",
            }
        }
    }
}

/// Data frame: a chunk of raw file bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileData {
    #[prost(bytes = "vec", tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileTransferMessage {
    #[prost(oneof = "file_transfer_message::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<file_transfer_message::Payload>,
}

pub mod file_transfer_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Control(super::ControlMessage),
        #[prost(message, tag = "2")]
        Data(super::FileData),
    }
}

impl FileTransferMessage {
    /// Build a control frame.
    pub fn control(operation: control_message::Operation, info: FileInfo) -> Self {
        Self {
            payload: Some(file_transfer_message::Payload::Control(ControlMessage {
                operation: operation as i32,
                info: Some(info),
            })),
        }
    }

    /// Build a data frame.
    pub fn data(data: Vec<u8>) -> Self {
        Self {
            payload: Some(file_transfer_message::Payload::Data(FileData { data })),
        }
    }
}

include!(concat!(env!("OUT_DIR"), "/connection.ConnectionService.rs"));
