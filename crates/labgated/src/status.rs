//! Mapping from engine errors onto gRPC statuses.
//!
//! Statuses carry a stable numeric code, `inform*10000 + object*100 +
//! detail`, in front of the human message so callers can branch without
//! parsing prose.

use labgate_device::DeviceError;
use labgate_engine::EngineError;
use labgate_ipam::IpamError;
use tonic::Status;

/// Numeric error codes shared with the platform's other services.
pub mod code {
    const INFORM_INTERNAL: u32 = 0;
    const INFORM_INVALID_DATA: u32 = 2;

    pub(super) const OBJECT_PLATFORM: u32 = 0;
    pub(super) const OBJECT_POSTGRES: u32 = 1;
    const OBJECT_GRPC: u32 = 2;
    pub(super) const OBJECT_IPTABLES: u32 = 3;
    pub(super) const OBJECT_WIREGUARD: u32 = 4;
    pub(super) const OBJECT_CLIENT: u32 = 5;

    const fn build(inform: u32, object: u32, detail: u32) -> u32 {
        inform * 10_000 + object * 100 + detail
    }

    /// Auth failures: invalid data on the gRPC object.
    #[must_use]
    pub const fn unauthenticated(detail: u32) -> u32 {
        build(INFORM_INVALID_DATA, OBJECT_GRPC, detail)
    }

    /// Caller-input failures on the client object.
    #[must_use]
    pub const fn invalid_client_data(detail: u32) -> u32 {
        build(INFORM_INVALID_DATA, OBJECT_CLIENT, detail)
    }

    /// Internal failures, by owning object.
    #[must_use]
    pub const fn internal(object: u32) -> u32 {
        build(INFORM_INTERNAL, object, 0)
    }
}

fn device_object(err: &DeviceError) -> u32 {
    match err {
        DeviceError::CommandFailed { command, .. } | DeviceError::Spawn { command, .. } => {
            if command.starts_with("iptables") {
                code::OBJECT_IPTABLES
            } else {
                code::OBJECT_WIREGUARD
            }
        }
        DeviceError::DumpParse { .. } | DeviceError::Io(_) => code::OBJECT_WIREGUARD,
    }
}

/// Converts an engine failure into the status returned to RPC callers.
#[must_use]
pub fn engine_status(err: EngineError) -> Status {
    let invalid = |detail: u32, err: &EngineError| {
        Status::invalid_argument(format!("#{} {err}", code::invalid_client_data(detail)))
    };
    let internal = |object: u32, err: &EngineError| {
        Status::internal(format!("#{} {err}", code::internal(object)))
    };

    match &err {
        EngineError::InvalidAllowedIps(_) => invalid(1, &err),
        EngineError::InvalidUserId => invalid(2, &err),
        EngineError::InvalidGroupId => invalid(3, &err),
        EngineError::Store(_) => internal(code::OBJECT_POSTGRES, &err),
        EngineError::Ipam(IpamError::Backend(_)) => internal(code::OBJECT_POSTGRES, &err),
        EngineError::Ipam(_) => internal(code::OBJECT_PLATFORM, &err),
        EngineError::Device(device_err) => internal(device_object(device_err), &err),
        EngineError::Keys(_)
        | EngineError::ServerNotInitialized
        | EngineError::CorruptRow { .. }
        | EngineError::Aggregate(_) => internal(code::OBJECT_CLIENT, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_user_id_maps_to_invalid_argument_detail_2() {
        let status = engine_status(EngineError::InvalidUserId);
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().starts_with("#20502 "));
    }

    #[test]
    fn invalid_group_id_maps_to_detail_3() {
        let status = engine_status(EngineError::InvalidGroupId);
        assert!(status.message().starts_with("#20503 "));
    }

    #[test]
    fn iptables_failures_carry_the_iptables_object_code() {
        let device_err = DeviceError::CommandFailed {
            command: "iptables -A FORWARD -s 10.128.0.2/32 -j DROP".to_string(),
            exit_code: 1,
            stderr: String::new(),
        };
        let status = engine_status(EngineError::Device(device_err));
        assert_eq!(status.code(), tonic::Code::Internal);
        assert!(status.message().starts_with("#300 "));
    }

    #[test]
    fn wg_failures_carry_the_wireguard_object_code() {
        let device_err = DeviceError::CommandFailed {
            command: "wg set wg0 peer k remove".to_string(),
            exit_code: 1,
            stderr: String::new(),
        };
        let status = engine_status(EngineError::Device(device_err));
        assert!(status.message().starts_with("#400 "));
    }

    #[test]
    fn auth_codes_land_on_the_grpc_object() {
        assert_eq!(code::unauthenticated(1), 20_201);
        assert_eq!(code::unauthenticated(3), 20_203);
    }
}
