//! LOC discovery protocol messages.
//!
//! Spoken between a managed server's child process (client side) and the
//! simulator's embedded LOC server. Three request kinds arrive from the
//! child: `RegisterService`, `DeregisterService` and `GetNeighbourNodes`;
//! neighborhood changes flow back as unsolicited
//! `NeighbourhoodChangedNotification` requests on the same stream.

/// Sentinel message id carried by every protocol-violation response.
pub const PROTOCOL_VIOLATION_ID: u64 = 0x0BAD_C0DE;

/// Top-level LOC envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocMessage {
    /// Message id; responses echo the request id.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Request or response payload.
    #[prost(oneof = "loc_message::Kind", tags = "2, 3")]
    pub kind: Option<loc_message::Kind>,
}

pub mod loc_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Request(super::LocRequest),
        #[prost(message, tag = "3")]
        Response(super::LocResponse),
    }
}

/// LOC request wrapper with the protocol version.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocRequest {
    /// Protocol version bytes, `[major, minor, patch]`.
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// Local-service request payload.
    #[prost(oneof = "loc_request::Request", tags = "2, 3, 4, 5")]
    pub request: Option<loc_request::Request>,
}

pub mod loc_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "2")]
        RegisterService(super::RegisterServiceRequest),
        #[prost(message, tag = "3")]
        DeregisterService(super::DeregisterServiceRequest),
        #[prost(message, tag = "4")]
        GetNeighbourNodes(super::GetNeighbourNodesRequest),
        /// Server-to-client only: pushed on neighborhood changes.
        #[prost(message, tag = "5")]
        NeighbourhoodChanged(super::NeighbourhoodChangedNotification),
    }
}

/// LOC response wrapper.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocResponse {
    /// Outcome status.
    #[prost(enumeration = "LocStatus", tag = "1")]
    pub status: i32,
    /// Response payload, present on success.
    #[prost(oneof = "loc_response::Response", tags = "2, 3, 4, 5")]
    pub response: Option<loc_response::Response>,
}

pub mod loc_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "2")]
        RegisterService(super::RegisterServiceResponse),
        #[prost(message, tag = "3")]
        DeregisterService(super::DeregisterServiceResponse),
        #[prost(message, tag = "4")]
        GetNeighbourNodes(super::GetNeighbourNodesResponse),
        #[prost(message, tag = "5")]
        NeighbourhoodChanged(super::NeighbourhoodChangedResponse),
    }
}

/// LOC status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LocStatus {
    Ok = 0,
    /// Malformed frame, unknown message id, or invalid request subtype.
    ErrorProtocolViolation = 1,
    /// Request was structurally valid but semantically wrong.
    ErrorInvalidValue = 2,
}

/// Kind of a registered local service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServiceKind {
    Profile = 0,
    Proximity = 1,
}

/// Descriptor of a service a node offers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceInfo {
    /// Service kind.
    #[prost(enumeration = "ServiceKind", tag = "1")]
    pub kind: i32,
    /// Primary interface port of the service.
    #[prost(uint32, tag = "2")]
    pub port: u32,
    /// Opaque service data; the 32-byte network id.
    #[prost(bytes = "vec", tag = "3")]
    pub service_data: Vec<u8>,
}

/// Child announces its service to the LOC server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterServiceRequest {
    /// The announced service.
    #[prost(message, optional, tag = "1")]
    pub service: Option<ServiceInfo>,
}

/// Registration response, carrying the owner's configured location.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterServiceResponse {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterServiceRequest {
    #[prost(enumeration = "ServiceKind", tag = "1")]
    pub kind: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeregisterServiceResponse {}

/// Snapshot request for the current neighbor set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetNeighbourNodesRequest {
    /// When true, the stream is remembered and later changes are pushed.
    #[prost(bool, tag = "1")]
    pub keep_alive: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetNeighbourNodesResponse {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeInfo>,
}

/// How to reach a node's LOC endpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeContact {
    /// IPv4 address bytes in network order.
    #[prost(bytes = "vec", tag = "1")]
    pub ip_address: Vec<u8>,
    /// LOC port.
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

/// A neighbor node: contact plus the services it offers.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(message, optional, tag = "1")]
    pub contact: Option<NodeContact>,
    #[prost(message, repeated, tag = "2")]
    pub services: Vec<ServiceInfo>,
    #[prost(double, tag = "3")]
    pub latitude: f64,
    #[prost(double, tag = "4")]
    pub longitude: f64,
}

/// Aggregated neighborhood change push.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighbourhoodChangedNotification {
    #[prost(message, repeated, tag = "1")]
    pub changes: Vec<NeighbourhoodChange>,
}

/// Acknowledgement of a pushed notification.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighbourhoodChangedResponse {}

/// One neighborhood change.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NeighbourhoodChange {
    #[prost(oneof = "neighbourhood_change::Change", tags = "1, 2")]
    pub change: Option<neighbourhood_change::Change>,
}

pub mod neighbourhood_change {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Change {
        /// A peer became a neighbor.
        #[prost(message, tag = "1")]
        AddedNode(super::NodeInfo),
        /// A peer left the neighborhood, identified by network id.
        #[prost(bytes = "vec", tag = "2")]
        RemovedNodeId(Vec<u8>),
    }
}

impl LocMessage {
    /// Wrap a request payload with the given message id.
    pub fn request(id: u64, request: loc_request::Request) -> Self {
        Self {
            id,
            kind: Some(loc_message::Kind::Request(LocRequest {
                version: geosim_types::PROTOCOL_VERSION.to_vec(),
                request: Some(request),
            })),
        }
    }

    /// Wrap a success response echoing `id`.
    pub fn response(id: u64, response: loc_response::Response) -> Self {
        Self {
            id,
            kind: Some(loc_message::Kind::Response(LocResponse {
                status: LocStatus::Ok as i32,
                response: Some(response),
            })),
        }
    }

    /// The single response sent for any protocol violation.
    pub fn protocol_violation() -> Self {
        Self {
            id: PROTOCOL_VIOLATION_ID,
            kind: Some(loc_message::Kind::Response(LocResponse {
                status: LocStatus::ErrorProtocolViolation as i32,
                response: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_carries_sentinel_id() {
        let msg = LocMessage::protocol_violation();
        assert_eq!(msg.id, 0x0BAD_C0DE);
        match msg.kind {
            Some(loc_message::Kind::Response(resp)) => {
                assert_eq!(resp.status, LocStatus::ErrorProtocolViolation as i32);
                assert!(resp.response.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn request_wrapper_carries_version() {
        let msg = LocMessage::request(
            9,
            loc_request::Request::GetNeighbourNodes(GetNeighbourNodesRequest {
                keep_alive: true,
            }),
        );
        match msg.kind {
            Some(loc_message::Kind::Request(req)) => {
                assert_eq!(req.version, geosim_types::PROTOCOL_VERSION.to_vec());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
