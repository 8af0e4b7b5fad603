//! Profile- and proximity-server client protocol messages.
//!
//! Both server kinds share the same envelope, framing and conversation
//! handshake; the payload oneof splits into the profile-side exchanges
//! (hosting, check-in, profile update, profile search) and the
//! proximity-side exchanges (identity verification, activities, activity
//! search). The simulator is always the client.

/// Client protocol envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientMessage {
    /// Message id; responses echo the request id.
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(oneof = "client_message::Kind", tags = "2, 3")]
    pub kind: Option<client_message::Kind>,
}

pub mod client_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        Request(super::ClientRequest),
        #[prost(message, tag = "3")]
        Response(super::ClientResponse),
    }
}

/// Request wrapper: version, conversation signature, payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientRequest {
    /// Protocol version bytes, `[major, minor, patch]`.
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    /// Signature over the exchange's challenge where the flow requires it,
    /// empty otherwise.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    #[prost(
        oneof = "client_request::Request",
        tags = "10, 11, 12, 13, 14, 15, 16, 20, 21, 22, 23, 24"
    )]
    pub request: Option<client_request::Request>,
}

pub mod client_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "10")]
        StartConversation(super::StartConversationRequest),
        #[prost(message, tag = "11")]
        RegisterHosting(super::RegisterHostingRequest),
        #[prost(message, tag = "12")]
        CheckIn(super::CheckInRequest),
        #[prost(message, tag = "13")]
        UpdateProfile(super::UpdateProfileRequest),
        #[prost(message, tag = "14")]
        CancelHosting(super::CancelHostingRequest),
        #[prost(message, tag = "15")]
        ProfileSearch(super::ProfileSearchRequest),
        #[prost(message, tag = "16")]
        ProfileSearchPart(super::ProfileSearchPartRequest),
        #[prost(message, tag = "20")]
        VerifyIdentity(super::VerifyIdentityRequest),
        #[prost(message, tag = "21")]
        CreateActivity(super::CreateActivityRequest),
        #[prost(message, tag = "22")]
        DeleteActivity(super::DeleteActivityRequest),
        #[prost(message, tag = "23")]
        ActivitySearch(super::ActivitySearchRequest),
        #[prost(message, tag = "24")]
        ActivitySearchPart(super::ActivitySearchPartRequest),
    }
}

/// Response wrapper: status, server signature, payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientResponse {
    #[prost(enumeration = "ClientStatus", tag = "1")]
    pub status: i32,
    /// Server signature where the flow requires it (conversation start,
    /// hosting registration), empty otherwise.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    #[prost(
        oneof = "client_response::Response",
        tags = "10, 11, 12, 13, 14, 15, 16, 20, 21, 22, 23, 24"
    )]
    pub response: Option<client_response::Response>,
}

pub mod client_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "10")]
        StartConversation(super::StartConversationResponse),
        #[prost(message, tag = "11")]
        RegisterHosting(super::RegisterHostingResponse),
        #[prost(message, tag = "12")]
        CheckIn(super::CheckInResponse),
        #[prost(message, tag = "13")]
        UpdateProfile(super::UpdateProfileResponse),
        #[prost(message, tag = "14")]
        CancelHosting(super::CancelHostingResponse),
        #[prost(message, tag = "15")]
        ProfileSearch(super::ProfileSearchResponse),
        #[prost(message, tag = "16")]
        ProfileSearchPart(super::ProfileSearchPartResponse),
        #[prost(message, tag = "20")]
        VerifyIdentity(super::VerifyIdentityResponse),
        #[prost(message, tag = "21")]
        CreateActivity(super::CreateActivityResponse),
        #[prost(message, tag = "22")]
        DeleteActivity(super::DeleteActivityResponse),
        #[prost(message, tag = "23")]
        ActivitySearch(super::ActivitySearchResponse),
        #[prost(message, tag = "24")]
        ActivitySearchPart(super::ActivitySearchPartResponse),
    }
}

/// Client protocol status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ClientStatus {
    Ok = 0,
    ErrorProtocolViolation = 1,
    ErrorInvalidSignature = 2,
    ErrorNotFound = 3,
    ErrorQuotaExceeded = 4,
    ErrorInvalidValue = 5,
    ErrorUnauthorized = 6,
    ErrorInternal = 7,
}

/// Opens a conversation; carries the client's 32-byte challenge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartConversationRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
}

/// Conversation reply: the server's public key, its fresh challenge, and
/// (in the envelope signature field) its signature over the client's
/// challenge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartConversationResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub server_public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub version: Vec<u8>,
}

/// The hosting agreement proposed by the client and echoed by the server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HostingContract {
    /// Hosting plan id; empty for the simulator's default plan.
    #[prost(bytes = "vec", tag = "1")]
    pub plan_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub identity_public_key: Vec<u8>,
    /// Contract start, unix seconds.
    #[prost(int64, tag = "3")]
    pub start_time: i64,
    #[prost(string, tag = "4")]
    pub identity_type: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterHostingRequest {
    #[prost(message, optional, tag = "1")]
    pub contract: Option<HostingContract>,
}

/// Echoes the contract byte-for-byte; the envelope signature covers the
/// contract encoding.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterHostingResponse {
    #[prost(message, optional, tag = "1")]
    pub contract: Option<HostingContract>,
}

/// Customer-port check-in; the envelope signature covers `challenge`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckInRequest {
    /// The server challenge from the conversation start.
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CheckInResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateProfileRequest {
    #[prost(message, optional, tag = "1")]
    pub profile: Option<ProfileInformation>,
    /// New profile image bytes; empty when unchanged/absent.
    #[prost(bytes = "vec", tag = "2")]
    pub profile_image: Vec<u8>,
    /// New thumbnail bytes; empty when unchanged/absent.
    #[prost(bytes = "vec", tag = "3")]
    pub thumbnail_image: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateProfileResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelHostingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelHostingResponse {}

/// Proximity-port identity verification; the envelope signature covers
/// `challenge`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerifyIdentityRequest {
    /// The server challenge from the conversation start.
    #[prost(bytes = "vec", tag = "1")]
    pub challenge: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VerifyIdentityResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateActivityRequest {
    #[prost(message, optional, tag = "1")]
    pub activity: Option<ActivityInformation>,
    /// Owner signature over the activity's canonical encoding.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
    /// Network ids of servers the primary must not propagate to.
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub ignored_servers: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateActivityResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteActivityRequest {
    #[prost(uint32, tag = "1")]
    pub id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteActivityResponse {}

/// Profile search with optional name/type/location filters.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchRequest {
    /// Restrict to identities hosted on the queried server.
    #[prost(bool, tag = "1")]
    pub include_hosted_only: bool,
    /// Return image bytes with each record.
    #[prost(bool, tag = "2")]
    pub include_images: bool,
    /// Name filter; empty, `*` and `**` disable it.
    #[prost(string, tag = "3")]
    pub name_filter: String,
    /// Type filter; empty, `*` and `**` disable it.
    #[prost(string, tag = "4")]
    pub type_filter: String,
    /// Whether the location filter below applies.
    #[prost(bool, tag = "5")]
    pub has_location: bool,
    #[prost(double, tag = "6")]
    pub latitude: f64,
    #[prost(double, tag = "7")]
    pub longitude: f64,
    /// Location filter radius in metres.
    #[prost(uint32, tag = "8")]
    pub radius: u32,
    #[prost(uint32, tag = "9")]
    pub max_response_record_count: u32,
    #[prost(uint32, tag = "10")]
    pub max_total_record_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchResponse {
    /// Total matching records held by the server.
    #[prost(uint32, tag = "1")]
    pub total_record_count: u32,
    /// Network ids of every server that contributed to the result.
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub covered_servers: Vec<Vec<u8>>,
    /// First batch of records, at most `max_response_record_count`.
    #[prost(message, repeated, tag = "3")]
    pub profiles: Vec<ProfileQueryResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchPartRequest {
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileSearchPartResponse {
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    #[prost(message, repeated, tag = "2")]
    pub profiles: Vec<ProfileQueryResult>,
}

/// One profile search record.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileQueryResult {
    /// The record is hosted on the queried server.
    #[prost(bool, tag = "1")]
    pub is_hosted: bool,
    /// The hosted identity has an open customer-port session.
    #[prost(bool, tag = "2")]
    pub is_online: bool,
    /// Network id of the hosting server for non-hosted records.
    #[prost(bytes = "vec", tag = "3")]
    pub hosting_server_network_id: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub profile: Option<ProfileInformation>,
    /// Image bytes when `include_images` was requested.
    #[prost(bytes = "vec", tag = "5")]
    pub profile_image: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub thumbnail_image: Vec<u8>,
}

/// Activity search with optional type/time/location filters.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivitySearchRequest {
    /// Restrict to activities whose primary is the queried server.
    #[prost(bool, tag = "1")]
    pub include_primary_only: bool,
    /// Type filter; empty, `*` and `**` disable it.
    #[prost(string, tag = "2")]
    pub type_filter: String,
    /// Whether `start_not_after` applies.
    #[prost(bool, tag = "3")]
    pub has_start_not_after: bool,
    #[prost(int64, tag = "4")]
    pub start_not_after: i64,
    /// Whether `expiration_not_before` applies.
    #[prost(bool, tag = "5")]
    pub has_expiration_not_before: bool,
    #[prost(int64, tag = "6")]
    pub expiration_not_before: i64,
    #[prost(bool, tag = "7")]
    pub has_location: bool,
    #[prost(double, tag = "8")]
    pub latitude: f64,
    #[prost(double, tag = "9")]
    pub longitude: f64,
    #[prost(uint32, tag = "10")]
    pub radius: u32,
    #[prost(uint32, tag = "11")]
    pub max_response_record_count: u32,
    #[prost(uint32, tag = "12")]
    pub max_total_record_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivitySearchResponse {
    #[prost(uint32, tag = "1")]
    pub total_record_count: u32,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub covered_servers: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub activities: Vec<ActivityQueryResult>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivitySearchPartRequest {
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivitySearchPartResponse {
    #[prost(uint32, tag = "1")]
    pub record_index: u32,
    #[prost(message, repeated, tag = "2")]
    pub activities: Vec<ActivityQueryResult>,
}

/// One activity search record.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityQueryResult {
    /// The queried server is the activity's primary.
    #[prost(bool, tag = "1")]
    pub is_primary: bool,
    /// Contact of the primary server for non-primary records.
    #[prost(message, optional, tag = "2")]
    pub primary_server: Option<ContactInfo>,
    #[prost(message, optional, tag = "3")]
    pub activity: Option<ActivityInformation>,
    /// Owner signature over the activity's canonical encoding.
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
}

/// Contact info for a server's primary interface.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContactInfo {
    #[prost(bytes = "vec", tag = "1")]
    pub ip_address: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub primary_port: u32,
}

/// Wire form of an identity's profile.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileInformation {
    /// Protocol version bytes, `[major, minor, patch]`.
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub identity_type: String,
    #[prost(double, tag = "5")]
    pub latitude: f64,
    #[prost(double, tag = "6")]
    pub longitude: f64,
    /// SHA-256 of the profile image, empty when absent.
    #[prost(bytes = "vec", tag = "7")]
    pub profile_image_hash: Vec<u8>,
    /// SHA-256 of the thumbnail, empty when absent.
    #[prost(bytes = "vec", tag = "8")]
    pub thumbnail_image_hash: Vec<u8>,
    #[prost(string, tag = "9")]
    pub extra_data: String,
}

/// Wire form of an activity's metadata. Its canonical prost encoding is
/// what the owner signs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityInformation {
    /// Protocol version bytes, `[major, minor, patch]`.
    #[prost(bytes = "vec", tag = "1")]
    pub version: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub id: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub owner_identity_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub owner_public_key: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub owner_profile_server: Option<ContactInfo>,
    #[prost(string, tag = "6")]
    pub activity_type: String,
    #[prost(double, tag = "7")]
    pub latitude: f64,
    #[prost(double, tag = "8")]
    pub longitude: f64,
    /// Precision radius in metres, [0, 1000].
    #[prost(uint32, tag = "9")]
    pub precision: u32,
    #[prost(int64, tag = "10")]
    pub start_time: i64,
    #[prost(int64, tag = "11")]
    pub expiration_time: i64,
    #[prost(string, tag = "12")]
    pub extra_data: String,
}

impl ClientMessage {
    /// Wrap an unsigned request with the given message id.
    pub fn request(id: u64, request: client_request::Request) -> Self {
        Self::signed_request(id, Vec::new(), request)
    }

    /// Wrap a request carrying a conversation signature.
    pub fn signed_request(
        id: u64,
        signature: Vec<u8>,
        request: client_request::Request,
    ) -> Self {
        Self {
            id,
            kind: Some(client_message::Kind::Request(ClientRequest {
                version: geosim_types::PROTOCOL_VERSION.to_vec(),
                signature,
                request: Some(request),
            })),
        }
    }

    /// Extract the response wrapper, if this is a response.
    pub fn into_response(self) -> Option<ClientResponse> {
        match self.kind {
            Some(client_message::Kind::Response(resp)) => Some(resp),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn contract_echo_compares_by_encoding() {
        let contract = HostingContract {
            plan_id: Vec::new(),
            identity_public_key: vec![1; 32],
            start_time: 1_700_000_000,
            identity_type: "Test".to_string(),
        };
        let echoed = contract.clone();
        assert_eq!(contract.encode_to_vec(), echoed.encode_to_vec());

        let mut mutated = contract.clone();
        mutated.identity_type = "Other".to_string();
        assert_ne!(contract.encode_to_vec(), mutated.encode_to_vec());
    }

    #[test]
    fn request_helper_sets_version() {
        let msg = ClientMessage::request(
            1,
            client_request::Request::CheckIn(CheckInRequest {
                challenge: vec![0; 32],
            }),
        );
        match msg.kind {
            Some(client_message::Kind::Request(req)) => {
                assert_eq!(req.version, geosim_types::PROTOCOL_VERSION.to_vec());
                assert!(req.signature.is_empty());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }
}
