//! Profile-server flows: hosting registration, check-in, profile updates,
//! cancellation and paged profile search.

use crate::conversation::Conversation;
use crate::{ClientError, ClientResult};
use geosim_types::keys::verify_signature;
use geosim_types::{IdentityKeys, ProfileInfo};
use geosim_wire::client::{
    client_request, client_response, CancelHostingRequest, CheckInRequest, ClientMessage,
    HostingContract, ProfileQueryResult, ProfileSearchPartRequest, ProfileSearchRequest,
    RegisterHostingRequest, UpdateProfileRequest,
};
use geosim_wire::info::profile_to_wire;
use prost::Message;
use rand::RngCore;
use tracing::debug;

/// Record batch sizes for profile searches.
const MAX_RESPONSE_WITH_IMAGES: u32 = 100;
const MAX_RESPONSE_NO_IMAGES: u32 = 1000;
const MAX_TOTAL_WITH_IMAGES: u32 = 1000;
const MAX_TOTAL_NO_IMAGES: u32 = 10_000;

/// Everything a live profile search returns.
#[derive(Debug)]
pub struct ProfileSearchOutcome {
    pub results: Vec<ProfileQueryResult>,
    pub covered_servers: Vec<Vec<u8>>,
}

/// Register hosting for an identity and push its initial profile.
///
/// Runs the full two-connection flow: hosting registration on the
/// non-customer port (contract echo and signature checks), then check-in
/// and `UpdateProfile` on the customer port.
///
/// # Arguments
/// * `non_customer_port` / `customer_port` - The host server's client ports
/// * `keys` - The identity's keypair
/// * `profile` - Initial profile, including any images
/// * `contract_start_time` - Contract start, unix seconds
pub async fn register_identity<R: RngCore>(
    non_customer_port: u16,
    customer_port: u16,
    keys: &IdentityKeys,
    profile: &ProfileInfo,
    contract_start_time: i64,
    rng: &mut R,
) -> ClientResult<()> {
    // Hosting registration on the non-customer port.
    let mut conversation = Conversation::connect(non_customer_port).await?;
    conversation.start(rng).await?;

    let contract = HostingContract {
        plan_id: Vec::new(),
        identity_public_key: keys.public_key().to_vec(),
        start_time: contract_start_time,
        identity_type: profile.identity_type.clone(),
    };
    let id = conversation.allocate_id();
    let response = conversation
        .roundtrip(ClientMessage::request(
            id,
            client_request::Request::RegisterHosting(RegisterHostingRequest {
                contract: Some(contract.clone()),
            }),
        ))
        .await?;

    let server_key = conversation.session().server_public_key.clone();
    let signature = response.signature.clone();
    let Some(client_response::Response::RegisterHosting(register)) = response.response else {
        return Err(ClientError::UnexpectedResponse("RegisterHosting"));
    };
    let echoed = register.contract.ok_or(ClientError::ContractMismatch)?;
    // The server must not have silently mutated the agreement.
    if echoed.encode_to_vec() != contract.encode_to_vec() {
        return Err(ClientError::ContractMismatch);
    }
    if !verify_signature(&server_key, &contract.encode_to_vec(), &signature) {
        return Err(ClientError::Signature("hosting contract"));
    }
    debug!(identity = %profile.name, "hosting registered");

    // Check-in and profile upload on the customer port.
    let mut customer = Conversation::connect(customer_port).await?;
    customer.start(rng).await?;
    check_in(&mut customer, keys).await?;

    let id = customer.allocate_id();
    customer
        .roundtrip(ClientMessage::request(
            id,
            client_request::Request::UpdateProfile(UpdateProfileRequest {
                profile: Some(profile_to_wire(profile, &keys.public_key())),
                profile_image: profile.profile_image.clone().unwrap_or_default(),
                thumbnail_image: profile.thumbnail_image.clone().unwrap_or_default(),
            }),
        ))
        .await?;
    debug!(identity = %profile.name, "profile updated");

    Ok(())
}

/// Cancel an identity's hosting agreement via the customer port.
pub async fn cancel_hosting<R: RngCore>(
    customer_port: u16,
    keys: &IdentityKeys,
    rng: &mut R,
) -> ClientResult<()> {
    let mut customer = Conversation::connect(customer_port).await?;
    customer.start(rng).await?;
    check_in(&mut customer, keys).await?;
    let id = customer.allocate_id();
    customer
        .roundtrip(ClientMessage::request(
            id,
            client_request::Request::CancelHosting(CancelHostingRequest {}),
        ))
        .await?;
    Ok(())
}

/// Customer-port check-in: sign the server's conversation challenge.
async fn check_in(conversation: &mut Conversation, keys: &IdentityKeys) -> ClientResult<()> {
    let challenge = conversation.session().server_challenge.clone();
    let signature = keys.sign(&challenge).to_vec();
    let id = conversation.allocate_id();
    conversation
        .roundtrip(ClientMessage::signed_request(
            id,
            signature,
            client_request::Request::CheckIn(CheckInRequest { challenge }),
        ))
        .await?;
    Ok(())
}

/// Run a live profile search, following part requests until the declared
/// total is delivered.
pub async fn profile_search<R: RngCore>(
    port: u16,
    mut request: ProfileSearchRequest,
    rng: &mut R,
) -> ClientResult<ProfileSearchOutcome> {
    let (max_response, max_total) = if request.include_images {
        (MAX_RESPONSE_WITH_IMAGES, MAX_TOTAL_WITH_IMAGES)
    } else {
        (MAX_RESPONSE_NO_IMAGES, MAX_TOTAL_NO_IMAGES)
    };
    request.max_response_record_count = max_response;
    request.max_total_record_count = max_total;

    let mut conversation = Conversation::connect(port).await?;
    conversation.start(rng).await?;

    let id = conversation.allocate_id();
    let response = conversation
        .roundtrip(ClientMessage::request(
            id,
            client_request::Request::ProfileSearch(request),
        ))
        .await?;
    let Some(client_response::Response::ProfileSearch(search)) = response.response else {
        return Err(ClientError::UnexpectedResponse("ProfileSearch"));
    };

    let total = search.total_record_count;
    let covered_servers = search.covered_servers;
    let mut results = search.profiles;

    // The server reports more matches than it returned inline; fetch the
    // remaining ranges.
    while (results.len() as u32) < total {
        let remaining = total - results.len() as u32;
        let id = conversation.allocate_id();
        let response = conversation
            .roundtrip(ClientMessage::request(
                id,
                client_request::Request::ProfileSearchPart(ProfileSearchPartRequest {
                    record_index: results.len() as u32,
                    record_count: remaining.min(max_response),
                }),
            ))
            .await?;
        let Some(client_response::Response::ProfileSearchPart(part)) = response.response else {
            return Err(ClientError::UnexpectedResponse("ProfileSearchPart"));
        };
        if part.profiles.is_empty() {
            return Err(ClientError::IncompleteSearch {
                declared: total,
                got: results.len(),
            });
        }
        results.extend(part.profiles);
    }

    Ok(ProfileSearchOutcome {
        results,
        covered_servers,
    })
}
