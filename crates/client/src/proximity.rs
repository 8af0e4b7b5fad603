//! Proximity-server flows: identity verification, activity creation and
//! deletion, and paged activity search.

use crate::conversation::Conversation;
use crate::{ClientError, ClientResult};
use geosim_types::IdentityKeys;
use geosim_wire::client::{
    client_request, client_response, ActivityInformation, ActivityQueryResult,
    ActivitySearchPartRequest, ActivitySearchRequest, ClientMessage, CreateActivityRequest,
    DeleteActivityRequest, VerifyIdentityRequest,
};
use rand::RngCore;
use tracing::debug;

const MAX_RESPONSE_RECORDS: u32 = 1000;
const MAX_TOTAL_RECORDS: u32 = 10_000;

/// Everything a live activity search returns.
#[derive(Debug)]
pub struct ActivitySearchOutcome {
    pub results: Vec<ActivityQueryResult>,
    pub covered_servers: Vec<Vec<u8>>,
}

/// A verified-identity session on a proximity server's client port.
///
/// The orchestrator batches all activities of one `(owner, primary)` pair
/// through a single session.
pub struct ProximitySession {
    conversation: Conversation,
}

impl ProximitySession {
    /// Connect, start the conversation, and verify the owning identity.
    pub async fn open<R: RngCore>(
        port: u16,
        keys: &IdentityKeys,
        rng: &mut R,
    ) -> ClientResult<Self> {
        let mut conversation = Conversation::connect(port).await?;
        conversation.start(rng).await?;

        let challenge = conversation.session().server_challenge.clone();
        let signature = keys.sign(&challenge).to_vec();
        let id = conversation.allocate_id();
        conversation
            .roundtrip(ClientMessage::signed_request(
                id,
                signature,
                client_request::Request::VerifyIdentity(VerifyIdentityRequest { challenge }),
            ))
            .await?;
        debug!(port = port, "identity verified");

        Ok(Self { conversation })
    }

    /// Create one signed activity on the primary server.
    pub async fn create_activity(
        &mut self,
        activity: ActivityInformation,
        signature: Vec<u8>,
        ignored_servers: Vec<Vec<u8>>,
    ) -> ClientResult<()> {
        let id = self.conversation.allocate_id();
        self.conversation
            .roundtrip(ClientMessage::request(
                id,
                client_request::Request::CreateActivity(CreateActivityRequest {
                    activity: Some(activity),
                    signature,
                    ignored_servers,
                }),
            ))
            .await?;
        Ok(())
    }

    /// Delete one activity by id.
    pub async fn delete_activity(&mut self, activity_id: u32) -> ClientResult<()> {
        let id = self.conversation.allocate_id();
        self.conversation
            .roundtrip(ClientMessage::request(
                id,
                client_request::Request::DeleteActivity(DeleteActivityRequest {
                    id: activity_id,
                }),
            ))
            .await?;
        Ok(())
    }
}

/// Run a live activity search, following part requests until the declared
/// total is delivered.
pub async fn activity_search<R: RngCore>(
    port: u16,
    mut request: ActivitySearchRequest,
    rng: &mut R,
) -> ClientResult<ActivitySearchOutcome> {
    request.max_response_record_count = MAX_RESPONSE_RECORDS;
    request.max_total_record_count = MAX_TOTAL_RECORDS;

    let mut conversation = Conversation::connect(port).await?;
    conversation.start(rng).await?;

    let id = conversation.allocate_id();
    let response = conversation
        .roundtrip(ClientMessage::request(
            id,
            client_request::Request::ActivitySearch(request),
        ))
        .await?;
    let Some(client_response::Response::ActivitySearch(search)) = response.response else {
        return Err(ClientError::UnexpectedResponse("ActivitySearch"));
    };

    let total = search.total_record_count;
    let covered_servers = search.covered_servers;
    let mut results = search.activities;

    while (results.len() as u32) < total {
        let remaining = total - results.len() as u32;
        let id = conversation.allocate_id();
        let response = conversation
            .roundtrip(ClientMessage::request(
                id,
                client_request::Request::ActivitySearchPart(ActivitySearchPartRequest {
                    record_index: results.len() as u32,
                    record_count: remaining.min(MAX_RESPONSE_RECORDS),
                }),
            ))
            .await?;
        let Some(client_response::Response::ActivitySearchPart(part)) = response.response else {
            return Err(ClientError::UnexpectedResponse("ActivitySearchPart"));
        };
        if part.activities.is_empty() {
            return Err(ClientError::IncompleteSearch {
                declared: total,
                got: results.len(),
            });
        }
        results.extend(part.activities);
    }

    Ok(ActivitySearchOutcome {
        results,
        covered_servers,
    })
}
