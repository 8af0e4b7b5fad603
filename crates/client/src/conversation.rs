//! One framed request/response conversation with a child server.

use crate::{tls, ClientError, ClientResult};
use geosim_types::keys::verify_signature;
use geosim_wire::client::{
    client_message, client_request, client_response, ClientMessage, ClientResponse, ClientStatus,
    StartConversationRequest,
};
use geosim_wire::frame::{read_message, write_message};
use geosim_wire::new_challenge;
use rand::RngCore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;

/// Handshake bookkeeping kept per identity session.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    /// Public key the server presented in the conversation start.
    pub server_public_key: Vec<u8>,
    /// Challenge we sent to the server.
    pub client_challenge: Vec<u8>,
    /// Challenge the server sent back.
    pub server_challenge: Vec<u8>,
}

/// An open TLS conversation with one server port.
pub struct Conversation {
    stream: TlsStream<TcpStream>,
    next_id: u64,
    session: SessionData,
}

impl Conversation {
    /// Connect to a child server port.
    pub async fn connect(port: u16) -> ClientResult<Self> {
        let stream = tls::connect(port).await?;
        Ok(Self {
            stream,
            next_id: 1,
            session: SessionData::default(),
        })
    }

    /// The handshake bookkeeping from `start`.
    pub fn session(&self) -> &SessionData {
        &self.session
    }

    /// Run the `StartConversation` handshake.
    ///
    /// Sends a fresh 32-byte challenge and verifies that the reply carries
    /// a fresh 32-byte server challenge plus a valid server signature over
    /// our challenge.
    pub async fn start<R: RngCore>(&mut self, rng: &mut R) -> ClientResult<()> {
        let challenge = new_challenge(rng);
        let id = self.allocate_id();
        let response = self
            .roundtrip(ClientMessage::request(
                id,
                client_request::Request::StartConversation(StartConversationRequest {
                    challenge: challenge.clone(),
                }),
            ))
            .await?;

        let signature = response.signature.clone();
        let Some(client_response::Response::StartConversation(start)) = response.response else {
            return Err(ClientError::UnexpectedResponse("StartConversation"));
        };
        if start.challenge.len() != geosim_wire::CHALLENGE_LEN {
            return Err(ClientError::Signature("server challenge length"));
        }
        if !verify_signature(&start.server_public_key, &challenge, &signature) {
            return Err(ClientError::Signature("conversation start"));
        }

        debug!(challenge = challenge.len(), "conversation started");
        self.session = SessionData {
            server_public_key: start.server_public_key,
            client_challenge: challenge,
            server_challenge: start.challenge,
        };
        Ok(())
    }

    /// Allocate the next request id.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send one request and read its response, enforcing the id echo and
    /// an OK status.
    pub async fn roundtrip(&mut self, message: ClientMessage) -> ClientResult<ClientResponse> {
        let sent_id = message.id;
        write_message(&mut self.stream, &message).await?;
        let reply: ClientMessage = read_message(&mut self.stream).await?;
        if reply.id != sent_id {
            return Err(ClientError::IdMismatch {
                sent: sent_id,
                got: reply.id,
            });
        }
        let Some(client_message::Kind::Response(response)) = reply.kind else {
            return Err(ClientError::UnexpectedResponse("response envelope"));
        };
        if response.status != ClientStatus::Ok as i32 {
            return Err(ClientError::Status {
                status: response.status,
            });
        }
        Ok(response)
    }
}
