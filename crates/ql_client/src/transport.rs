//! Transport collaborator — the client's authenticated view of the relay.
//!
//! In production this is HTTPS with a bearer token; both are external to
//! the core, so the trait carries the already-authenticated caller id and
//! typed JSON bodies.  Tests wire it straight into an in-process
//! `RelayValidator`.

use async_trait::async_trait;

use ql_proto::api::{
    ConfirmRequest, ConfirmResponse, ConversationResponse, InitiateRequest, InitiateResponse,
    PendingResponse, ReportFailureRequest, RespondRequest, RespondResponse, SendMessageRequest,
    SendMessageResponse, StatusResponse,
};
use ql_proto::{ProtocolError, SessionView};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn initiate(
        &self,
        caller: &str,
        req: &InitiateRequest,
    ) -> Result<InitiateResponse, ProtocolError>;

    async fn respond(
        &self,
        caller: &str,
        req: &RespondRequest,
    ) -> Result<RespondResponse, ProtocolError>;

    async fn confirm(
        &self,
        caller: &str,
        req: &ConfirmRequest,
    ) -> Result<ConfirmResponse, ProtocolError>;

    async fn report_failure(
        &self,
        caller: &str,
        req: &ReportFailureRequest,
    ) -> Result<ConfirmResponse, ProtocolError>;

    async fn session(&self, caller: &str, session_id: &str)
        -> Result<SessionView, ProtocolError>;

    async fn status(&self, caller: &str, session_id: &str)
        -> Result<StatusResponse, ProtocolError>;

    async fn pending(&self, caller: &str) -> Result<PendingResponse, ProtocolError>;

    async fn send_message(
        &self,
        caller: &str,
        req: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ProtocolError>;

    async fn conversation(
        &self,
        caller: &str,
        peer: &str,
    ) -> Result<ConversationResponse, ProtocolError>;
}
