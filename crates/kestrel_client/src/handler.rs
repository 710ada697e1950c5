//! The client connection state machine.
//!
//! `Disconnected` until `connect()` negotiates a transport and logs in;
//! any login failure leaves the state untouched. While disconnected,
//! every authenticated operation fails immediately with a
//! not-logged-in error and never touches the network.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kestrel_common::ids::UserId;
use kestrel_protocol::types::{Command, CommandLogin, Response, TransactionResponse};

use crate::error::ClientError;
use crate::negotiation::negotiate;
use crate::stats::StatisticsConsumer;
use crate::transfer::{download, upload, DownloadRequest, UploadRequest};
use crate::transport::{ServerAddress, Transport};

#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub user_name: String,
    pub password: String,
    pub metadata: BTreeMap<String, String>,
}

enum HandlerState {
    Disconnected,
    Connected {
        transport: Arc<Transport>,
        user_id: UserId,
    },
}

pub struct ClientHandler {
    state: HandlerState,
}

impl ClientHandler {
    pub fn new() -> Self {
        Self {
            state: HandlerState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, HandlerState::Connected { .. })
    }

    pub fn user_id(&self) -> Option<UserId> {
        match &self.state {
            HandlerState::Connected { user_id, .. } => Some(*user_id),
            HandlerState::Disconnected => None,
        }
    }

    fn transport(&self) -> Result<&Arc<Transport>, ClientError> {
        match &self.state {
            HandlerState::Connected { transport, .. } => Ok(transport),
            HandlerState::Disconnected => Err(ClientError::NotLoggedIn),
        }
    }

    /// Negotiate a protocol and log in. On success the handler is
    /// `Connected`; on any failure the state is left untouched.
    pub async fn connect(
        &mut self,
        parameters: &ConnectionParameters,
        timeout: Duration,
    ) -> Result<UserId, ClientError> {
        let address = ServerAddress::new(parameters.host.clone(), parameters.port);
        let transport = negotiate(&address, timeout).await?;

        let login = Command::Login(CommandLogin {
            user_name: parameters.user_name.clone(),
            password: parameters.password.clone(),
            metadata: parameters.metadata.clone(),
        });
        let response = transport.send_and_wait(login, timeout).await?;
        match response {
            Response::Login(r) => {
                self.state = HandlerState::Connected {
                    transport: Arc::new(transport),
                    user_id: r.user_id,
                };
                Ok(r.user_id)
            }
            Response::Error(e) => Err(ClientError::ConnectFailed {
                error_code: e.error_code,
                message: e.message,
            }),
            other => Err(ClientError::Protocol(format!(
                "unexpected login response: {other:?}"
            ))),
        }
    }

    /// Execute one command. Fails immediately when disconnected.
    pub async fn execute(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        self.transport()?.send_and_wait(command, timeout).await
    }

    /// Execute a command transaction. Fails immediately when
    /// disconnected.
    pub async fn transaction(
        &self,
        commands: &[Command],
        timeout: Duration,
    ) -> Result<TransactionResponse, ClientError> {
        self.transport()?.send_transaction(commands, timeout).await
    }

    /// Download an asset's content. Fails immediately when disconnected.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        consumer: StatisticsConsumer,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        download(self.transport()?, request, consumer, timeout).await
    }

    /// Upload a file as an asset's content. Fails immediately when
    /// disconnected.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        consumer: StatisticsConsumer,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        upload(self.transport()?, request, consumer, timeout).await
    }

    /// Return to `Disconnected`. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.state = HandlerState::Disconnected;
    }
}

impl Default for ClientHandler {
    fn default() -> Self {
        Self::new()
    }
}
