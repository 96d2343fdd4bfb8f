// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The remote server collaborator driven by the server send executor.

use log::info;
use thiserror::Error;

use crate::message::{Method, ServerRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

impl ServerResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The server answered, but not with 2xx. Retrying will not help.
    #[error("{method} {path} answered with status {status}")]
    Status {
        status: u16,
        method: Method,
        path: String,
    },
    /// The server could not be reached at all.
    #[error("server unreachable: {0}")]
    Unreachable(String),
}

impl ServerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServerError::Unreachable(_))
    }
}

/// Turns a non-2xx response into [`ServerError::Status`].
pub fn check_status(
    request: &ServerRequest,
    response: ServerResponse,
) -> Result<ServerResponse, ServerError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ServerError::Status {
            status: response.status,
            method: request.method,
            path: request.path.clone(),
        })
    }
}

pub trait RemoteServer: Send + 'static {
    /// (Re)establishes the connection. Called on start and after every
    /// transient failure.
    fn connect(&mut self) -> Result<(), ServerError> {
        Ok(())
    }

    /// Executes one request. A non-2xx status is returned as a response,
    /// not as an error.
    fn execute(&mut self, request: &ServerRequest) -> Result<ServerResponse, ServerError>;
}

/// Logs every request and answers 200 without contacting anything.
#[derive(Debug, Default)]
pub struct DryRunServer {
    executed: u64,
}

impl DryRunServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }
}

impl RemoteServer for DryRunServer {
    fn execute(&mut self, request: &ServerRequest) -> Result<ServerResponse, ServerError> {
        self.executed += 1;
        match &request.body {
            Some(body) => info!("dry-run: {request} {body}"),
            None => info!("dry-run: {request}"),
        }
        Ok(ServerResponse::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ServerRequest {
        ServerRequest {
            method: Method::Put,
            path: "/devices/7/traits".into(),
            body: Some(serde_json::json!({"on": true})),
        }
    }

    #[test]
    fn only_2xx_is_success() {
        for status in [200, 201, 204, 299] {
            assert!(ServerResponse { status, body: None }.is_success());
        }
        for status in [100, 199, 301, 404, 500] {
            assert!(!ServerResponse { status, body: None }.is_success());
        }
    }

    #[test]
    fn check_status_names_the_failed_request() {
        let err = check_status(
            &request(),
            ServerResponse {
                status: 404,
                body: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "PUT /devices/7/traits answered with status 404");
        assert!(!err.is_transient());
        assert!(ServerError::Unreachable("refused".into()).is_transient());
    }

    #[test]
    fn dry_run_answers_ok() {
        let mut server = DryRunServer::new();
        let response = server.execute(&request()).unwrap();
        assert!(response.is_success());
        assert_eq!(server.executed(), 1);
    }
}
