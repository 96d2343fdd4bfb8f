// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use serde::{Deserialize, Serialize};

use crate::message::Method;

/// Routing envelope carried in the payload of an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    #[serde(rename = "publish-trait")]
    PublishTrait {
        topic: String,
        payload: String,
        #[serde(default)]
        retain: bool,
    },

    #[serde(rename = "server-request")]
    ServerRequest {
        method: Method,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
}
