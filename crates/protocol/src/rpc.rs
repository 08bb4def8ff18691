//! Typed bodies for the inter-service HTTP RPCs.
//!
//! Every call carries an `x-request-id` correlation header; these are the
//! JSON payloads.

use crate::envelope::EventEnvelope;
use crate::types::{Color, ErrorCode};
use serde::{Deserialize, Serialize};

/// Correlation id header propagated on every RPC.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generic acknowledgement: code 0 on success, taxonomy code + message
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAck {
    pub error_code: ErrorCode,
    #[serde(default)]
    pub error: String,
}

impl RpcAck {
    pub fn ok() -> Self {
        Self {
            error_code: ErrorCode::Success,
            error: String::new(),
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error: message.into(),
        }
    }
}

/// `GMS /rpc/current_round`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CurrentRoundRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// `GMS /rpc/record_bet`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordBetRequest {
    pub round_id: String,
    pub user_id: i64,
    pub amount: i64,
}

/// `GS /rpc/place_bet`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub user_id: i64,
    pub color: Color,
    pub amount: i64,
}

/// `GS /rpc/place_bet` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetResponse {
    pub error_code: ErrorCode,
    #[serde(default)]
    pub bet_id: String,
    #[serde(default)]
    pub error: String,
}

/// `GS /rpc/get_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStateRequest {
    pub user_id: i64,
}

/// `GS /rpc/round_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResultRequest {
    pub round_id: String,
    pub winning_color: Color,
}

/// `Gateway /internal/broadcast` and `/internal/send_to_user`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutRequest {
    /// Present for unicast, absent for broadcast.
    #[serde(default)]
    pub user_id: Option<i64>,
    pub game_code: String,
    pub event: EventEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_wire_shape() {
        let ack = RpcAck::err(ErrorCode::BettingClosed, "betting closed");
        let v = serde_json::to_value(&ack).unwrap();
        assert_eq!(v["error_code"], 5);
        assert_eq!(v["error"], "betting closed");

        let ok: RpcAck = serde_json::from_str(r#"{"error_code":0}"#).unwrap();
        assert!(ok.error_code.is_success());
        assert_eq!(ok.error, "");
    }
}
