//! HTTP clients for the GMS and GS RPC surfaces.
//!
//! Each client implements the same trait the monolith wires in-process, so
//! deployment shape is decided entirely at construction time.

use async_trait::async_trait;
use protocol::rpc::{
    CurrentRoundRequest, GetStateRequest, PlaceBetRequest, PlaceBetResponse, RecordBetRequest,
    RoundResultRequest, RpcAck, REQUEST_ID_HEADER,
};
use protocol::{Color, ErrorCode, RoundSnapshot};
use serde::Deserialize;
use services::{Error, GmsApi, GsApi, Result, RoundResultReceiver};
use tracing::debug;
use uuid::Uuid;

/// Fresh correlation id for one RPC.
pub fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Deserialize)]
struct RoundRsp {
    error_code: ErrorCode,
    #[serde(default)]
    error: String,
    #[serde(default)]
    round: Option<RoundSnapshot>,
}

fn transport_err(e: reqwest::Error) -> Error {
    Error::Internal(format!("rpc transport error: {}", e))
}

fn check_ack(ack: RpcAck) -> Result<()> {
    match Error::from_code(ack.error_code, &ack.error) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

fn round_from_rsp(rsp: RoundRsp) -> Result<RoundSnapshot> {
    if let Some(err) = Error::from_code(rsp.error_code, &rsp.error) {
        return Err(err);
    }
    rsp.round
        .ok_or_else(|| Error::Internal("round missing from rpc response".to_string()))
}

/// GMS over HTTP.
pub struct HttpGmsClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGmsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GmsApi for HttpGmsClient {
    async fn current_round(&self, user_id: Option<i64>) -> Result<RoundSnapshot> {
        let rsp: RoundRsp = self
            .http
            .post(format!("{}/rpc/current_round", self.base_url))
            .header(REQUEST_ID_HEADER, correlation_id())
            .json(&CurrentRoundRequest { user_id })
            .send()
            .await
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;
        round_from_rsp(rsp)
    }

    async fn record_bet(&self, round_id: &str, user_id: i64, amount: i64) -> Result<()> {
        let request_id = correlation_id();
        debug!(%request_id, round_id, user_id, amount, "record_bet rpc");
        let ack: RpcAck = self
            .http
            .post(format!("{}/rpc/record_bet", self.base_url))
            .header(REQUEST_ID_HEADER, request_id)
            .json(&RecordBetRequest {
                round_id: round_id.to_string(),
                user_id,
                amount,
            })
            .send()
            .await
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;
        check_ack(ack)
    }
}

/// GS over HTTP.
pub struct HttpGsClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GsApi for HttpGsClient {
    async fn place_bet(&self, user_id: i64, color: Color, amount: i64) -> Result<String> {
        let rsp: PlaceBetResponse = self
            .http
            .post(format!("{}/rpc/place_bet", self.base_url))
            .header(REQUEST_ID_HEADER, correlation_id())
            .json(&PlaceBetRequest {
                user_id,
                color,
                amount,
            })
            .send()
            .await
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;
        match Error::from_code(rsp.error_code, &rsp.error) {
            None => Ok(rsp.bet_id),
            Some(err) => Err(err),
        }
    }

    async fn get_state(&self, user_id: i64) -> Result<RoundSnapshot> {
        let rsp: RoundRsp = self
            .http
            .post(format!("{}/rpc/get_state", self.base_url))
            .header(REQUEST_ID_HEADER, correlation_id())
            .json(&GetStateRequest { user_id })
            .send()
            .await
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;
        round_from_rsp(rsp)
    }
}

#[async_trait]
impl RoundResultReceiver for HttpGsClient {
    async fn round_result(&self, round_id: &str, winning_color: Color) -> Result<()> {
        let ack: RpcAck = self
            .http
            .post(format!("{}/rpc/round_result", self.base_url))
            .header(REQUEST_ID_HEADER, correlation_id())
            .json(&RoundResultRequest {
                round_id: round_id.to_string(),
                winning_color,
            })
            .send()
            .await
            .map_err(transport_err)?
            .json()
            .await
            .map_err(transport_err)?;
        check_ack(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_to_error_mapping() {
        assert!(check_ack(RpcAck::ok()).is_ok());
        let err = check_ack(RpcAck::err(ErrorCode::BettingClosed, "closed")).unwrap_err();
        assert!(matches!(err, Error::BettingClosed));
    }

    #[test]
    fn test_round_rsp_requires_round_on_success() {
        let rsp = RoundRsp {
            error_code: ErrorCode::Success,
            error: String::new(),
            round: None,
        };
        assert!(round_from_rsp(rsp).is_err());
    }
}
