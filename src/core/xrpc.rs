//! Minimal AT Protocol repository client
//!
//! Only the three `com.atproto.repo` calls the publisher needs.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PiperError, Result};
use crate::models::AtprotoSession;

/// A record as stored in a repository
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub uri: String,
    /// Version token used for `swapRecord`
    pub cid: String,
    pub value: Value,
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// `None` when the record does not exist
    async fn get_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        rkey: &str,
    ) -> Result<Option<StoredRecord>>;

    /// Write `record` at `rkey`; with `swap` set the write only succeeds if the
    /// stored version still matches, otherwise it fails with `SwapConflict`
    async fn put_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        rkey: &str,
        record: &Value,
        swap: Option<&str>,
    ) -> Result<String>;

    /// Append a record under a server-assigned key, returning its uri
    async fn create_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        record: &Value,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GetRecordOutput {
    uri: String,
    cid: Option<String>,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WriteOutput {
    uri: String,
    cid: String,
}

#[derive(Debug, Default, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
    record: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    swap_record: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    record: &'a Value,
}

/// XRPC over HTTP against the session's PDS
pub struct XrpcRepository {
    client: Client,
}

impl XrpcRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(session: &AtprotoSession, method: &str) -> String {
        format!("{}/xrpc/{}", session.pds_url.trim_end_matches('/'), method)
    }
}

/// Map an unsuccessful XRPC response onto the error taxonomy
async fn xrpc_error(resp: Response, target: &str) -> PiperError {
    let status = resp.status();
    let body: XrpcError = resp.json().await.unwrap_or_default();

    match (status, body.error.as_str()) {
        (_, "InvalidSwap") => PiperError::SwapConflict(target.to_string()),
        (StatusCode::UNAUTHORIZED, _) | (_, "ExpiredToken") | (_, "InvalidToken") => {
            PiperError::AuthExpired(format!("{}: {}", body.error, body.message))
        }
        (s, _) if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            PiperError::TransientNetwork(format!("{} {}: {}", s, body.error, body.message))
        }
        (s, _) => PiperError::Parse(format!("{} {}: {}", s, body.error, body.message)),
    }
}

#[async_trait]
impl RecordRepository for XrpcRepository {
    async fn get_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        rkey: &str,
    ) -> Result<Option<StoredRecord>> {
        let resp = self
            .client
            .get(Self::endpoint(session, "com.atproto.repo.getRecord"))
            .bearer_auth(&session.access_token)
            .query(&[
                ("repo", session.did.as_str()),
                ("collection", collection),
                ("rkey", rkey),
            ])
            .send()
            .await?;

        if resp.status().is_success() {
            let out: GetRecordOutput = resp.json().await?;
            return Ok(Some(StoredRecord {
                uri: out.uri,
                cid: out.cid.unwrap_or_default(),
                value: out.value,
            }));
        }

        let status = resp.status();
        let body: XrpcError = resp.json().await.unwrap_or_default();
        if body.error == "RecordNotFound" || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Err(PiperError::TransientNetwork(format!(
            "getRecord {}/{}: {} {}",
            collection, rkey, status, body.error
        )))
    }

    async fn put_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        rkey: &str,
        record: &Value,
        swap: Option<&str>,
    ) -> Result<String> {
        let input = PutRecordInput {
            repo: &session.did,
            collection,
            rkey,
            record,
            swap_record: swap.filter(|s| !s.is_empty()),
        };

        let resp = self
            .client
            .post(Self::endpoint(session, "com.atproto.repo.putRecord"))
            .bearer_auth(&session.access_token)
            .json(&input)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(xrpc_error(resp, &format!("{}/{}", collection, rkey)).await);
        }

        let out: WriteOutput = resp.json().await?;
        Ok(out.cid)
    }

    async fn create_record(
        &self,
        session: &AtprotoSession,
        collection: &str,
        record: &Value,
    ) -> Result<String> {
        let input = CreateRecordInput {
            repo: &session.did,
            collection,
            record,
        };

        let resp = self
            .client
            .post(Self::endpoint(session, "com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_token)
            .json(&input)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(xrpc_error(resp, collection).await);
        }

        let out: WriteOutput = resp.json().await?;
        tracing::debug!("Created {} ({})", out.uri, out.cid);
        Ok(out.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_input_omits_missing_swap() {
        let record = serde_json::json!({"$type": "fm.teal.alpha.actor.status"});
        let input = PutRecordInput {
            repo: "did:plc:abc",
            collection: "fm.teal.alpha.actor.status",
            rkey: "self",
            record: &record,
            swap_record: None,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert!(json.get("swapRecord").is_none());
        assert_eq!(json["rkey"], "self");

        let input = PutRecordInput {
            swap_record: Some("bafy123"),
            ..input
        };
        assert_eq!(serde_json::to_value(&input).unwrap()["swapRecord"], "bafy123");
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let session = AtprotoSession {
            did: "did:plc:abc".into(),
            pds_url: "https://pds.example/".into(),
            access_token: "t".into(),
        };
        assert_eq!(
            XrpcRepository::endpoint(&session, "com.atproto.repo.getRecord"),
            "https://pds.example/xrpc/com.atproto.repo.getRecord"
        );
    }
}
