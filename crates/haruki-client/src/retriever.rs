//! Pulls suite and mysekai data through a logged-in [`InheritClient`],
//! replaying the calls the game itself makes around them.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value as Json;
use tracing::{info, warn};

use haruki_shared::{Server, UploadDataType, Value};

use crate::error::{ClientError, Result};
use crate::inherit::{general_body, InheritClient};

const STEP_DELAY: Duration = Duration::from_secs(1);

const REFRESHABLE_TYPES: [&str; 3] = [
    "new_pending_friend_request",
    "user_report_thanks_message",
    "streaming_virtual_live_reward_status",
];

/// Encrypted payloads exactly as the game returned them.
#[derive(Debug, Clone)]
pub struct RetrievedData {
    pub server: Server,
    pub user_id: i64,
    pub suite: Option<Vec<u8>>,
    pub mysekai: Option<Vec<u8>>,
}

pub struct DataRetriever {
    client: InheritClient,
    upload_type: UploadDataType,
}

impl DataRetriever {
    pub fn new(client: InheritClient, upload_type: UploadDataType) -> Self {
        Self {
            client,
            upload_type,
        }
    }

    /// Logs in, fetches suite and, for mysekai requests, mysekai data.
    ///
    /// Only a failed handshake is an error. A failed retrieval leaves the
    /// corresponding payload empty; mysekai maintenance is not an error.
    pub async fn run(mut self) -> Result<RetrievedData> {
        self.client.init().await?;

        let suite = match self.retrieve_suite().await {
            Ok(suite) => Some(suite),
            Err(e) => {
                warn!(server = %self.client.server(), error = %e, "suite retrieval failed");
                None
            }
        };
        self.refresh_home(false, false).await;

        let mysekai = if self.upload_type.is_mysekai_family() {
            match self.retrieve_mysekai().await {
                Ok(data) => Some(data),
                Err(ClientError::Maintenance) => {
                    info!(server = %self.client.server(), "mysekai under maintenance");
                    None
                }
                Err(e) => {
                    warn!(server = %self.client.server(), error = %e, "mysekai retrieval failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(RetrievedData {
            server: self.client.server(),
            user_id: self.client.user_id(),
            suite,
            mysekai,
        })
    }

    pub async fn retrieve_suite(&mut self) -> Result<Vec<u8>> {
        let uid = self.client.user_id();
        let base = format!("/suite/user/{uid}");
        info!(server = %self.client.server(), "retrieving suite");

        let suite = self.client.call_api(Method::GET, &base, None, &[]).await?;
        if suite.body.is_empty() {
            return Err(ClientError::DataRetrieval(
                "failed to retrieve suite, empty API response".into(),
            ));
        }

        self.client.pause(STEP_DELAY).await;
        let follow_up = format!(
            "{base}?isForceAllReload=false&name=user_colorful_pass,user_colorful_pass_v2,user_offline_event"
        );
        self.client.call_best_effort(Method::GET, &follow_up, None).await;
        self.client.pause(STEP_DELAY).await;
        self.client.call_best_effort(Method::GET, "/system", None).await;
        self.client.pause(STEP_DELAY).await;

        let decoded = self.client.unpack(&suite.body)?;
        let friends = decoded
            .get("userFriends")
            .is_some_and(|f| !matches!(f, Json::Null));
        let login = self.client.login_bonus();
        self.refresh_home(friends, login).await;

        Ok(suite.body.to_vec())
    }

    /// Replays the home screen refresh. Every call is best-effort.
    pub async fn refresh_home(&mut self, friends: bool, login: bool) {
        let uid = self.client.user_id();
        if friends {
            let path = format!("/user/{uid}/invitation");
            self.client.call_best_effort(Method::GET, &path, None).await;
        }
        self.client.call_best_effort(Method::GET, "/system", None).await;
        self.client.call_best_effort(Method::GET, "/information", None).await;

        let path = format!("/user/{uid}/home/refresh");
        let packed = self.client.codec().pack(&refresh_body(login), self.client.server());
        match packed {
            Ok(body) => {
                self.client
                    .call_best_effort(Method::PUT, &path, Some(body))
                    .await
            }
            Err(e) => warn!(error = %e, "failed to pack home refresh body"),
        }
    }

    pub async fn retrieve_mysekai(&mut self) -> Result<Vec<u8>> {
        let uid = self.client.user_id();
        for module in ["MYSEKAI", "MYSEKAI_ROOM"] {
            let path = format!("/module-maintenance/{module}");
            let resp = self.client.call_api(Method::GET, &path, None, &[]).await?;
            let status = self.client.unpack(&resp.body)?;
            if status.get("isOngoing").and_then(Json::as_bool) == Some(true) {
                return Err(ClientError::Maintenance);
            }
        }

        info!(server = %self.client.server(), "retrieving mysekai");
        let path = format!("/user/{uid}/mysekai?isForceAllReloadOnlyMySekai=True");
        let mysekai = self
            .client
            .call_api(Method::POST, &path, Some(general_body()?), &[])
            .await?;

        let room_path = format!("/user/{uid}/mysekai/{uid}/room");
        let room_body = self
            .client
            .codec()
            .pack(&mysekai_room_body(), self.client.server())?;
        self.client
            .call_best_effort(Method::POST, &room_path, Some(room_body))
            .await;
        let diarkis = format!("/user/{uid}/diarkis-auth?diarkisServerType=mysekai");
        self.client.call_best_effort(Method::POST, &diarkis, None).await;

        Ok(mysekai.body.to_vec())
    }
}

/// Home refresh body; a pending login bonus is claimed as the second type.
pub fn refresh_body(login: bool) -> Value {
    let mut types: Vec<Value> = REFRESHABLE_TYPES.iter().map(|t| Value::from(*t)).collect();
    if login {
        types.insert(1, Value::from("login_bonus"));
    }
    Value::ordered([("refreshableTypes", Value::Array(types))])
}

pub fn mysekai_room_body() -> Value {
    Value::ordered([(
        "roomProperty",
        Value::ordered([
            ("isRSend", Value::Int(1)),
            ("values", Value::ordered(Vec::<(String, Value)>::new())),
        ]),
    )])
}
