use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::ballot::{BallotProtocol, VoteSubmission};
use crate::error::Result;
use crate::keys::KeyCustody;
use crate::model::{
    auth::{AuthToken, Voter},
    election::ElectionId,
};

use super::KeyRequest;

pub fn routes() -> Vec<Route> {
    routes![submit_vote, create_signature, create_voter_keys]
}

#[post("/elections/<election_id>/votes", data = "<submission>", format = "json")]
async fn submit_vote(
    token: AuthToken<Voter>,
    election_id: ElectionId,
    submission: Json<VoteSubmission>,
    protocol: &State<BallotProtocol>,
) -> Result<()> {
    protocol
        .submit_vote(election_id, token.id, &submission)
        .await
}

#[derive(Deserialize)]
struct SignatureRequest {
    data: String,
    key: String,
}

#[derive(Serialize)]
struct SignatureResponse {
    #[serde(with = "evote_crypto::serde_base64")]
    signature: Vec<u8>,
}

/// Sign `data` for a voter whose client does not hold their key.
#[post("/signature", data = "<request>", format = "json")]
async fn create_signature(
    token: AuthToken<Voter>,
    request: Json<SignatureRequest>,
    custody: &State<KeyCustody>,
) -> Result<Json<SignatureResponse>> {
    let SignatureRequest { data, key } = request.into_inner();
    let key = Zeroizing::new(key);
    let signature = custody
        .sign_for_user(token.id, key.as_bytes(), data.as_bytes())
        .await?;
    Ok(Json(SignatureResponse { signature }))
}

#[post("/voter/keys", data = "<request>", format = "json")]
async fn create_voter_keys(
    token: AuthToken<Voter>,
    request: Json<KeyRequest>,
    custody: &State<KeyCustody>,
) -> Result<()> {
    let passphrase = request.into_inner().into_passphrase();
    custody
        .provision_user_keys(token.id, passphrase.as_bytes())
        .await
}
