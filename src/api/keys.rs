use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::keys::KeyCustody;
use crate::model::{
    auth::{AuthToken, Manager},
    election::ElectionId,
};

use super::KeyRequest;

pub fn routes() -> Vec<Route> {
    routes![create_election_keys, rotate_election_keys, delete_election_keys]
}

#[put("/elections/<election_id>/keys", data = "<request>", format = "json")]
async fn create_election_keys(
    token: AuthToken<Manager>,
    election_id: ElectionId,
    request: Json<KeyRequest>,
    custody: &State<KeyCustody>,
) -> Result<()> {
    let passphrase = request.into_inner().into_passphrase();
    custody
        .provision_election_keys(election_id, passphrase.as_bytes(), token.id)
        .await
}

#[post("/elections/<election_id>/keys", data = "<request>", format = "json")]
async fn rotate_election_keys(
    token: AuthToken<Manager>,
    election_id: ElectionId,
    request: Json<KeyRequest>,
    custody: &State<KeyCustody>,
) -> Result<()> {
    let passphrase = request.into_inner().into_passphrase();
    custody
        .rotate_election_keys(election_id, passphrase.as_bytes(), token.id)
        .await
}

#[delete("/elections/<election_id>/keys")]
async fn delete_election_keys(
    token: AuthToken<Manager>,
    election_id: ElectionId,
    custody: &State<KeyCustody>,
) -> Result<()> {
    custody.destroy_election_keys(election_id, token.id).await
}
