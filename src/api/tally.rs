use rocket::{serde::json::Json, Route, State};

use crate::ballot::{BallotProtocol, Counts, TallyReport};
use crate::error::Result;
use crate::model::{
    auth::{AuthToken, Manager},
    election::ElectionId,
    voter::Participation,
};

use super::KeyRequest;

pub fn routes() -> Vec<Route> {
    routes![count_votes, results, status]
}

#[post("/elections/<election_id>/count", data = "<request>", format = "json")]
async fn count_votes(
    token: AuthToken<Manager>,
    election_id: ElectionId,
    request: Json<KeyRequest>,
    protocol: &State<BallotProtocol>,
) -> Result<Json<TallyReport>> {
    let tally_key = request.into_inner().into_passphrase();
    let report = protocol
        .count_votes(election_id, tally_key.as_bytes(), token.id)
        .await?;
    Ok(Json(report))
}

#[get("/elections/<election_id>/results")]
async fn results(
    _token: AuthToken<Manager>,
    election_id: ElectionId,
    protocol: &State<BallotProtocol>,
) -> Result<Json<Counts>> {
    Ok(Json(protocol.results(election_id).await?))
}

#[get("/elections/<election_id>/status")]
async fn status(
    _token: AuthToken<Manager>,
    election_id: ElectionId,
    protocol: &State<BallotProtocol>,
) -> Result<Json<Participation>> {
    Ok(Json(protocol.status(election_id).await?))
}
