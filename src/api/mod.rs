use rocket::Route;
use serde::Deserialize;
use zeroize::Zeroizing;

mod audit;
mod keys;
mod tally;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voting::routes());
    routes.extend(tally::routes());
    routes.extend(keys::routes());
    routes.extend(audit::routes());
    routes
}

/// A request carrying only a key passphrase.
#[derive(Deserialize)]
pub struct KeyRequest {
    key: String,
}

impl KeyRequest {
    fn into_passphrase(self) -> Zeroizing<String> {
        Zeroizing::new(self.key)
    }
}
