use log::{error, info, LevelFilter};
use rocket::Error as RocketError;

async fn run() -> Result<(), RocketError> {
    info!("Configuring server...");
    let rocket = evote_backend::build().ignite().await?;
    info!("...server configured!");
    // Rocket's own launch banner is noise in our logs from here on.
    log4rs_dynamic_filters::DynamicLevelFilter::set("rocket", LevelFilter::Off);
    let _ = rocket.launch().await?;
    Ok(())
}

#[rocket::main]
async fn main() {
    evote_backend::logging::init("log4rs.yaml");
    info!("Initialised logging");

    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
