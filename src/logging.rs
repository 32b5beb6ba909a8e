use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::StatusClass,
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

/// Pattern of the fallback console logger.
const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} - {m}{n}";

/// Initialise `log4rs` from the YAML file at `path`, or log to the console at
/// `info` if there is no such file.
///
/// # Panics
/// If the file exists but is invalid, or a logger is already installed.
pub fn init(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if path.exists() {
        log4rs::init_file(path, log4rs_dynamic_filters::default_deserializers())
            .expect("Failed to initialise logging");
    } else {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
            .build();
        let config = LogConfig::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info))
            .expect("Fallback logging config is valid");
        log4rs::init_config(config).expect("Failed to initialise logging");
        warn!("{} not found, logging to console", path.display());
    }
}

/// A unique identifier for a particular request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct RequestId(pub usize);

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RequestId {
    /// Atomically get the next ID, wrapping at `usize::MAX`.
    pub fn next() -> RequestId {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        RequestId(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(req.local_cache(RequestId::next))
    }
}

/// Logs every request and response, tagged with its [`RequestId`].
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let config = rocket.config();
        info!("Accepting ballots on {}:{}", config.address, config.port);
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        // Assign an ID.
        let id = req.local_cache(RequestId::next);
        // Log the incoming request.
        info!("->req{id} {} {}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        // Get the ID set on the way in.
        let id = req.local_cache(RequestId::next);
        // Get the response status.
        let status = res.status();
        // Name the matched route, if any.
        let route = match req.route() {
            Some(route) => match route.name {
                Some(ref name) => format!("{name} ({})", route.uri),
                None => route.uri.to_string(),
            },
            None => "UNKNOWN ROUTE".to_string(),
        };
        // Log the outgoing response, louder for failures.
        match status.class() {
            StatusClass::ServerError => error!("<-rsp{id} {status} {route}"),
            StatusClass::ClientError => warn!("<-rsp{id} {status} {route}"),
            _ => info!("<-rsp{id} {status} {route}"),
        }
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested, stopping gracefully...");
    }
}
