use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use http::{header, StatusCode};
use simple_server::Server;

use crate::delivery::{Payload, PressureUnit};
use crate::error::PollerError;
use crate::poller::PollerHandle;
use crate::snapshot::Snapshot;
use crate::types::Reading;

const READ_NOW_TIMEOUT: Duration = Duration::from_secs(5);

struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: String,
    /// Seconds since the served reading was taken
    age: Option<u64>,
}

impl Reply {
    fn text(status: StatusCode, body: String) -> Self {
        Self {status, content_type: "text/plain; charset=utf-8", body, age: None}
    }
}

fn reading_reply(reading: Result<Reading, String>, json: bool, unit: PressureUnit) -> Reply {
    let reading = match reading {
        Ok(reading) => reading,
        Err(e) => return Reply::text(StatusCode::SERVICE_UNAVAILABLE, format!("{}\n", e)),
    };

    let reply = if json {
        match Payload::from_reading(&reading, unit).to_json() {
            Ok(body) => Reply {
                status: StatusCode::OK,
                content_type: "application/json",
                body,
                age: None,
            },
            Err(e) => return Reply::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
    else {
        Reply::text(StatusCode::OK, reading.to_string())
    };

    Reply {age: Some(reading.taken_at.elapsed().as_secs()), ..reply}
}

fn route(path: &str, snapshot: &Snapshot, poller: &Mutex<PollerHandle>, unit: PressureUnit) -> Reply {
    let latest = || snapshot.latest().map_err(|e| e.to_string());

    match path {
        "/reading" => reading_reply(latest(), false, unit),
        "/reading.json" => reading_reply(latest(), true, unit),
        "/reading/now" => {
            let handle = poller.lock().unwrap_or_else(|e| e.into_inner()).clone();
            let reading = handle.read_now(READ_NOW_TIMEOUT).map_err(|e: PollerError| e.to_string());
            reading_reply(reading, false, unit)
        }
        other => Reply::text(StatusCode::NOT_FOUND, format!("unhandled uri: {}\n", other)),
    }
}

pub fn run_server(
    listen_address: String,
    port: u16,
    snapshot: Snapshot,
    poller: PollerHandle,
    unit: PressureUnit,
) {
    let poller = Mutex::new(poller);
    let server = Server::new(move |request, mut response| {
        let reply = route(request.uri().path(), &snapshot, &poller, unit);
        debug!("{} {} -> {}", request.method(), request.uri(), reply.status);

        response.status(reply.status);
        response.header(header::CONTENT_TYPE, reply.content_type);
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
        if let Some(age) = reply.age {
            response.header(header::AGE, age.to_string().as_str());
        }
        Ok(response.body(reply.body.into_bytes())?)
    });

    thread::spawn(move || {
        info!("Starting http server: http://{}:{}/reading", listen_address, port);
        server.listen(&listen_address, &format!("{}", port));
    });
}
