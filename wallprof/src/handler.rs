// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use hyper::{Body, Request, Response, StatusCode};

use crate::api::Format;
use crate::sampler::Profiler;

/// HTTP surface over the profiler: `GET /?seconds=N[&format=pprof|folded]`.
///
/// Each request builds a fresh [`Profiler`] through the supplied factory,
/// profiles for `seconds`, and responds with the encoded bytes. When no
/// explicit `format` is given the handler guesses: a client advertising
/// `Accept-Encoding: gzip` is assumed to want pprof (which is gzipped by
/// convention), anything else gets folded text.
pub struct ProfileHandler<F> {
    build: F,
}

impl<F> ProfileHandler<F>
where
    F: Fn() -> Profiler,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let query = req.uri().query();

        let raw_seconds = query_param(query, "seconds").unwrap_or("");
        let seconds: u64 = match raw_seconds.parse() {
            Ok(seconds) => seconds,
            Err(err) => return bad_request(format!("bad seconds: {raw_seconds}: {err}\n")),
        };

        let format = match query_param(query, "format") {
            Some("pprof") => Format::Pprof,
            Some("folded") => Format::Folded,
            Some(other) => return bad_request(format!("bad format: {other}\n")),
            None => guess_format(&req),
        };

        let stop = match (self.build)().start_with_format(Vec::new(), format) {
            Ok(stop) => stop,
            Err(err) => return server_error(err.to_string()),
        };
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        match stop.stop() {
            Ok(bytes) => Response::new(Body::from(bytes)),
            Err(err) => server_error(err.to_string()),
        }
    }
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then_some(value)
    })
}

fn guess_format(req: &Request<Body>) -> Format {
    let wants_gzip = req
        .headers()
        .get_all(hyper::header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("gzip"));
    if wants_gzip {
        Format::Pprof
    } else {
        Format::Folded
    }
}

fn bad_request(body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::BAD_REQUEST;
    response
}

fn server_error(body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
