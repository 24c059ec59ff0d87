//! Conversions between `http` types and the envelope types.

use axum::body::Body;
use axum::response::Response;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use run_core::{Headers, ResponseEnvelope};

/// Status from a guest response; anything `http` rejects becomes 500.
pub fn status_from_u16(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Group header values by name. Values that are not valid UTF-8 are
/// converted lossily.
pub fn headers_from_http(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// Flatten envelope headers, skipping names or values `http` rejects.
pub fn headers_to_http(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

/// The URL a guest sees: the path after `/{mode}/{id}` plus the query.
pub fn inner_url(rest: Option<&str>, uri: &Uri) -> String {
    let path = rest.map(|p| p.trim_matches('/')).unwrap_or_default();
    let mut url = format!("/{path}");
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }
    url
}

pub fn into_http_response(envelope: ResponseEnvelope) -> Response {
    let mut response = Response::new(Body::from(envelope.body));
    *response.status_mut() = status_from_u16(envelope.status);
    *response.headers_mut() = headers_to_http(&envelope.headers);
    response
}
