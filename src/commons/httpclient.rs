//! Some helper functions for HTTP calls
use std::{fmt, path::Path, time::Duration};

use log::trace;
use reqwest::{
    blocking::{Client, ClientBuilder, Response},
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT},
    StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    commons::util::file,
    constants::{HTTP_CLIENT_TIMEOUT_SECS, KMSUTIL_APP, KMSUTIL_VERSION},
};

const JSON_CONTENT: &str = "application/json";

//------------ ClientSettings ------------------------------------------------

/// The TLS related settings for building a client.
#[derive(Clone, Debug, Default)]
pub struct ClientSettings<'a> {
    pub root_certs: Vec<&'a Path>,
    pub accept_invalid_certs: bool,
}

/// Builds a blocking client using the given TLS settings.
pub fn client(uri: &str, settings: &ClientSettings) -> Result<Client, Error> {
    let mut builder = ClientBuilder::new().timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS));

    for path in &settings.root_certs {
        builder = builder.add_root_certificate(load_root_cert(path)?);
    }

    if settings.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| Error::request_build(uri, e))
}

fn load_root_cert(path: &Path) -> Result<reqwest::Certificate, Error> {
    let path_str = path.to_string_lossy();
    let pem = file::read(path).map_err(|e| Error::request_build_https_cert(&path_str, e))?;
    reqwest::Certificate::from_pem(&pem).map_err(|e| Error::request_build_https_cert(&path_str, e))
}

/// Creates the default headers, plus one extra header if given.
///
/// The extra header is used for the authentication token.
pub fn headers(uri: &str, extra: Option<(&'static str, &str)>) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();

    let ua_string = format!("{}/{}", KMSUTIL_APP, KMSUTIL_VERSION);
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&ua_string).map_err(|e| Error::request_build(uri, e))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT));

    if let Some((name, value)) = extra {
        let mut value = HeaderValue::from_str(value).map_err(|e| Error::request_build(uri, e))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

/// Performs a GET request that expects an optional json response. A 404 or
/// an empty body results in `None`.
pub fn get_opt_json<T: DeserializeOwned>(client: &Client, uri: &str, headers: HeaderMap) -> Result<Option<T>, Error> {
    trace!("GET {}", uri);
    let res = client
        .get(uri)
        .headers(headers)
        .send()
        .map_err(|e| Error::execute(uri, e))?;

    if res.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    process_opt_json_response(uri, res)
}

/// Performs a POST of data that can be serialized into json, and expects
/// an optional json response that can be deserialized into the an owned
/// value of the expected type.
pub fn post_json_with_opt_response<T: DeserializeOwned>(
    client: &Client,
    uri: &str,
    headers: HeaderMap,
    data: impl Serialize,
) -> Result<Option<T>, Error> {
    let body = serde_json::to_string(&data).map_err(|e| Error::request_build_json(uri, e))?;

    trace!("POST {}", uri);
    let res = client
        .post(uri)
        .headers(headers)
        .body(body)
        .send()
        .map_err(|e| Error::execute(uri, e))?;

    process_opt_json_response(uri, res)
}

fn process_opt_json_response<T: DeserializeOwned>(uri: &str, res: Response) -> Result<Option<T>, Error> {
    match opt_text_response(uri, res)? {
        None => Ok(None),
        Some(s) => {
            let res: T = serde_json::from_str(&s)
                .map_err(|e| Error::response(uri, format!("could not parse JSON response: {}", e)))?;
            Ok(Some(res))
        }
    }
}

fn opt_text_response(uri: &str, res: Response) -> Result<Option<String>, Error> {
    let status = res.status();
    if status.is_success() {
        match res.text().ok() {
            Some(s) if !s.is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    } else if status == StatusCode::FORBIDDEN {
        Err(Error::forbidden(uri))
    } else {
        Err(Error::from_res(uri, res))
    }
}

//------------ ErrorResponse -------------------------------------------------

/// The error body returned by the KMS.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.errors.join(", "))
    }
}

//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type RootCertPath = String;
type ErrorMessage = String;

#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),
    RequestBuildHttpsCert(RootCertPath, ErrorMessage),

    RequestExecute(ErrorUri, ErrorMessage),

    Response(ErrorUri, ErrorMessage),
    Forbidden(ErrorUri),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
    ErrorResponseWithJson(ErrorUri, StatusCode, ErrorResponse),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => write!(f, "Issue creating request for URI: {}, error: {}", uri, msg),
            Error::RequestBuildHttpsCert(path, msg) => {
                write!(f, "Cannot use configured HTTPS root cert '{}'. Error: {}", path, msg)
            }

            Error::RequestExecute(uri, msg) => write!(f, "Issue accessing URI: {}, error: {}", uri, msg),

            Error::Response(uri, msg) => write!(f, "Issue processing response from URI: {}, error: {}", uri, msg),
            Error::Forbidden(uri) => write!(f, "Got 'Forbidden' response for URI: {}", uri),
            Error::ErrorResponseWithBody(uri, code, e) => {
                write!(f, "Error response from URI: {}, Status: {}, Error: {}", uri, code, e)
            }
            Error::ErrorResponseWithJson(uri, code, res) => write!(
                f,
                "Error response from URI: {}, Status: {}, Errors: {}",
                uri, code, res
            ),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn request_build_json(uri: &str, e: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), format!("could not serialize type to JSON: {}", e))
    }

    pub fn request_build_https_cert(path: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuildHttpsCert(path.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    pub fn forbidden(uri: &str) -> Self {
        Error::Forbidden(uri.to_string())
    }

    pub fn unexpected_status(status: StatusCode) -> String {
        format!("unexpected status code {}", status)
    }

    pub fn response_unexpected_status(uri: &str, status: StatusCode) -> Self {
        Error::Response(uri.to_string(), Self::unexpected_status(status))
    }

    fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text() {
            Ok(body) => {
                if body.is_empty() {
                    Self::response_unexpected_status(uri, status)
                } else {
                    match serde_json::from_str::<ErrorResponse>(&body) {
                        Ok(res) if !res.errors.is_empty() => Error::ErrorResponseWithJson(uri.to_string(), status, res),
                        _ => Error::ErrorResponseWithBody(uri.to_string(), status, body),
                    }
                }
            }
            _ => Self::response_unexpected_status(uri, status),
        }
    }
}
