use chrono::{Duration, Utc};
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{self, HeaderName};
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use serde::Serialize;

use crate::error::IoTHubError;
use crate::token::TokenSource;

pub(crate) const API_VERSION: &str = "2021-04-12";

/// HTTPS client shared by the service and file upload endpoints
#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HttpTransport {
    pub(crate) fn new() -> Self {
        let https = HttpsConnector::new();
        let client = Client::builder().build::<_, hyper::Body>(https);
        HttpTransport { client }
    }

    pub(crate) async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: Vec<(HeaderName, String)>,
        body: Body,
    ) -> crate::Result<(StatusCode, Bytes)> {
        let mut builder = Request::builder().method(method.clone()).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let req = builder.body(body)?;

        trace!("{} {}", method, uri);
        let res = self.client.request(req).await?;
        let status = res.status();
        let body = hyper::body::to_bytes(res.into_body()).await?;

        debug!("Response: {}", status);
        Ok((status, body))
    }

    /// Send `body` as json and fail on any non-success status
    pub(crate) async fn send_json<T>(
        &self,
        method: Method,
        uri: &str,
        authorization: String,
        mut headers: Vec<(HeaderName, String)>,
        body: Option<&T>,
    ) -> crate::Result<Bytes>
    where
        T: Serialize + Sync + ?Sized,
    {
        let body = match body {
            Some(body) => Body::from(serde_json::to_vec(body)?),
            None => Body::empty(),
        };
        headers.push((header::AUTHORIZATION, authorization));
        headers.push((header::CONTENT_TYPE, "application/json".to_string()));

        let (status, bytes) = self.request(method, uri, headers, body).await?;
        ensure_success(status, &bytes)?;
        Ok(bytes)
    }
}

pub(crate) fn ensure_success(status: StatusCode, body: &[u8]) -> crate::Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(IoTHubError::ServiceResponse {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}

/// Short lived token for one request
pub(crate) fn authorization<TS: TokenSource>(token_source: &TS) -> crate::Result<String> {
    let expiry = Utc::now() + Duration::hours(1);
    Ok(token_source.get(&expiry)?)
}
