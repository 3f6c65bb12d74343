use std::convert::Infallible;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::warn;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use super::AppsRequest;
use super::ConfigApi;
use super::ErrorBody;
use super::IndexRequest;
use super::InfoRequest;
use super::InfoResponse;
use super::SetRequest;
use crate::metrics::metrics_route;
use crate::Error;
use crate::ErrorCode;
use crate::NetworkError;
use crate::Result;
use crate::VersionRecord;
use crate::WatchCredentials;

const MAX_BODY_BYTES: u64 = 4 * 1024 * 1024;

/// Routes of the HTTP binding plus `GET /metrics`
pub fn config_routes(api: Arc<dyn ConfigApi>) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let info = post_json("info", api.clone()).then(|req: InfoRequest, api: Arc<dyn ConfigApi>| async move {
        reply(api.info(&req.group, &req.app, req.op_num).await)
    });
    let set = post_json("set", api.clone()).then(|req: SetRequest, api: Arc<dyn ConfigApi>| async move {
        reply(
            api.set(&req.group, &req.app, &req.app_config, &req.source_config)
                .await,
        )
    });
    let rollback = post_json("rollback", api.clone()).then(|req: IndexRequest, api: Arc<dyn ConfigApi>| async move {
        reply(api.rollback(&req.group, &req.app, req.index).await)
    });
    let get = post_json("get", api.clone()).then(|req: IndexRequest, api: Arc<dyn ConfigApi>| async move {
        reply(api.get(&req.group, &req.app, req.index).await)
    });
    let apps = post_json("apps", api.clone()).then(|req: AppsRequest, api: Arc<dyn ConfigApi>| async move {
        reply(api.apps(&req.group).await)
    });
    let set_watch_addr =
        post_json("set_watch_addr", api.clone()).then(|req: WatchCredentials, api: Arc<dyn ConfigApi>| async move {
            reply(api.set_watch_addr(req).await)
        });
    let groups = post_empty("groups", api.clone())
        .then(|api: Arc<dyn ConfigApi>| async move { reply(api.groups().await) });
    let get_watch_addr = post_empty("get_watch_addr", api)
        .then(|api: Arc<dyn ConfigApi>| async move { reply(api.get_watch_addr().await) });

    info.or(set)
        .unify()
        .or(rollback)
        .unify()
        .or(get)
        .unify()
        .or(groups)
        .unify()
        .or(apps)
        .unify()
        .or(get_watch_addr)
        .unify()
        .or(set_watch_addr)
        .unify()
        .or(metrics_route())
        .recover(handle_rejection)
}

fn with_api(api: Arc<dyn ConfigApi>) -> impl Filter<Extract = (Arc<dyn ConfigApi>,), Error = Infallible> + Clone {
    warp::any().map(move || api.clone())
}

fn post_json<T>(
    method: &'static str,
    api: Arc<dyn ConfigApi>,
) -> impl Filter<Extract = (T, Arc<dyn ConfigApi>), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::path("config")
        .and(warp::path(method))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_api(api))
}

fn post_empty(
    method: &'static str,
    api: Arc<dyn ConfigApi>,
) -> impl Filter<Extract = (Arc<dyn ConfigApi>,), Error = Rejection> + Clone {
    warp::path("config")
        .and(warp::path(method))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_api(api))
}

fn reply<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(e) => {
            let code = e.code();
            let body = ErrorBody {
                code: code as u32,
                msg: e.to_string(),
                field: e.field().map(str::to_string),
            };
            warp::reply::with_status(warp::reply::json(&body), status_of(code)).into_response()
        }
    }
}

fn error_reply(
    status: StatusCode,
    code: u32,
    msg: String,
) -> Response {
    let body = ErrorBody {
        code,
        msg,
        field: None,
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

pub(crate) fn status_of(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotExist => StatusCode::NOT_FOUND,
        ErrorCode::BadRequest | ErrorCode::ConfigFormat => StatusCode::BAD_REQUEST,
        ErrorCode::Deadline => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::System | ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let (status, msg) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "no such route".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("malformed body: {e}"))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large".to_string())
    } else {
        debug!("unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, format!("{err:?}"))
    };
    Ok(error_reply(status, ErrorCode::BadRequest as u32, msg))
}

/// [`ConfigApi`] over the HTTP binding.
///
/// Requests go to the endpoint that answered last. A transport failure moves
/// on to the next endpoint; remote errors are returned as they are.
#[derive(Debug)]
pub struct HttpConfigClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    request_timeout: Duration,
    preferred: AtomicUsize,
}

impl HttpConfigClient {
    pub fn new(
        endpoints: Vec<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(NetworkError::EmptyEndpointList { client: "http" }.into());
        }
        let endpoints = endpoints
            .into_iter()
            .map(|e| {
                let e = e.trim().trim_end_matches('/').to_string();
                if e.starts_with("http://") || e.starts_with("https://") {
                    Ok(e)
                } else {
                    Err(Error::from(NetworkError::InvalidURI(e)))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            endpoints,
            request_timeout,
            preferred: AtomicUsize::new(0),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn call<B, R>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let start = self.preferred.load(Ordering::Relaxed);
        let mut last_error = None;

        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            let url = format!("{}/config/{}", self.endpoints[idx], method);

            let response = match self.http.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => return Err(Error::DeadlineExceeded(self.request_timeout)),
                Err(e) => {
                    warn!(%url, "endpoint unreachable: {}", e);
                    last_error = Some(e);
                    continue;
                }
            };
            self.preferred.store(idx, Ordering::Relaxed);

            let status = response.status();
            if status.is_success() {
                return response.json::<R>().await.map_err(|e| {
                    if e.is_timeout() {
                        Error::DeadlineExceeded(self.request_timeout)
                    } else {
                        e.into()
                    }
                });
            }

            let text = response.text().await?;
            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(ErrorBody { code, msg, field }) => Error::from_remote(code, msg, field),
                Err(_) => NetworkError::Remote {
                    code: status.as_u16() as u32,
                    msg: text,
                }
                .into(),
            });
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(NetworkError::EmptyEndpointList { client: "http" }.into()),
        }
    }
}

#[async_trait]
impl ConfigApi for HttpConfigClient {
    async fn info(
        &self,
        group: &str,
        app: &str,
        op_num: u64,
    ) -> Result<InfoResponse> {
        let req = InfoRequest {
            group: group.to_string(),
            app: app.to_string(),
            op_num,
        };
        self.call("info", &req).await
    }

    async fn set(
        &self,
        group: &str,
        app: &str,
        app_config: &str,
        source_config: &str,
    ) -> Result<()> {
        let req = SetRequest {
            group: group.to_string(),
            app: app.to_string(),
            app_config: app_config.to_string(),
            source_config: source_config.to_string(),
        };
        self.call("set", &req).await
    }

    async fn rollback(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<()> {
        let req = IndexRequest {
            group: group.to_string(),
            app: app.to_string(),
            index,
        };
        self.call("rollback", &req).await
    }

    async fn get(
        &self,
        group: &str,
        app: &str,
        index: u64,
    ) -> Result<VersionRecord> {
        let req = IndexRequest {
            group: group.to_string(),
            app: app.to_string(),
            index,
        };
        self.call("get", &req).await
    }

    async fn groups(&self) -> Result<Vec<String>> {
        self.call("groups", &()).await
    }

    async fn apps(
        &self,
        group: &str,
    ) -> Result<Vec<String>> {
        let req = AppsRequest {
            group: group.to_string(),
        };
        self.call("apps", &req).await
    }

    async fn get_watch_addr(&self) -> Result<WatchCredentials> {
        self.call("get_watch_addr", &()).await
    }

    async fn set_watch_addr(
        &self,
        credentials: WatchCredentials,
    ) -> Result<()> {
        self.call("set_watch_addr", &credentials).await
    }
}
