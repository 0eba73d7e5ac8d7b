//! Docker Engine API implementation of the container traits.

mod transport;

use super::{
    ArchiveFetch, AttachOptions, AttachStream, ChangeKind, Container, ContainerChange,
    ContainerRuntime, ContainerSpec, ImageHandle, PathStat,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use crate::util::short_id;
use cincan_shared::errors::{CincanError, CincanResult};
use hyper::{Method, StatusCode};
use hyper::header::ACCEPT_ENCODING;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use transport::{ApiRequest, DaemonClient, Streamed};

/// Default daemon socket.
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

const PATH_STAT_HEADER: &str = "X-Docker-Container-Path-Stat";

/// Talks to a local Docker daemon over its Unix socket.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    client: DaemonClient,
}

impl DockerRuntime {
    pub fn new(socket_path: impl Into<PathBuf>) -> CincanResult<Self> {
        let client = DaemonClient::new(socket_path)?;
        tracing::debug!("Docker socket {}", client.socket_path().display());
        Ok(Self { client })
    }

    /// Socket from a `unix://` `DOCKER_HOST` value, or the default socket.
    pub fn from_docker_host(docker_host: Option<&str>) -> CincanResult<Self> {
        match docker_host {
            None | Some("") => Self::new(DEFAULT_SOCKET),
            Some(host) => match host.strip_prefix("unix://") {
                Some(path) => Self::new(path),
                None => Err(CincanError::Config(format!(
                    "Unsupported DOCKER_HOST '{}', only unix:// sockets are supported",
                    host
                ))),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageInspect {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    config: Option<ImageConfig>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct ImageConfig {
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChangeEntry {
    path: String,
    kind: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WaitResponse {
    status_code: i64,
}

#[derive(Deserialize)]
struct StatHeader {
    name: String,
    size: i64,
    mode: u32,
    mtime: String,
}

impl ContainerRuntime for DockerRuntime {
    fn image(&self, name: &str) -> CincanResult<ImageHandle> {
        let path = format!("/images/{}/json", urlencoding::encode(name));
        let response = self.client.send(ApiRequest::new(Method::GET, path))?;
        if response.status == StatusCode::NOT_FOUND {
            return Err(CincanError::NotFound(format!(
                "image '{}' is not available locally, pull it first",
                name
            )));
        }
        if !response.is_success() {
            return Err(CincanError::Container(response.error_message()));
        }
        let inspect: ImageInspect = serde_json::from_slice(&response.body)?;
        let config = inspect.config.unwrap_or_default();
        Ok(ImageHandle {
            name: name.to_string(),
            id: inspect.id,
            working_dir: config
                .working_dir
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            entrypoint: config.entrypoint.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            tags: inspect.repo_tags.unwrap_or_default(),
        })
    }

    fn create(&self, spec: &ContainerSpec) -> CincanResult<Box<dyn Container>> {
        let mut body = json!({
            "Image": spec.image,
            "Tty": spec.tty,
            "OpenStdin": spec.open_stdin,
            "StdinOnce": spec.open_stdin,
            "AttachStdin": spec.open_stdin,
            "AttachStdout": true,
            "AttachStderr": true,
            "HostConfig": {
                "NetworkMode": spec.network_mode,
                "CapAdd": spec.cap_add,
                "CapDrop": spec.cap_drop,
                "Runtime": spec.runtime,
            },
        });
        if !spec.cmd.is_empty() {
            body["Cmd"] = json!(spec.cmd);
        }
        if let Some(entrypoint) = &spec.entrypoint {
            body["Entrypoint"] = json!(entrypoint);
        }
        if let Some(user) = &spec.user {
            body["User"] = json!(user);
        }
        let payload = serde_json::to_vec(&body)?;

        let response = self
            .client
            .send(ApiRequest::new(Method::POST, "/containers/create").json(payload))?;
        if !response.is_success() {
            return Err(CincanError::Container(response.error_message()));
        }
        let created: CreateResponse = serde_json::from_slice(&response.body)?;
        for warning in created.warnings.unwrap_or_default() {
            tracing::warn!("{}", warning);
        }
        tracing::debug!(id = %created.id, "container created");

        Ok(Box::new(DockerContainer {
            client: self.client.clone(),
            id: created.id,
        }))
    }
}

/// A container created through [`DockerRuntime`].
pub struct DockerContainer {
    client: DaemonClient,
    id: String,
}

impl DockerContainer {
    fn expect_success(&self, request: ApiRequest, what: &str) -> CincanResult<()> {
        let response = self.client.send(request)?;
        // 304: already started/stopped
        if response.is_success() || response.status == StatusCode::NOT_MODIFIED {
            return Ok(());
        }
        Err(CincanError::Container(format!(
            "{} {}: {}",
            what,
            short_id(&self.id),
            response.error_message()
        )))
    }
}

fn parse_stat_header(value: &str) -> CincanResult<PathStat> {
    let decoded = BASE64
        .decode(value.trim())
        .map_err(|e| CincanError::Container(format!("Bad path stat header: {}", e)))?;
    let header: StatHeader = serde_json::from_slice(&decoded)?;
    let mtime = chrono::DateTime::parse_from_rfc3339(&header.mtime)
        .map(|t| t.timestamp())
        .map_err(|e| CincanError::Container(format!("Bad mtime '{}': {}", header.mtime, e)))?;
    Ok(PathStat {
        name: header.name,
        size: header.size.max(0) as u64,
        mode: header.mode,
        mtime,
    })
}

impl Container for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn attach(&mut self, options: AttachOptions) -> CincanResult<Box<dyn AttachStream>> {
        let path = format!(
            "/containers/{}/attach?stream=1&stdin={}&stdout={}&stderr={}",
            self.id, options.stdin as u8, options.stdout as u8, options.stderr as u8
        );
        let stream = self.client.upgrade(ApiRequest::new(Method::POST, path))?;
        Ok(Box::new(stream))
    }

    fn start(&mut self) -> CincanResult<()> {
        let path = format!("/containers/{}/start", self.id);
        self.expect_success(ApiRequest::new(Method::POST, path), "start")
    }

    fn diff(&self) -> CincanResult<Vec<ContainerChange>> {
        let path = format!("/containers/{}/changes", self.id);
        let response = self.client.send(ApiRequest::new(Method::GET, path))?;
        if !response.is_success() {
            return Err(CincanError::Container(response.error_message()));
        }
        // the daemon answers `null` when nothing changed
        let entries: Option<Vec<ChangeEntry>> = serde_json::from_slice(&response.body)?;
        Ok(entries
            .unwrap_or_default()
            .into_iter()
            .map(|e| ContainerChange {
                path: e.path,
                kind: ChangeKind::from_code(e.kind),
            })
            .collect())
    }

    fn get_archive(&self, path: &str) -> CincanResult<ArchiveFetch> {
        let request_path = format!(
            "/containers/{}/archive?path={}",
            self.id,
            urlencoding::encode(path)
        );
        // identity encoding keeps the daemon from cutting the tar into tiny chunks
        let response = self.client.stream(
            ApiRequest::new(Method::GET, request_path).header(ACCEPT_ENCODING, "identity"),
        )?;
        let (headers, reader) = match response {
            Streamed::Body { headers, reader } => (headers, reader),
            Streamed::Failed(reply) if reply.status == StatusCode::NOT_FOUND => {
                return Ok(ArchiveFetch::NotFound);
            }
            Streamed::Failed(reply) => {
                return Err(CincanError::Transfer(format!(
                    "get archive {}: {}",
                    path,
                    reply.error_message()
                )));
            }
        };
        let stat = match headers
            .get(PATH_STAT_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(value) => parse_stat_header(value)?,
            None => PathStat::default(),
        };
        Ok(ArchiveFetch::Found {
            stat,
            stream: reader,
        })
    }

    fn put_archive(&self, path: &str, tar: &[u8]) -> CincanResult<()> {
        let request_path = format!(
            "/containers/{}/archive?path={}",
            self.id,
            urlencoding::encode(path)
        );
        let response = self
            .client
            .send(ApiRequest::new(Method::PUT, request_path).tar(tar.to_vec()))?;
        if !response.is_success() {
            return Err(CincanError::Transfer(format!(
                "put archive {}: {}",
                path,
                response.error_message()
            )));
        }
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> CincanResult<Option<i64>> {
        let path = format!("/containers/{}/wait", self.id);
        // the daemon sends the head right away and the body only on exit
        let Some(response) = self
            .client
            .send_timed(ApiRequest::new(Method::POST, path), timeout)?
        else {
            return Ok(None);
        };
        if !response.is_success() {
            return Err(CincanError::Container(response.error_message()));
        }
        let wait: WaitResponse = serde_json::from_slice(&response.body)?;
        Ok(Some(wait.status_code))
    }

    fn kill(&self) -> CincanResult<()> {
        let path = format!("/containers/{}/kill", self.id);
        let response = self.client.send(ApiRequest::new(Method::POST, path))?;
        // 409: container is not running
        if response.is_success() || response.status == StatusCode::CONFLICT {
            return Ok(());
        }
        Err(CincanError::Container(response.error_message()))
    }

    fn remove(&self) -> CincanResult<()> {
        let path = format!("/containers/{}?force=1", self.id);
        self.expect_success(ApiRequest::new(Method::DELETE, path), "remove")
    }
}
