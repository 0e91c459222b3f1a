//! Per-host deployment.
//!
//! A [`HostDeployer`] pushes a job to one host and resolves once the host
//! reached a terminal outcome. The runner bounds every call with the
//! group's per-host timeout and cancels it by dropping the future.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use tracing::debug;

use convoy_state::StateStore;

/// Terminal outcome of deploying a job to a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Success,
    Failure(String),
    Timeout,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeployOutcome::Success)
    }
}

/// Boxed future alias for deployer results.
pub type DeployFuture<'a> = Pin<Box<dyn Future<Output = DeployOutcome> + Send + 'a>>;

/// Deploys a job to a single host.
pub trait HostDeployer: Send + Sync {
    /// Deploy `job` to `host`. Dropping the future cancels the deployment wait.
    fn deploy<'a>(&'a self, host: &'a str, job: &'a str) -> DeployFuture<'a>;
}

/// Port host agents listen on unless registered otherwise.
pub const DEFAULT_AGENT_PORT: u16 = 7070;

/// Deploys by POSTing the job to the host agent's `/deploy` endpoint.
///
/// The host address and job image are looked up in the state store; a 2xx
/// response means the agent finished starting the job.
pub struct HttpAgentDeployer {
    store: StateStore,
    request_timeout: Duration,
    /// Port used for host addresses registered without one.
    default_port: u16,
}

#[derive(serde::Serialize)]
struct DeployRequest<'a> {
    job: &'a str,
    image: &'a str,
    env: &'a std::collections::BTreeMap<String, String>,
}

impl HttpAgentDeployer {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            request_timeout: Duration::from_secs(60),
            default_port: DEFAULT_AGENT_PORT,
        }
    }

    /// Set the agent port assumed for addresses without an explicit port.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set the timeout for a single agent request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn agent_address(&self, address: &str) -> String {
        let has_port = address
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if has_port {
            address.to_string()
        } else {
            format!("{address}:{}", self.default_port)
        }
    }

    async fn deploy_to_agent(&self, host: &str, job: &str) -> DeployOutcome {
        let host_info = match self.store.get_host(host) {
            Ok(Some(h)) => h,
            Ok(None) => return DeployOutcome::Failure(format!("host {host} is not registered")),
            Err(e) => return DeployOutcome::Failure(e.to_string()),
        };
        let job_spec = match self.store.get_job(job) {
            Ok(Some(j)) => j,
            Ok(None) => return DeployOutcome::Failure(format!("job {job} is not registered")),
            Err(e) => return DeployOutcome::Failure(e.to_string()),
        };

        let body = match serde_json::to_vec(&DeployRequest {
            job,
            image: &job_spec.image,
            env: &job_spec.env,
        }) {
            Ok(b) => b,
            Err(e) => return DeployOutcome::Failure(e.to_string()),
        };

        match tokio::time::timeout(
            self.request_timeout,
            post_json(&self.agent_address(&host_info.address), "/deploy", body),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(%host, %job, "agent request timed out");
                DeployOutcome::Timeout
            }
        }
    }
}

impl HostDeployer for HttpAgentDeployer {
    fn deploy<'a>(&'a self, host: &'a str, job: &'a str) -> DeployFuture<'a> {
        Box::pin(self.deploy_to_agent(host, job))
    }
}

/// POST a JSON body to an agent over a fresh HTTP/1 connection.
async fn post_json(address: &str, path: &str, body: Vec<u8>) -> DeployOutcome {
    let uri = format!("http://{address}{path}");

    let stream = match tokio::net::TcpStream::connect(address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %uri, "agent connection failed");
            return DeployOutcome::Failure(format!("connect {address}: {e}"));
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "agent handshake failed");
            return DeployOutcome::Failure(format!("handshake {address}: {e}"));
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = match http::Request::builder()
        .method("POST")
        .uri(&uri)
        .header("host", address)
        .header("content-type", "application/json")
        .header("user-agent", "convoy-rollout/0.1")
        .body(Full::new(Bytes::from(body)))
    {
        Ok(r) => r,
        Err(e) => return DeployOutcome::Failure(e.to_string()),
    };

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => DeployOutcome::Success,
        Ok(resp) => {
            debug!(status = %resp.status(), %uri, "agent rejected deployment");
            DeployOutcome::Failure(format!("agent returned {}", resp.status()))
        }
        Err(e) => {
            debug!(error = %e, %uri, "agent request failed");
            DeployOutcome::Failure(e.to_string())
        }
    }
}
