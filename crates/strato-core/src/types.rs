//! App, deploy, and metric types.
//!
//! Apps and deploys are closed sum types; the `app_type` / `deploy_type`
//! discriminators exist solely so the storage adapters can dispatch on the
//! wire encoding.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The guest language a deploy blob targets.
///
/// `go` blobs are WASI command modules; `js` blobs are raw JavaScript
/// source executed by the embedded interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Go,
    Js,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Go => "go",
            RuntimeKind::Js => "js",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported runtime: {0}")]
pub struct UnsupportedRuntime(pub String);

impl FromStr for RuntimeKind {
    type Err = UnsupportedRuntime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go" => Ok(RuntimeKind::Go),
            "js" => Ok(RuntimeKind::Js),
            other => Err(UnsupportedRuntime(other.to_string())),
        }
    }
}

/// Discriminator for the three app kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Endpoint,
    Task,
    Process,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Endpoint => "endpoint",
            AppType::Task => "task",
            AppType::Process => "process",
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown app type: {0}")]
pub struct UnknownAppType(pub String);

impl FromStr for AppType {
    type Err = UnknownAppType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "endpoint" => Ok(AppType::Endpoint),
            "task" => Ok(AppType::Task),
            "process" => Ok(AppType::Process),
            other => Err(UnknownAppType(other.to_string())),
        }
    }
}

/// An HTTP endpoint app: invoked synchronously per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub runtime: RuntimeKind,
    pub env: HashMap<String, String>,
    pub active_deploy_id: Uuid,
    /// Deploy ids, oldest first.
    pub deploy_history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, runtime: RuntimeKind, env: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: String::new(),
            runtime,
            env,
            active_deploy_id: Uuid::nil(),
            deploy_history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A periodic task app: invoked on a fixed interval once started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub runtime: RuntimeKind,
    pub env: HashMap<String, String>,
    pub active_deploy_id: Uuid,
    pub deploy_history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Tick interval in seconds, > 0.
    pub interval_secs: i64,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        runtime: RuntimeKind,
        interval_secs: i64,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            runtime,
            env,
            active_deploy_id: Uuid::nil(),
            deploy_history: Vec::new(),
            created_at: Utc::now(),
            interval_secs,
        }
    }
}

/// A long-running process app. Lifecycle management is still open; the
/// core only stores and routes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub name: String,
    pub runtime: RuntimeKind,
    pub env: HashMap<String, String>,
    pub active_deploy_id: Uuid,
    pub deploy_history: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Process {
    pub fn new(name: impl Into<String>, runtime: RuntimeKind, env: HashMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            runtime,
            env,
            active_deploy_id: Uuid::nil(),
            deploy_history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A registered unit of code: endpoint, task, or process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "app_type", rename_all = "lowercase")]
pub enum App {
    Endpoint(Endpoint),
    Task(Task),
    Process(Process),
}

impl App {
    pub fn id(&self) -> Uuid {
        match self {
            App::Endpoint(e) => e.id,
            App::Task(t) => t.id,
            App::Process(p) => p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            App::Endpoint(e) => &e.name,
            App::Task(t) => &t.name,
            App::Process(p) => &p.name,
        }
    }

    pub fn runtime(&self) -> RuntimeKind {
        match self {
            App::Endpoint(e) => e.runtime,
            App::Task(t) => t.runtime,
            App::Process(p) => p.runtime,
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        match self {
            App::Endpoint(e) => &e.env,
            App::Task(t) => &t.env,
            App::Process(p) => &p.env,
        }
    }

    pub fn active_deploy_id(&self) -> Uuid {
        match self {
            App::Endpoint(e) => e.active_deploy_id,
            App::Task(t) => t.active_deploy_id,
            App::Process(p) => p.active_deploy_id,
        }
    }

    pub fn deploy_history(&self) -> &[Uuid] {
        match self {
            App::Endpoint(e) => &e.deploy_history,
            App::Task(t) => &t.deploy_history,
            App::Process(p) => &p.deploy_history,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            App::Endpoint(e) => e.created_at,
            App::Task(t) => t.created_at,
            App::Process(p) => p.created_at,
        }
    }

    /// A nil active deploy id means the app has nothing to route to.
    pub fn has_active_deploy(&self) -> bool {
        !self.active_deploy_id().is_nil()
    }

    pub fn app_type(&self) -> AppType {
        match self {
            App::Endpoint(_) => AppType::Endpoint,
            App::Task(_) => AppType::Task,
            App::Process(_) => AppType::Process,
        }
    }
}

/// MD5 hex digest of a blob. Content fingerprint only, not a security
/// property.
pub fn fingerprint(blob: &[u8]) -> String {
    hex::encode(Md5::digest(blob))
}

/// The payload of a deploy: an immutable blob plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub id: Uuid,
    /// The app this deploy belongs to.
    pub app_id: Uuid,
    /// MD5 hex fingerprint of `blob`.
    pub hash: String,
    pub blob: Bytes,
    pub created_at: DateTime<Utc>,
}

impl DeployRecord {
    fn new(app_id: Uuid, blob: Bytes) -> Self {
        let hash = fingerprint(&blob);
        Self {
            id: Uuid::new_v4(),
            app_id,
            hash,
            blob,
            created_at: Utc::now(),
        }
    }
}

/// An immutable versioned blob belonging to an app, tagged with the app
/// kind it was uploaded for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "deploy_type", rename_all = "lowercase")]
pub enum Deploy {
    Endpoint(DeployRecord),
    Task(DeployRecord),
    Process(DeployRecord),
}

impl Deploy {
    /// Create a deploy for `app`, matching the app's kind.
    pub fn for_app(app: &App, blob: Bytes) -> Self {
        let record = DeployRecord::new(app.id(), blob);
        match app {
            App::Endpoint(_) => Deploy::Endpoint(record),
            App::Task(_) => Deploy::Task(record),
            App::Process(_) => Deploy::Process(record),
        }
    }

    pub fn record(&self) -> &DeployRecord {
        match self {
            Deploy::Endpoint(r) | Deploy::Task(r) | Deploy::Process(r) => r,
        }
    }

    pub fn id(&self) -> Uuid {
        self.record().id
    }

    pub fn app_id(&self) -> Uuid {
        self.record().app_id
    }

    pub fn hash(&self) -> &str {
        &self.record().hash
    }

    pub fn blob(&self) -> &Bytes {
        &self.record().blob
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record().created_at
    }

    pub fn deploy_type(&self) -> AppType {
        match self {
            Deploy::Endpoint(_) => AppType::Endpoint,
            Deploy::Task(_) => AppType::Task,
            Deploy::Process(_) => AppType::Process,
        }
    }
}

/// Mutation parameters for [`App`]. Every field is optional: `None` (or an
/// empty deploy list) leaves the field untouched. Environments merge
/// key-by-key rather than replace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointUpdate {
    pub env: Option<HashMap<String, String>>,
    pub active_deploy_id: Option<Uuid>,
    pub deploys: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub env: Option<HashMap<String, String>>,
    pub active_deploy_id: Option<Uuid>,
    pub deploys: Vec<Uuid>,
    pub interval_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessUpdate {
    pub env: Option<HashMap<String, String>>,
    pub active_deploy_id: Option<Uuid>,
    pub deploys: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "app_type", rename_all = "lowercase")]
pub enum AppUpdate {
    Endpoint(EndpointUpdate),
    Task(TaskUpdate),
    Process(ProcessUpdate),
}

impl AppUpdate {
    pub fn app_type(&self) -> AppType {
        match self {
            AppUpdate::Endpoint(_) => AppType::Endpoint,
            AppUpdate::Task(_) => AppType::Task,
            AppUpdate::Process(_) => AppType::Process,
        }
    }

    pub fn active_deploy_id(&self) -> Option<Uuid> {
        match self {
            AppUpdate::Endpoint(u) => u.active_deploy_id,
            AppUpdate::Task(u) => u.active_deploy_id,
            AppUpdate::Process(u) => u.active_deploy_id,
        }
    }
}

/// One endpoint invocation, as recorded after the response was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetric {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub deploy_id: Uuid,
    pub request_url: String,
    pub status_code: i32,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
}

/// One task tick execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetric {
    pub id: Uuid,
    pub task_id: Uuid,
    pub deploy_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeMetric {
    Endpoint(EndpointMetric),
    Task(TaskMetric),
}

impl RuntimeMetric {
    pub fn id(&self) -> Uuid {
        match self {
            RuntimeMetric::Endpoint(m) => m.id,
            RuntimeMetric::Task(m) => m.id,
        }
    }

    /// The app the metric belongs to.
    pub fn app_id(&self) -> Uuid {
        match self {
            RuntimeMetric::Endpoint(m) => m.endpoint_id,
            RuntimeMetric::Task(m) => m.task_id,
        }
    }

    pub fn deploy_id(&self) -> Uuid {
        match self {
            RuntimeMetric::Endpoint(m) => m.deploy_id,
            RuntimeMetric::Task(m) => m.deploy_id,
        }
    }
}
