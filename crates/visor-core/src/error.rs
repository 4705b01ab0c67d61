use thiserror::Error;

/// Plan-time failures (§4.1). Thrown before any step runs — a run either has
/// a valid plan from the start or it aborts with exit code 2.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan/cycle: dependency cycle detected: {0}")]
    Cycle(String),
    #[error("plan/unresolved_dependency: step `{step}` depends on unknown step `{dependency}`")]
    UnresolvedDependency { step: String, dependency: String },
    #[error("requested check `{0}` is not declared in config")]
    UnknownRequestedCheck(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("remote `extends` entries are disabled by VISOR_NO_REMOTE_EXTENDS")]
    RemoteExtendsDisabled,
    #[error("failed to fetch remote extends {url}: {source}")]
    RemoteFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("config declares neither `steps` nor `checks`")]
    NoSteps,
    #[error("effective config at {path} does not match the expected shape: {source}")]
    Shape {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("routing error: {0}")]
    Session(#[from] visor_session::SessionError),
    #[error("memory error: {0}")]
    Memory(#[from] visor_memory::MemoryError),
    #[error("foreach error: {0}")]
    ForEach(#[from] visor_routing::ForEachError),
}
