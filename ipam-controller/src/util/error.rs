#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("cloud adapter error: {0}")]
    Cloud(#[from] crate::cloud::CloudError),

    #[error("invalid CIDR {cidr:?}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("node {0} has no providerID set")]
    MissingProviderId(String),

    #[error("bad controller configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether this error should be retried by the work queue's rate
    /// limiter, as opposed to being surfaced only via a status condition.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::Configuration(_))
    }
}
