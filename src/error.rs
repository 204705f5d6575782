use std::path::PathBuf;

use thiserror::Error;

/// Failure to load the settings file. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("chat id {chat_id} is mapped to both '{first}' and '{second}'")]
    DuplicateChatId {
        chat_id: String,
        first: String,
        second: String,
    },
}

/// Failure to download a media file into the vault.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("remote returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("no free file name left for {}", path.display())]
    NameExhausted { path: PathBuf },
}

impl FetchError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error from the chat API, split so the web layer can map it to a status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("chat API returned {0}")]
    Status(reqwest::StatusCode),
}
