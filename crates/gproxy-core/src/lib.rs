//! Authenticator (§4.E), Proxy Engine (§4.F), and Request Logger record
//! construction (§4.G). The request-log ring itself lives in `gproxy-storage`.

mod auth;
mod classify;
mod engine;
mod error;
mod headers;
mod logger;
mod stream_log;

pub use auth::authenticate;
pub use classify::{classify, Classified};
pub use engine::{catalog_handler, proxy_handler, ProxyEngine};
pub use error::{CandidateFailure, ProxyError};
pub use headers::{detect_scheme, prepare_outbound, CredentialScheme, Headers};
pub use logger::{build_record, parse_usage, TokenUsage};
