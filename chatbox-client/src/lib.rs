pub mod file_storage;
pub mod proxy;
pub mod transport;

pub use file_storage::FileStorage;
pub use proxy::{DEFAULT_RETRY, ResilientHttpClient};
pub use transport::{
    HttpRequest, HttpResponse, Method, ReqwestTransport, RetryPolicy, Transport, TransportError,
};
