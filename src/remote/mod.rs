pub mod api;
pub mod http;
pub mod offline;

pub use http::ApiClient;
pub use offline::{is_offline_error, is_offline_message};

/// Query-string parameters, appended and percent-encoded by the transport.
pub type Query<'a> = &'a [(&'a str, &'a str)];

/// Blocking request/response access to the relay.
///
/// Implementations attach the client version header and fail on any
/// non-success status with an error whose text includes
/// `status_code=<code>`, so [`is_offline_error`] can recognise gateway
/// failures.
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns an error on a transport failure or a non-success status.
    fn get(&self, path: &str, query: Query<'_>) -> anyhow::Result<Vec<u8>>;

    /// # Errors
    ///
    /// Returns an error on a transport failure or a non-success status.
    fn post(
        &self,
        path: &str,
        query: Query<'_>,
        content_type: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, path: &str, query: Query<'_>) -> anyhow::Result<Vec<u8>> {
        (**self).get(path, query)
    }

    fn post(
        &self,
        path: &str,
        query: Query<'_>,
        content_type: &str,
        body: Vec<u8>,
    ) -> anyhow::Result<Vec<u8>> {
        (**self).post(path, query, content_type, body)
    }
}
