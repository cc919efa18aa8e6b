use std::{fmt, future::Future, sync::Arc, time::Duration};

use indexmap::IndexMap;
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::info;

use crate::{
    error::{Error, Result, TransportError},
    models::{
        AccessTokenRequest, AuthorizeRequest, Samples, SamplesRequest, Sensor, SensorsRequest,
    },
    retry::{CallError, RetryPolicy},
    transport::{HttpTransport, Transport},
};

/// Lifetime of an access token, counted from the moment it was issued.
pub const ACCESS_TOKEN_EXPIRATION: Duration = Duration::from_secs(60 * 60);
/// Extra attempts after the first failure of any API call.
pub const REQUEST_RETRIES: u32 = 3;
/// Deadline for each individual request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Credentials {
    email: String,
    password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    fn authorize_request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// SensorPush cloud client.
///
/// Cheap to clone; clones share the cached access token and the renewal lock.
#[derive(Clone)]
pub struct SensorPushClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    policy: RetryPolicy,
    token: RwLock<TokenState>,
    /// Held for the whole sign-in so concurrent renewals collapse into one.
    renewal: Mutex<()>,
}

#[derive(Debug)]
struct TokenState {
    access_token: Option<String>,
    /// The token is expired once `now >= deadline`.
    deadline: Instant,
}

impl TokenState {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

impl fmt::Debug for SensorPushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorPushClient")
            .field("credentials", &self.inner.credentials)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl SensorPushClient {
    /// Client for the public SensorPush API.
    pub fn new(credentials: Credentials) -> Self {
        Self::with_transport(credentials, HttpTransport::default())
    }

    pub fn with_transport(credentials: Credentials, transport: impl Transport + 'static) -> Self {
        Self::with_policy(credentials, transport, RetryPolicy::default())
    }

    pub fn with_policy(
        credentials: Credentials,
        transport: impl Transport + 'static,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Arc::new(transport),
                credentials,
                policy,
                token: RwLock::new(TokenState {
                    access_token: None,
                    deadline: Instant::now(),
                }),
                renewal: Mutex::new(()),
            }),
        }
    }

    /// Sign in and store a fresh access token, whether or not the current one
    /// has expired.
    pub async fn authorize(&self) -> Result<()> {
        let _renewal = self.inner.renewal.lock().await;
        self.authorize_unserialized().await
    }

    /// Sign in again if the access token has expired.
    ///
    /// Callers racing on an expired token queue on the renewal lock; only the
    /// first one signs in, the rest find a valid deadline and return.
    pub async fn renew_access(&self) -> Result<()> {
        if !self.inner.token.read().await.is_expired(Instant::now()) {
            return Ok(());
        }

        let _renewal = self.inner.renewal.lock().await;
        if self.inner.token.read().await.is_expired(Instant::now()) {
            self.authorize_unserialized().await?;
        }
        Ok(())
    }

    /// List sensors registered to the account, keyed by sensor ID.
    pub async fn list_sensors(
        &self,
        request: SensorsRequest,
    ) -> Result<IndexMap<String, Sensor>> {
        let transport = &self.inner.transport;
        let request = &request;
        self.read("sensors", request, move |token: String| async move {
            transport.sensors(&token, request).await
        })
        .await
    }

    /// Query samples, keyed by sensor ID and ordered most recent first.
    pub async fn list_samples(&self, request: SamplesRequest) -> Result<Samples> {
        let transport = &self.inner.transport;
        let request = &request;
        self.read("samples", request, move |token: String| async move {
            transport.samples(&token, request).await
        })
        .await
    }

    async fn authorize_unserialized(&self) -> Result<()> {
        let inner = &*self.inner;

        let access_token = inner
            .policy
            .run(
                "authorize",
                &inner.credentials,
                || async move {
                    let auth = inner
                        .policy
                        .timed(inner.transport.authorize(&inner.credentials.authorize_request()))
                        .await?;
                    let access = inner
                        .policy
                        .timed(inner.transport.access_token(&AccessTokenRequest {
                            authorization: auth.authorization,
                        }))
                        .await?;
                    Ok::<_, CallError>(access.accesstoken)
                },
                || self.expire(),
            )
            .await
            .map_err(|e| e.into_error(Error::authentication))?;

        let mut token = inner.token.write().await;
        token.access_token = Some(access_token);
        token.deadline = Instant::now() + ACCESS_TOKEN_EXPIRATION;
        info!(email = %inner.credentials.email(), "SensorPush access token renewed");
        Ok(())
    }

    /// Wrap a token-bearing request in the retry policy. Every attempt renews
    /// access first, so a failure that expired the token signs in again.
    async fn read<T, R, Fut>(
        &self,
        operation: &'static str,
        args: &(dyn fmt::Debug + Sync),
        request: R,
    ) -> Result<T>
    where
        R: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let policy = &self.inner.policy;
        let request = &request;

        policy
            .run(
                operation,
                args,
                || async move {
                    let token = self.access_token().await?;
                    let value = policy.timed(request(token)).await?;
                    Ok::<_, CallError>(value)
                },
                || self.expire(),
            )
            .await
            .map_err(|e| e.into_error(Error::api))
    }

    async fn access_token(&self) -> Result<String> {
        self.renew_access().await?;
        self.inner
            .token
            .read()
            .await
            .access_token
            .clone()
            .ok_or_else(|| Error::Authentication {
                message: "no access token available".to_owned(),
                source: None,
            })
    }

    /// Force the next call to sign in again.
    async fn expire(&self) {
        self.inner.token.write().await.deadline = Instant::now();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
    };

    use async_trait::async_trait;

    use super::*;
    use crate::models::{AccessTokenResponse, AuthorizeResponse, Sample};

    /// In-memory transport that counts calls and fails on demand.
    #[derive(Clone, Default)]
    pub(crate) struct FakeTransport {
        state: Arc<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        authorize_calls: AtomicUsize,
        sensors_calls: AtomicUsize,
        samples_calls: AtomicUsize,
        authorize_failures: StdMutex<VecDeque<TransportError>>,
        sensors_failures: StdMutex<VecDeque<TransportError>>,
        samples_failures: StdMutex<VecDeque<TransportError>>,
        sensors: StdMutex<IndexMap<String, Sensor>>,
        samples: StdMutex<Samples>,
        tokens_seen: StdMutex<Vec<String>>,
    }

    pub(crate) fn status(body: &str) -> TransportError {
        TransportError::Status {
            status: 400,
            body: body.to_owned(),
        }
    }

    impl FakeTransport {
        pub(crate) fn authorize_calls(&self) -> usize {
            self.state.authorize_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn sensors_calls(&self) -> usize {
            self.state.sensors_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn samples_calls(&self) -> usize {
            self.state.samples_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn fail_authorize(&self, times: usize, body: &str) {
            let mut q = self.state.authorize_failures.lock().unwrap();
            q.extend((0..times).map(|_| status(body)));
        }

        pub(crate) fn fail_sensors(&self, times: usize, body: &str) {
            let mut q = self.state.sensors_failures.lock().unwrap();
            q.extend((0..times).map(|_| status(body)));
        }

        pub(crate) fn fail_samples(&self, times: usize, body: &str) {
            let mut q = self.state.samples_failures.lock().unwrap();
            q.extend((0..times).map(|_| status(body)));
        }

        pub(crate) fn set_sensors(&self, sensors: IndexMap<String, Sensor>) {
            *self.state.sensors.lock().unwrap() = sensors;
        }

        pub(crate) fn set_samples(&self, samples: IndexMap<String, Vec<Sample>>) {
            self.state.samples.lock().unwrap().sensors = samples;
        }

        fn tokens_seen(&self) -> Vec<String> {
            self.state.tokens_seen.lock().unwrap().clone()
        }

        fn pop(queue: &StdMutex<VecDeque<TransportError>>) -> Option<TransportError> {
            queue.lock().unwrap().pop_front()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn authorize(
            &self,
            _request: &AuthorizeRequest,
        ) -> std::result::Result<AuthorizeResponse, TransportError> {
            let n = self.state.authorize_calls.fetch_add(1, Ordering::SeqCst) + 1;
            // Give concurrent callers a chance to pile up behind the renewal lock.
            tokio::task::yield_now().await;
            match Self::pop(&self.state.authorize_failures) {
                Some(e) => Err(e),
                None => Ok(AuthorizeResponse {
                    authorization: format!("code-{n}"),
                }),
            }
        }

        async fn access_token(
            &self,
            request: &AccessTokenRequest,
        ) -> std::result::Result<AccessTokenResponse, TransportError> {
            Ok(AccessTokenResponse {
                accesstoken: format!("token-for-{}", request.authorization),
            })
        }

        async fn sensors(
            &self,
            access_token: &str,
            _request: &SensorsRequest,
        ) -> std::result::Result<IndexMap<String, Sensor>, TransportError> {
            self.state.sensors_calls.fetch_add(1, Ordering::SeqCst);
            self.state.tokens_seen.lock().unwrap().push(access_token.to_owned());
            tokio::task::yield_now().await;
            match Self::pop(&self.state.sensors_failures) {
                Some(e) => Err(e),
                None => Ok(self.state.sensors.lock().unwrap().clone()),
            }
        }

        async fn samples(
            &self,
            access_token: &str,
            _request: &SamplesRequest,
        ) -> std::result::Result<Samples, TransportError> {
            self.state.samples_calls.fetch_add(1, Ordering::SeqCst);
            self.state.tokens_seen.lock().unwrap().push(access_token.to_owned());
            tokio::task::yield_now().await;
            match Self::pop(&self.state.samples_failures) {
                Some(e) => Err(e),
                None => Ok(self.state.samples.lock().unwrap().clone()),
            }
        }
    }

    /// Never answers; used to exercise the request timeout.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn authorize(
            &self,
            _request: &AuthorizeRequest,
        ) -> std::result::Result<AuthorizeResponse, TransportError> {
            std::future::pending().await
        }

        async fn access_token(
            &self,
            _request: &AccessTokenRequest,
        ) -> std::result::Result<AccessTokenResponse, TransportError> {
            std::future::pending().await
        }

        async fn sensors(
            &self,
            _access_token: &str,
            _request: &SensorsRequest,
        ) -> std::result::Result<IndexMap<String, Sensor>, TransportError> {
            std::future::pending().await
        }

        async fn samples(
            &self,
            _access_token: &str,
            _request: &SamplesRequest,
        ) -> std::result::Result<Samples, TransportError> {
            std::future::pending().await
        }
    }

    pub(crate) fn client(fake: &FakeTransport) -> SensorPushClient {
        SensorPushClient::with_transport(
            Credentials::new("me@example.com", "secret"),
            fake.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn first_read_authorizes_once() {
        let fake = FakeTransport::default();
        let client = client(&fake);

        client.list_sensors(SensorsRequest::default()).await.unwrap();
        client.list_samples(SamplesRequest::latest(1)).await.unwrap();

        assert_eq!(fake.authorize_calls(), 1);
        assert_eq!(fake.tokens_seen(), vec!["token-for-code-1", "token-for-code-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn token_cached_until_deadline() {
        let fake = FakeTransport::default();
        let client = client(&fake);

        client.authorize().await.unwrap();
        assert_eq!(fake.authorize_calls(), 1);

        tokio::time::advance(ACCESS_TOKEN_EXPIRATION - Duration::from_secs(1)).await;
        client.list_sensors(SensorsRequest::default()).await.unwrap();
        assert_eq!(fake.authorize_calls(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        client.list_sensors(SensorsRequest::default()).await.unwrap();
        client.list_sensors(SensorsRequest::default()).await.unwrap();
        assert_eq!(fake.authorize_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_share_one_renewal() {
        let fake = FakeTransport::default();
        let client = client(&fake);

        let (a, b, c, d) = tokio::join!(
            client.list_sensors(SensorsRequest::default()),
            client.list_sensors(SensorsRequest::default()),
            client.list_samples(SamplesRequest::latest(1)),
            client.list_samples(SamplesRequest::latest(1)),
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok() && d.is_ok());
        assert_eq!(fake.authorize_calls(), 1);
        assert_eq!(fake.sensors_calls(), 2);
        assert_eq!(fake.samples_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_across_tasks_share_one_renewal() {
        let fake = FakeTransport::default();
        let client = client(&fake);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.list_samples(SamplesRequest::latest(1)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fake.authorize_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_recovers_after_three_failures() {
        let fake = FakeTransport::default();
        fake.fail_sensors(3, r#"{"message":"flaky"}"#);
        let client = client(&fake);

        let sensors = client.list_sensors(SensorsRequest::default()).await;

        assert!(sensors.is_ok());
        assert_eq!(fake.sensors_calls(), 4);
        // Every failure expires the token, so each retry signs in again.
        assert_eq!(fake.authorize_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn read_fails_after_four_attempts() {
        let fake = FakeTransport::default();
        fake.fail_samples(4, r#"{"message":"service unavailable"}"#);
        let client = client(&fake);

        let err = client
            .list_samples(SamplesRequest::latest(1))
            .await
            .unwrap_err();

        assert!(!err.is_authentication());
        assert_eq!(err.message(), "service unavailable");
        assert_eq!(fake.samples_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_expires_token_for_next_call() {
        let fake = FakeTransport::default();
        let client = client(&fake);
        client.authorize().await.unwrap();

        fake.fail_sensors(4, "oops");
        assert!(client.list_sensors(SensorsRequest::default()).await.is_err());
        let calls_after_failure = fake.authorize_calls();

        client.list_sensors(SensorsRequest::default()).await.unwrap();
        assert_eq!(fake.authorize_calls(), calls_after_failure + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn authorize_failures_surface_as_authentication_error() {
        let fake = FakeTransport::default();
        fake.fail_authorize(4, r#"{"message":"invalid credentials"}"#);
        let client = client(&fake);

        let err = client.authorize().await.unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(err.message(), "invalid credentials");
        assert_eq!(fake.authorize_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn authorize_recovers_on_fourth_attempt() {
        let fake = FakeTransport::default();
        fake.fail_authorize(3, "<html>bad gateway</html>");
        let client = client(&fake);

        client.authorize().await.unwrap();
        assert_eq!(fake.authorize_calls(), 4);

        client.list_sensors(SensorsRequest::default()).await.unwrap();
        assert_eq!(fake.tokens_seen(), vec!["token-for-code-4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_does_not_multiply_authorize_retries() {
        let fake = FakeTransport::default();
        fake.fail_authorize(4, r#"{"message":"bad login"}"#);
        let client = client(&fake);

        let err = client
            .list_sensors(SensorsRequest::default())
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(err.message(), "bad login");
        assert_eq!(fake.authorize_calls(), 4);
        assert_eq!(fake.sensors_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_request_times_out_per_attempt() {
        let client = SensorPushClient::with_transport(
            Credentials::new("me@example.com", "secret"),
            HangingTransport,
        );
        let started = Instant::now();

        let err = client.authorize().await.unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(err.message(), "request timed out after 15s");
        assert_eq!(started.elapsed(), REQUEST_TIMEOUT * (REQUEST_RETRIES + 1));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let dbg = format!("{:?}", Credentials::new("me@example.com", "secret"));
        assert!(dbg.contains("me@example.com"));
        assert!(!dbg.contains("secret"));
    }
}
