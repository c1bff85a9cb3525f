use std::{fmt, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use waypost_model::{REGISTRY_SCHEME, ResolvedTarget, ServiceConnectionConfig};
use waypost_registry::ServiceRegistry;

use crate::{
    connection::Connection,
    error::ConnectError,
    resolver::{RegistryResolver, ResolverRegistry},
    transport::TransportConfig,
};

/// Entry point for clients: turns service names into balanced channels.
pub struct ConnectionManager {
    registry: Arc<dyn ServiceRegistry>,
    resolvers: ResolverRegistry,
    policy: ServiceConnectionConfig,
    transport: TransportConfig,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("registry", &self.registry.config().address())
            .field("schemes", &self.resolvers.schemes())
            .field("policy", &self.policy)
            .finish()
    }
}

#[derive(Default)]
pub struct ConnectionManagerBuilder {
    registry: Option<Arc<dyn ServiceRegistry>>,
    resolvers: Option<ResolverRegistry>,
    policy: ServiceConnectionConfig,
    transport: TransportConfig,
}

impl ConnectionManagerBuilder {
    pub fn registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Default policy used by [`ConnectionManager::connect`].
    pub fn policy(mut self, policy: ServiceConnectionConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the default resolver set. Must serve the `registry` scheme.
    pub fn resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    pub fn build(self) -> Result<ConnectionManager, ConnectError> {
        let registry = self
            .registry
            .ok_or_else(|| ConnectError::Construction("registry client is required".into()))?;
        self.policy.validate()?;
        self.transport
            .validate()
            .map_err(ConnectError::Construction)?;

        let resolvers = match self.resolvers {
            Some(resolvers) if !resolvers.contains(REGISTRY_SCHEME) => {
                return Err(ConnectError::SchemeNotRegistered(REGISTRY_SCHEME.into()));
            }
            Some(resolvers) => resolvers,
            None => ResolverRegistry::new().with(Arc::new(RegistryResolver::new(Arc::clone(&registry)))),
        };

        Ok(ConnectionManager {
            registry,
            resolvers,
            policy: self.policy,
            transport: self.transport,
        })
    }
}

impl ConnectionManager {
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::default()
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub fn default_policy(&self) -> &ServiceConnectionConfig {
        &self.policy
    }

    /// Open a balanced channel to `service` under `policy`.
    ///
    /// Returns as soon as the resolver watch is running; backends connect
    /// lazily. `wait_secs` is encoded into the target and bounds
    /// [`Connection::ready`].
    #[instrument(level = "debug", skip(self, policy))]
    pub async fn get_connection(
        &self,
        service: &str,
        wait_secs: u64,
        policy: &ServiceConnectionConfig,
    ) -> Result<Connection, ConnectError> {
        let target = ResolvedTarget::for_registry(self.registry.config(), service, wait_secs);
        if service.trim().is_empty() {
            return Err(ConnectError::dial(&target, "empty service name"));
        }
        self.open(target, policy)
    }

    /// [`ConnectionManager::get_connection`] with the manager's default policy.
    pub async fn connect(&self, service: &str, wait_secs: u64) -> Result<Connection, ConnectError> {
        self.get_connection(service, wait_secs, &self.policy).await
    }

    /// Open a channel to a raw target string such as `registry://127.0.0.1:8500/users?wait=5s`.
    #[instrument(level = "debug", skip(self, policy))]
    pub async fn dial(
        &self,
        target: &str,
        policy: &ServiceConnectionConfig,
    ) -> Result<Connection, ConnectError> {
        let parsed: ResolvedTarget = target
            .parse()
            .map_err(|e| ConnectError::dial(target, e))?;
        self.open(parsed, policy)
    }

    fn open(
        &self,
        target: ResolvedTarget,
        policy: &ServiceConnectionConfig,
    ) -> Result<Connection, ConnectError> {
        let service_config = policy.to_service_config()?;
        self.transport
            .validate()
            .map_err(|reason| ConnectError::dial(&target, reason))?;

        let cancel = CancellationToken::new();
        let watch = self.resolvers.resolve(&target, cancel.clone())?;
        debug!(target = %target, %service_config, "dialing");

        Ok(Connection::establish(
            target,
            watch,
            policy.clone(),
            service_config,
            &self.transport,
            cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tonic::{Code, Status};

    use waypost_model::{MethodPolicy, Registration, RegistryConfig, RetryPolicy, ServiceNode};
    use waypost_registry::MemoryRegistry;

    use super::*;
    use crate::{
        resolver::{Resolver, ResolverWatch},
        transport::TransportSecurity,
    };

    fn manager_with(registry: Arc<MemoryRegistry>) -> ConnectionManager {
        ConnectionManager::builder()
            .registry(registry)
            .policy(ServiceConnectionConfig::round_robin())
            .build()
            .unwrap()
    }

    async fn user_srv() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::default());
        registry
            .register(&Registration::new("user-1", "user-srv", "127.0.0.1", 9))
            .await
            .unwrap();
        registry
    }

    #[test]
    fn build_requires_registry() {
        let err = ConnectionManager::builder().build().unwrap_err();
        assert!(matches!(err, ConnectError::Construction(_)), "{err}");
    }

    #[test]
    fn build_rejects_invalid_default_policy() {
        let bad = ServiceConnectionConfig::round_robin().with_method_policy(
            MethodPolicy::for_service("user.Users")
                .retry(RetryPolicy::default().with_retryable_codes(["NOT_A_CODE"])),
        );
        let err = ConnectionManager::builder()
            .registry(Arc::new(MemoryRegistry::default()))
            .policy(bad)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConnectError::ConfigSerialization(_)), "{err}");
    }

    #[test]
    fn build_requires_registry_scheme() {
        struct Dns;
        impl Resolver for Dns {
            fn scheme(&self) -> &str {
                "dns"
            }
            fn watch(
                &self,
                target: &ResolvedTarget,
                _cancel: CancellationToken,
            ) -> Result<ResolverWatch, ConnectError> {
                Err(ConnectError::dial(target, "unsupported"))
            }
        }

        let err = ConnectionManager::builder()
            .registry(Arc::new(MemoryRegistry::default()))
            .resolvers(ResolverRegistry::new().with(Arc::new(Dns)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConnectError::SchemeNotRegistered(s) if s == "registry"));
    }

    #[tokio::test]
    async fn user_srv_scenario() {
        let registry = Arc::new(MemoryRegistry::default());
        registry
            .register(&Registration::new("user-1", "user-srv", "10.0.0.5", 9000))
            .await
            .unwrap();
        let manager = manager_with(registry);

        let conn = manager
            .get_connection("user-srv", 0, &ServiceConnectionConfig::round_robin())
            .await
            .unwrap();
        assert_eq!(conn.target().to_string(), "registry://127.0.0.1:8500/user-srv?wait=0s");
    }

    #[tokio::test]
    async fn get_connection_builds_target_and_policy() {
        let manager = manager_with(user_srv().await);

        let conn = manager
            .get_connection("user-srv", 0, &ServiceConnectionConfig::round_robin())
            .await
            .unwrap();
        assert_eq!(conn.target().to_string(), "registry://127.0.0.1:8500/user-srv?wait=0s");
        assert_eq!(conn.service_config(), r#"{"loadBalancingPolicy":"round_robin"}"#);

        conn.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(conn.nodes(), vec![ServiceNode::new("127.0.0.1", 9)]);
        conn.close();
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected_per_call() {
        let manager = manager_with(user_srv().await);
        let bad = ServiceConnectionConfig::new()
            .with_method_policy(MethodPolicy::fallback().method("GetUser"));

        let err = manager.get_connection("user-srv", 0, &bad).await.err().unwrap();
        assert!(matches!(err, ConnectError::ConfigSerialization(_)), "{err}");
    }

    #[tokio::test]
    async fn empty_service_name_is_a_dial_error() {
        let manager = manager_with(user_srv().await);
        let err = manager.connect("  ", 0).await.err().unwrap();
        assert!(matches!(err, ConnectError::Dial { .. }), "{err}");
    }

    #[tokio::test]
    async fn dial_parses_targets() {
        let manager = manager_with(user_srv().await);
        let policy = ServiceConnectionConfig::round_robin();

        let conn = manager
            .dial("registry://127.0.0.1:8500/user-srv?wait=2s", &policy)
            .await
            .unwrap();
        assert_eq!(conn.target().wait_secs, 2);
        conn.ready().await.unwrap();

        let malformed = manager.dial("registry://127.0.0.1/user-srv", &policy).await.err().unwrap();
        assert!(matches!(malformed, ConnectError::Dial { .. }), "{malformed}");

        let unknown = manager.dial("dns://127.0.0.1:53/user-srv?wait=0s", &policy).await.err().unwrap();
        assert!(matches!(unknown, ConnectError::SchemeNotRegistered(s) if s == "dns"));

        let foreign = manager
            .dial("registry://consul.internal:8500/user-srv?wait=0s", &policy)
            .await
            .err()
            .unwrap();
        assert!(matches!(foreign, ConnectError::Dial { .. }), "{foreign}");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_ready_times_out_without_instances() {
        let manager = manager_with(Arc::new(MemoryRegistry::default()));
        let conn = manager.connect("user-srv", 1).await.unwrap();

        let err = conn.ready().await.unwrap_err();
        match err {
            ConnectError::DiscoveryTimeout { service, waited_ms } => {
                assert_eq!(service, "user-srv");
                assert_eq!(waited_ms, 1000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn follows_registry_changes() {
        let registry = Arc::new(MemoryRegistry::default());
        let manager = manager_with(registry.clone());
        let conn = manager.connect("user-srv", 1).await.unwrap();
        assert!(conn.nodes().is_empty());

        registry
            .register(&Registration::new("user-1", "user-srv", "127.0.0.1", 9))
            .await
            .unwrap();
        conn.wait_ready(Duration::from_secs(5)).await.unwrap();

        registry.set_passing("user-1", false).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !conn.nodes().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("unhealthy instance dropped");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let manager = manager_with(user_srv().await);
        let conn = manager.connect("user-srv", 0).await.unwrap();

        conn.close();
        conn.close();
        assert!(conn.is_closed());

        let err = conn
            .invoke("user.Users", "GetUser", |_| async { Ok::<_, Status>(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);

        let err = conn.wait_ready(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ConnectError::Closed(_)), "{err}");
    }

    #[tokio::test]
    async fn tls_without_feature_is_a_dial_error() {
        if cfg!(feature = "tls") {
            return;
        }
        let registry = Arc::new(MemoryRegistry::default());
        let mut manager = manager_with(registry);
        manager.transport.security = TransportSecurity::Tls {
            domain: None,
            ca_pem: None,
        };

        let err = manager.connect("user-srv", 0).await.err().unwrap();
        assert!(matches!(err, ConnectError::Dial { .. }), "{err}");
    }

    #[tokio::test]
    async fn manager_reports_registry_config() {
        let registry = Arc::new(MemoryRegistry::new(RegistryConfig::new("10.1.0.1", 8600)));
        let manager = manager_with(registry);
        assert_eq!(manager.registry().config().address(), "10.1.0.1:8600");
        assert!(format!("{manager:?}").contains("10.1.0.1:8600"));
    }
}
