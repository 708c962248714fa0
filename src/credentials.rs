use std::future::Future;
use std::pin::Pin;

/// Tenant-scoped identity parsed from a session user id of the form
/// `"tenant:user"`. A bare user id falls back to the default tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentity {
    pub tenant_id: String,
    pub user_id: String,
}

pub const DEFAULT_TENANT: &str = "default";

impl TenantIdentity {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((tenant, user)) if !tenant.is_empty() && !user.is_empty() => Self {
                tenant_id: tenant.to_string(),
                user_id: user.to_string(),
            },
            _ => Self {
                tenant_id: DEFAULT_TENANT.to_string(),
                user_id: raw.to_string(),
            },
        }
    }
}

/// External credential lookup, scoped by tenant, user and the service
/// category an agent belongs to. Returns `None` when no valid credential
/// exists (the caller decides whether that is fatal).
pub trait CredentialResolver: Send + Sync {
    fn get_valid_credential<'a>(
        &'a self,
        tenant_id: &'a str,
        user_id: &'a str,
        service_category: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>>;
}

/// Resolver that never yields a credential. Useful for agents whose
/// services need no authentication, and for tests.
pub struct NoCredentialResolver;

impl CredentialResolver for NoCredentialResolver {
    fn get_valid_credential<'a>(
        &'a self,
        _tenant_id: &'a str,
        _user_id: &'a str,
        _service_category: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>> {
        Box::pin(async move { Ok(None) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tenant_qualified_user_id() {
        let identity = TenantIdentity::parse("acme:jane");
        assert_eq!(identity.tenant_id, "acme");
        assert_eq!(identity.user_id, "jane");
    }

    #[test]
    fn bare_user_id_falls_back_to_default_tenant() {
        let identity = TenantIdentity::parse("jane");
        assert_eq!(identity.tenant_id, DEFAULT_TENANT);
        assert_eq!(identity.user_id, "jane");
    }

    #[test]
    fn empty_tenant_segment_falls_back_to_default_tenant() {
        let identity = TenantIdentity::parse(":jane");
        assert_eq!(identity.tenant_id, DEFAULT_TENANT);
        assert_eq!(identity.user_id, ":jane");
    }

    #[tokio::test]
    async fn no_credential_resolver_yields_none() {
        let resolver = NoCredentialResolver;
        let credential = resolver
            .get_valid_credential("acme", "jane", "email")
            .await
            .unwrap();
        assert!(credential.is_none());
    }
}
