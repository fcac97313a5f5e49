//! Provider presets
//!
//! Endpoints, scopes and cookie schema for each supported authorization
//! server, resolved by matching on [`ProviderKind`].

use super::fields::{serialize_space_joined, FieldDescriptor};

/// Clio data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClioRegion {
    /// United States (app.clio.com)
    #[default]
    Us,
    /// Europe
    Eu,
    /// Canada
    Ca,
    /// Australia
    Au,
}

impl ClioRegion {
    /// Host serving OAuth and the API for this region.
    pub fn host(&self) -> &'static str {
        match self {
            ClioRegion::Us => "https://app.clio.com",
            ClioRegion::Eu => "https://eu.app.clio.com",
            ClioRegion::Ca => "https://ca.app.clio.com",
            ClioRegion::Au => "https://au.app.clio.com",
        }
    }
}

/// Intuit (QuickBooks) environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntuitEnvironment {
    /// Sandbox companies
    #[default]
    Sandbox,
    /// Live companies
    Production,
}

impl IntuitEnvironment {
    /// Accounting API base URL.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            IntuitEnvironment::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            IntuitEnvironment::Production => "https://quickbooks.api.intuit.com",
        }
    }
}

/// How client credentials reach the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `client_id` / `client_secret` form fields
    RequestBody,
    /// HTTP Basic `Authorization` header
    BasicHeader,
}

/// Supported OAuth2 providers with pre-configured endpoints.
#[derive(Debug, Clone)]
pub enum ProviderKind {
    /// Microsoft identity platform (Azure AD v2) for one directory
    AzureAd {
        /// Directory (tenant) id, or `common` / `organizations`
        tenant_id: String,
    },
    /// Clio legal practice management
    Clio {
        /// Data region
        region: ClioRegion,
    },
    /// Intuit QuickBooks Online
    Intuit {
        /// Sandbox or production
        environment: IntuitEnvironment,
    },
    /// Google OAuth2
    Google,
    /// GitHub OAuth2
    GitHub,
    /// Custom provider with manual configuration
    Custom {
        /// Family name used in provider keys
        name: String,
        /// Authorization endpoint URL
        authorize_url: String,
        /// Token endpoint URL
        token_url: String,
        /// Extra fields persisted alongside the base token fields
        fields: Vec<FieldDescriptor>,
    },
}

impl ProviderKind {
    /// Azure AD for a directory.
    pub fn azure_ad(tenant_id: impl Into<String>) -> Self {
        ProviderKind::AzureAd {
            tenant_id: tenant_id.into(),
        }
    }

    /// Custom provider without extra fields.
    pub fn custom(
        name: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        ProviderKind::Custom {
            name: name.into(),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            fields: Vec::new(),
        }
    }

    /// Conventional family name for this provider.
    pub fn name(&self) -> &str {
        match self {
            ProviderKind::AzureAd { .. } => "azure",
            ProviderKind::Clio { .. } => "clio",
            ProviderKind::Intuit { .. } => "intuit",
            ProviderKind::Google => "google",
            ProviderKind::GitHub => "github",
            ProviderKind::Custom { name, .. } => name,
        }
    }

    /// Get the authorization endpoint URL for this provider.
    pub fn authorize_url(&self) -> String {
        match self {
            ProviderKind::AzureAd { tenant_id } => format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
                tenant_id
            ),
            ProviderKind::Clio { region } => format!("{}/oauth/authorize", region.host()),
            ProviderKind::Intuit { .. } => "https://appcenter.intuit.com/connect/oauth2".into(),
            ProviderKind::Google => "https://accounts.google.com/o/oauth2/v2/auth".into(),
            ProviderKind::GitHub => "https://github.com/login/oauth/authorize".into(),
            ProviderKind::Custom { authorize_url, .. } => authorize_url.clone(),
        }
    }

    /// Get the token endpoint URL for this provider.
    pub fn token_url(&self) -> String {
        match self {
            ProviderKind::AzureAd { tenant_id } => format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                tenant_id
            ),
            ProviderKind::Clio { region } => format!("{}/oauth/token", region.host()),
            ProviderKind::Intuit { .. } => {
                "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".into()
            }
            ProviderKind::Google => "https://oauth2.googleapis.com/token".into(),
            ProviderKind::GitHub => "https://github.com/login/oauth/access_token".into(),
            ProviderKind::Custom { token_url, .. } => token_url.clone(),
        }
    }

    /// Get default scopes for this provider.
    pub fn default_scopes(&self) -> Vec<String> {
        let scopes: &[&str] = match self {
            ProviderKind::AzureAd { .. } => &["openid", "profile", "offline_access"],
            ProviderKind::Clio { .. } => &[],
            ProviderKind::Intuit { .. } => &["com.intuit.quickbooks.accounting"],
            ProviderKind::Google => &["openid", "email", "profile"],
            ProviderKind::GitHub => &["user:email", "read:user"],
            ProviderKind::Custom { .. } => &[],
        };
        scopes.iter().map(|s| s.to_string()).collect()
    }

    /// Query parameters every authorization request carries.
    pub fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProviderKind::AzureAd { .. } => &[("response_mode", "query")],
            ProviderKind::Google => &[("access_type", "offline"), ("prompt", "consent")],
            ProviderKind::Clio { .. }
            | ProviderKind::Intuit { .. }
            | ProviderKind::GitHub
            | ProviderKind::Custom { .. } => &[],
        }
    }

    /// Callback query parameters captured into the token set, as
    /// `(query name, field key)`.
    pub fn callback_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProviderKind::Intuit { .. } => &[("realmId", "realm_id")],
            _ => &[],
        }
    }

    /// Check if this provider supports PKCE (Proof Key for Code Exchange).
    pub fn supports_pkce(&self) -> bool {
        match self {
            ProviderKind::AzureAd { .. } => true,
            ProviderKind::Google => true,
            ProviderKind::Custom { .. } => true,
            ProviderKind::Clio { .. } => false,
            ProviderKind::Intuit { .. } => false,
            ProviderKind::GitHub => false,
        }
    }

    /// How client credentials are sent to the token endpoint.
    pub fn client_auth(&self) -> ClientAuth {
        match self {
            ProviderKind::Intuit { .. } => ClientAuth::BasicHeader,
            _ => ClientAuth::RequestBody,
        }
    }

    /// Provider-specific fields persisted next to the base token fields.
    pub fn fields(&self) -> Vec<FieldDescriptor> {
        match self {
            ProviderKind::AzureAd { .. } => {
                vec![FieldDescriptor::new("scope").serializer(serialize_space_joined)]
            }
            ProviderKind::Intuit { .. } => vec![
                FieldDescriptor::new("realm_id"),
                FieldDescriptor::new("x_refresh_token_expires_in")
                    .stored_as("refresh_token_expires_in"),
            ],
            ProviderKind::Google | ProviderKind::GitHub => {
                vec![FieldDescriptor::new("scope").serializer(serialize_space_joined)]
            }
            ProviderKind::Clio { .. } => Vec::new(),
            ProviderKind::Custom { fields, .. } => fields.clone(),
        }
    }
}
