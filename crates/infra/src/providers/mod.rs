//! POS provider adapters
//!
//! One adapter per provider implements `ProviderAdapter` over the shared
//! [`HttpClient`](crate::http::HttpClient). The factory resolves credentials
//! and caches an adapter per integration.

mod credentials;
mod factory;
mod paging;
mod rate_limit;
mod shopify;
pub mod signatures;
mod square;
mod zettle;

pub use credentials::{resolve_credentials, CredentialRef, ProviderCredentials};
pub use factory::ProviderAdapterFactory;
pub use rate_limit::RateLimitTracker;
pub use shopify::{ShopifyAdapter, SHOPIFY_SIGNATURE_HEADER, SHOPIFY_WEBHOOK_ID_HEADER};
pub use square::{SquareAdapter, SQUARE_SIGNATURE_HEADER};
pub use zettle::{ZettleAdapter, ZETTLE_SIGNATURE_HEADER};

use ledgerlink_domain::Provider;

/// Header carrying the webhook signature for `provider`
pub const fn signature_header(provider: Provider) -> &'static str {
    match provider {
        Provider::Square => SQUARE_SIGNATURE_HEADER,
        Provider::Shopify => SHOPIFY_SIGNATURE_HEADER,
        Provider::Zettle => ZETTLE_SIGNATURE_HEADER,
    }
}

/// Header carrying the provider's delivery id, when it is not in the body
pub const fn delivery_id_header(provider: Provider) -> Option<&'static str> {
    match provider {
        Provider::Shopify => Some(SHOPIFY_WEBHOOK_ID_HEADER),
        Provider::Square | Provider::Zettle => None,
    }
}
