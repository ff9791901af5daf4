pub mod credentials;
pub mod token_cache;
pub mod token_fetch;

pub use credentials::{Credential, CredentialOverride, CredentialResolver, CredentialSource};
pub use token_cache::{Clock, ManualClock, SystemClock, TokenCache, TokenStore};
pub use token_fetch::{Token, TokenFetcher};
